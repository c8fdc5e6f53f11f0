use super::models::ScoredChunk;
use super::{StoreError, VectorStore, read_header, serialize_vector};
use rusqlite::params;

/// Decimal places kept when ranking by cosine distance.
const DISTANCE_DECIMALS: i64 = 6;

impl VectorStore {
    /// Exact cosine nearest-neighbor scan.
    ///
    /// Returns at most `k` hits ordered by descending similarity, ties broken
    /// by ascending chunk id. An empty store yields no hits.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn()?;
        let Some(header) = read_header(&conn)? else {
            return Ok(Vec::new());
        };
        if vector.len() != header.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: header.dimension,
                actual: vector.len(),
            });
        }

        // Zero-norm vectors have no cosine distance; rank them last.
        // Rounding absorbs f32 noise so parallel vectors of any length tie.
        let mut stmt = conn.prepare(
            r#"
            SELECT chunk_id,
                   ROUND(COALESCE(vec_distance_cosine(vector, ?1), 1.0), ?3) AS distance
            FROM embeddings
            ORDER BY distance ASC, chunk_id ASC
            LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(
            params![
                serialize_vector(vector),
                i64::try_from(k).unwrap_or(i64::MAX),
                DISTANCE_DECIMALS
            ],
            |row| {
                let distance: f64 = row.get(1)?;
                Ok(ScoredChunk {
                    chunk_id: row.get(0)?,
                    score: (1.0 - distance) as f32,
                })
            },
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}
