use super::models::*;
use super::{StoreError, VectorStore, content_hash, deserialize_vector, read_header, serialize_vector};
use crate::indexer::chunks::{Chunk, ChunkKind};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

const UPSERT_SQL: &str = r#"
INSERT INTO embeddings (
    chunk_id, vector, model_identifier, created_at,
    symbol_id, kind, file_path, content, content_hash, token_estimate
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
ON CONFLICT(chunk_id) DO UPDATE SET
    vector = excluded.vector,
    model_identifier = excluded.model_identifier,
    created_at = excluded.created_at,
    symbol_id = excluded.symbol_id,
    kind = excluded.kind,
    file_path = excluded.file_path,
    content = excluded.content,
    content_hash = excluded.content_hash,
    token_estimate = excluded.token_estimate
"#;

fn mismatch(header: &StoreHeader, record: &EmbeddingRecord) -> Option<StoreError> {
    if header.model_identifier != record.model_identifier {
        Some(StoreError::ModelMismatch {
            expected: header.model_identifier.clone(),
            actual: record.model_identifier.clone(),
        })
    } else if header.dimension != record.vector.len() {
        Some(StoreError::DimensionMismatch {
            expected: header.dimension,
            actual: record.vector.len(),
        })
    } else {
        None
    }
}

impl VectorStore {
    /// Insert or replace records in one transaction.
    ///
    /// The first record written to an empty store fixes the dimension and
    /// model. Records that disagree with either are rejected individually.
    pub fn upsert(&self, records: &[EmbeddingRecord]) -> Result<UpsertReport, StoreError> {
        let mut report = UpsertReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut header = read_header(&tx)?;
        {
            let mut stmt = tx.prepare(UPSERT_SQL)?;
            for record in records {
                if record.vector.is_empty() {
                    report.rejected.push(RejectedRecord {
                        chunk_id: record.chunk_id.clone(),
                        reason: "empty vector".to_string(),
                    });
                    continue;
                }

                if header.is_none() {
                    tx.execute(
                        "INSERT INTO store_header (id, dimension, model_identifier, created_at) VALUES (1, ?1, ?2, ?3)",
                        params![record.vector.len() as i64, record.model_identifier, Utc::now()],
                    )?;
                    info!(
                        dimension = record.vector.len(),
                        model = %record.model_identifier,
                        "established store header"
                    );
                    header = read_header(&tx)?;
                }

                if let Some(err) = header.as_ref().and_then(|h| mismatch(h, record)) {
                    warn!(chunk_id = %record.chunk_id, "rejected record: {err}");
                    report.rejected.push(RejectedRecord {
                        chunk_id: record.chunk_id.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }

                let meta = &record.metadata;
                stmt.execute(params![
                    record.chunk_id,
                    serialize_vector(&record.vector),
                    record.model_identifier,
                    record.created_at,
                    meta.symbol_id,
                    meta.kind.as_str(),
                    meta.file_path,
                    meta.text,
                    content_hash(&meta.text),
                    meta.token_estimate as i64,
                ])?;
                report.written += 1;
            }
        }
        tx.commit()?;
        Ok(report)
    }

    /// Fetch one record by chunk id.
    pub fn get(&self, chunk_id: &str) -> Result<Option<EmbeddingRecord>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT vector, model_identifier, created_at, symbol_id, kind, file_path, content, token_estimate
                FROM embeddings WHERE chunk_id = ?1
                "#,
                params![chunk_id],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, DateTime<Utc>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((blob, model_identifier, created_at, symbol_id, kind, file_path, text, tokens)) = row else {
            return Ok(None);
        };
        Ok(Some(EmbeddingRecord {
            chunk_id: chunk_id.to_string(),
            vector: deserialize_vector(&blob)?,
            model_identifier,
            created_at,
            metadata: RecordMetadata {
                symbol_id,
                kind: kind.parse::<ChunkKind>().map_err(StoreError::Corrupt)?,
                file_path,
                text,
                token_estimate: tokens.max(0) as usize,
            },
        }))
    }

    /// Chunks for the given ids; ids no longer stored are left out.
    pub fn load_chunks(&self, chunk_ids: &[String]) -> Result<HashMap<String, Chunk>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT symbol_id, kind, file_path, content, token_estimate FROM embeddings WHERE chunk_id = ?1",
        )?;
        let mut chunks = HashMap::with_capacity(chunk_ids.len());
        for id in chunk_ids {
            let row = stmt
                .query_row(params![id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })
                .optional()?;
            if let Some((symbol_id, kind, file_path, text, tokens)) = row {
                let meta = RecordMetadata {
                    symbol_id,
                    kind: kind.parse::<ChunkKind>().map_err(StoreError::Corrupt)?,
                    file_path,
                    text,
                    token_estimate: tokens.max(0) as usize,
                };
                chunks.insert(id.clone(), meta.to_chunk(id));
            }
        }
        Ok(chunks)
    }

    /// Delete records by chunk id. Unknown ids are ignored.
    pub fn delete(&self, chunk_ids: &[String]) -> Result<usize, StoreError> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM embeddings WHERE chunk_id = ?1")?;
            for id in chunk_ids {
                deleted += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Delete every record that belongs to `file_path`.
    pub fn delete_file(&self, file_path: &str) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM embeddings WHERE file_path = ?1", params![file_path])?)
    }

    /// Chunk id → content hash for every record of `file_path`.
    pub fn content_hashes_for_file(&self, file_path: &str) -> Result<HashMap<String, String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT chunk_id, content_hash FROM embeddings WHERE file_path = ?1")?;
        let rows = stmt.query_map(params![file_path], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut hashes = HashMap::new();
        for row in rows {
            let (id, hash) = row?;
            hashes.insert(id, hash);
        }
        Ok(hashes)
    }

    /// Delete records whose symbol is not in `live_symbols`.
    pub fn retain_symbols(&self, live_symbols: &HashSet<String>) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let stale: Vec<String> = {
            let mut stmt = tx.prepare("SELECT DISTINCT symbol_id FROM embeddings")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut stale = Vec::new();
            for row in rows {
                let symbol_id = row?;
                if !live_symbols.contains(&symbol_id) {
                    stale.push(symbol_id);
                }
            }
            stale
        };

        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM embeddings WHERE symbol_id = ?1")?;
            for symbol_id in &stale {
                deleted += stmt.execute(params![symbol_id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Wipe every record when the store was built with a different model.
    ///
    /// Returns `true` if the store was reset.
    pub fn ensure_model(&self, model_identifier: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let reset = match read_header(&tx)? {
            Some(h) if h.model_identifier != model_identifier => {
                let dropped = tx.execute("DELETE FROM embeddings", [])?;
                tx.execute("DELETE FROM store_header", [])?;
                warn!(
                    old = %h.model_identifier,
                    new = %model_identifier,
                    dropped,
                    "embedding model changed, store reset"
                );
                true
            }
            _ => false,
        };
        tx.commit()?;
        Ok(reset)
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT count(*) FROM embeddings", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}
