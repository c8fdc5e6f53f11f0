use crate::indexer::chunks::{Chunk, ChunkKind, estimate_tokens};
use chrono::{DateTime, Utc};

/// Chunk metadata persisted next to its vector.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMetadata {
    pub symbol_id: String,
    pub kind: ChunkKind,
    pub file_path: String,
    pub text: String,
    pub token_estimate: usize,
}

/// One stored vector, keyed by chunk id.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub model_identifier: String,
    pub created_at: DateTime<Utc>,
    pub metadata: RecordMetadata,
}

impl EmbeddingRecord {
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>, model_identifier: &str) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            vector,
            model_identifier: model_identifier.to_string(),
            created_at: Utc::now(),
            metadata: RecordMetadata {
                symbol_id: chunk.source_symbol_id.clone(),
                kind: chunk.kind,
                file_path: chunk.file_path.clone(),
                text: chunk.text.clone(),
                token_estimate: chunk.token_count_estimate,
            },
        }
    }

    pub fn to_chunk(&self) -> Chunk {
        self.metadata.to_chunk(&self.chunk_id)
    }
}

impl RecordMetadata {
    pub fn to_chunk(&self, chunk_id: &str) -> Chunk {
        Chunk {
            id: chunk_id.to_string(),
            source_symbol_id: self.symbol_id.clone(),
            file_path: self.file_path.clone(),
            kind: self.kind,
            token_count_estimate: if self.token_estimate == 0 {
                estimate_tokens(&self.text)
            } else {
                self.token_estimate
            },
            text: self.text.clone(),
        }
    }
}

/// Store-wide header row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHeader {
    pub dimension: usize,
    pub model_identifier: String,
    pub created_at: DateTime<Utc>,
}

/// A query hit: chunk id and cosine similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f32,
}

/// A record the store refused to write.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub chunk_id: String,
    pub reason: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct UpsertReport {
    pub written: usize,
    pub rejected: Vec<RejectedRecord>,
}
