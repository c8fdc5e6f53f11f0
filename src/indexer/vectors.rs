//! Batched embedding of chunks into the vector store.

use super::chunks::Chunk;
use crate::db::VectorStore;
use crate::db::models::{EmbeddingRecord, UpsertReport};
use crate::embedder::limiter::EmbedLimiter;
use crate::embedder::retry::{Backoff, embed_with_retry};
use crate::embedder::{Embedder, EmbedderError};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A chunk that could not be indexed, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedChunk {
    pub chunk_id: String,
    pub reason: String,
}

/// Outcome of one `index` call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IndexReport {
    pub indexed: usize,
    pub failed: Vec<FailedChunk>,
    /// Chunks never sent because the run was cancelled.
    pub cancelled: Vec<String>,
}

impl IndexReport {
    /// Ids of every chunk that did not make it into the store.
    pub fn unindexed_ids(&self) -> Vec<String> {
        self.failed
            .iter()
            .map(|f| f.chunk_id.clone())
            .chain(self.cancelled.iter().cloned())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty()
    }

    pub fn merge(&mut self, other: IndexReport) {
        self.indexed += other.indexed;
        self.failed.extend(other.failed);
        self.cancelled.extend(other.cancelled);
    }
}

enum BatchOutcome {
    Stored(UpsertReport),
    Failed(String),
    Cancelled,
}

/// Embeds chunks in batches and upserts the vectors.
///
/// Batches run concurrently up to the limiter's permit count; a failing batch
/// only affects its own chunks.
#[derive(Clone)]
pub struct VectorIndexer {
    store: VectorStore,
    embedder: Arc<dyn Embedder>,
    limiter: EmbedLimiter,
    model: String,
    batch_size: usize,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl VectorIndexer {
    pub fn new(
        store: VectorStore,
        embedder: Arc<dyn Embedder>,
        limiter: EmbedLimiter,
        model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            limiter,
            model: model.into(),
            batch_size: 32,
            backoff: Backoff::default(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Embed and store `chunks`. Never fails as a whole; see [`IndexReport`].
    pub async fn index(&self, chunks: Vec<Chunk>) -> IndexReport {
        let mut report = IndexReport::default();
        if chunks.is_empty() {
            return report;
        }

        let batches: Vec<Vec<Chunk>> = chunks.chunks(self.batch_size).map(<[Chunk]>::to_vec).collect();
        info!(
            chunks = chunks.len(),
            batches = batches.len(),
            model = %self.model,
            "indexing chunks"
        );

        let mut tasks = JoinSet::new();
        let mut batch_ids: Vec<Vec<String>> = Vec::with_capacity(batches.len());
        for (n, batch) in batches.into_iter().enumerate() {
            batch_ids.push(batch.iter().map(|c| c.id.clone()).collect());
            let indexer = self.clone();
            tasks.spawn(async move { (n, indexer.run_batch(batch).await) });
        }

        let mut outcomes: Vec<Option<BatchOutcome>> = (0..batch_ids.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((n, outcome)) => outcomes[n] = Some(outcome),
                Err(e) => warn!("embedding task panicked: {e}"),
            }
        }

        for (ids, outcome) in batch_ids.into_iter().zip(outcomes) {
            match outcome {
                Some(BatchOutcome::Stored(upsert)) => {
                    report.indexed += upsert.written;
                    report.failed.extend(upsert.rejected.into_iter().map(|r| FailedChunk {
                        chunk_id: r.chunk_id,
                        reason: r.reason,
                    }));
                }
                Some(BatchOutcome::Failed(reason)) => {
                    report.failed.extend(ids.into_iter().map(|chunk_id| FailedChunk {
                        chunk_id,
                        reason: reason.clone(),
                    }));
                }
                Some(BatchOutcome::Cancelled) => report.cancelled.extend(ids),
                None => report.failed.extend(ids.into_iter().map(|chunk_id| FailedChunk {
                    chunk_id,
                    reason: "embedding task aborted".to_string(),
                })),
            }
        }

        info!(
            indexed = report.indexed,
            failed = report.failed.len(),
            cancelled = report.cancelled.len(),
            "indexing finished"
        );
        report
    }

    async fn run_batch(&self, batch: Vec<Chunk>) -> BatchOutcome {
        if self.cancel.is_cancelled() {
            return BatchOutcome::Cancelled;
        }

        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = match embed_with_retry(
            self.embedder.as_ref(),
            &self.limiter,
            &self.backoff,
            &texts,
            &self.model,
            &self.cancel,
        )
        .await
        {
            Ok(vectors) => vectors,
            Err(EmbedderError::Cancelled) => return BatchOutcome::Cancelled,
            Err(e) => {
                warn!(chunks = batch.len(), "embedding batch failed: {e}");
                return BatchOutcome::Failed(e.to_string());
            }
        };

        let records: Vec<EmbeddingRecord> = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingRecord::from_chunk(chunk, vector, &self.model))
            .collect();

        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.upsert(&records)).await {
            Ok(Ok(upsert)) => {
                debug!(written = upsert.written, rejected = upsert.rejected.len(), "batch stored");
                BatchOutcome::Stored(upsert)
            }
            Ok(Err(e)) => {
                warn!("upsert failed: {e}");
                BatchOutcome::Failed(e.to_string())
            }
            Err(e) => BatchOutcome::Failed(format!("upsert task failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use crate::indexer::chunks::ChunkKind;
    use async_trait::async_trait;
    use std::time::Duration;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            source_symbol_id: format!("sym-{id}"),
            file_path: "a.rs".to_string(),
            kind: ChunkKind::Code,
            text: text.to_string(),
            token_count_estimate: 1,
        }
    }

    /// Rejects any batch containing "poison" with a terminal error.
    struct Poisoned(MockEmbedder);

    #[async_trait]
    impl Embedder for Poisoned {
        async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>, EmbedderError> {
            if text.contains("poison") {
                return Err(EmbedderError::Rejected {
                    status: 400,
                    message: "poisoned input".into(),
                });
            }
            self.0.embed(text, model).await
        }

        fn dimensions(&self) -> usize {
            self.0.dimensions
        }
    }

    fn indexer(store: &VectorStore, embedder: Arc<dyn Embedder>) -> VectorIndexer {
        VectorIndexer::new(
            store.clone(),
            embedder,
            EmbedLimiter::new(2, Duration::from_secs(5)),
            "mock-model",
        )
        .with_batch_size(2)
        .with_backoff(Backoff {
            base: Duration::from_millis(1),
            max: Duration::from_millis(2),
            max_attempts: 2,
        })
    }

    #[tokio::test]
    async fn test_index_all_chunks() {
        let store = VectorStore::open_in_memory().unwrap();
        let indexer = indexer(&store, Arc::new(MockEmbedder::new(8)));
        let chunks: Vec<Chunk> = (0..5).map(|i| chunk(&format!("c{i}"), &format!("fn f{i}() {{}}"))).collect();
        let report = indexer.index(chunks).await;
        assert_eq!(report.indexed, 5);
        assert!(report.is_complete());
        assert_eq!(store.len().unwrap(), 5);
        assert_eq!(store.get("c3").unwrap().unwrap().model_identifier, "mock-model");
    }

    #[tokio::test]
    async fn test_failing_batch_is_isolated() {
        let store = VectorStore::open_in_memory().unwrap();
        let indexer = indexer(&store, Arc::new(Poisoned(MockEmbedder::new(8))));
        let chunks = vec![
            chunk("c0", "fine"),
            chunk("c1", "fine too"),
            chunk("c2", "poison"),
            chunk("c3", "ok"),
            chunk("c4", "last"),
        ];
        let report = indexer.index(chunks).await;
        assert_eq!(report.indexed, 3);
        let failed: Vec<&str> = report.failed.iter().map(|f| f.chunk_id.as_str()).collect();
        assert_eq!(failed, vec!["c2", "c3"]);
        assert!(report.failed[0].reason.contains("poisoned input"));
        assert!(store.get("c4").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_reported_per_chunk() {
        let store = VectorStore::open_in_memory().unwrap();
        indexer(&store, Arc::new(MockEmbedder::new(4)))
            .index(vec![chunk("seed", "seed")])
            .await;

        let report = indexer(&store, Arc::new(MockEmbedder::new(8)))
            .index(vec![chunk("c1", "a"), chunk("c2", "b")])
            .await;
        assert_eq!(report.indexed, 0);
        assert_eq!(report.unindexed_ids(), vec!["c1".to_string(), "c2".to_string()]);
        assert!(report.failed[0].reason.contains("dimension mismatch"));
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_unstarted_chunks() {
        let store = VectorStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let indexer = indexer(&store, Arc::new(MockEmbedder::new(8))).with_cancellation(cancel);
        let report = indexer.index(vec![chunk("c1", "a"), chunk("c2", "b"), chunk("c3", "c")]).await;
        assert_eq!(report.indexed, 0);
        assert_eq!(report.cancelled.len(), 3);
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_reindex_overwrites_same_ids() {
        let store = VectorStore::open_in_memory().unwrap();
        let indexer = indexer(&store, Arc::new(MockEmbedder::new(8)));
        indexer.index(vec![chunk("c1", "old text")]).await;
        indexer.index(vec![chunk("c1", "new text")]).await;
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.get("c1").unwrap().unwrap().metadata.text, "new text");
    }
}
