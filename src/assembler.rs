//! Query → retrieve → dedupe → pack under a size budget.

use crate::db::{StoreError, VectorStore};
use crate::embedder::limiter::EmbedLimiter;
use crate::embedder::retry::{Backoff, embed_with_retry};
use crate::embedder::{Embedder, EmbedderError};
use crate::indexer::chunks::Chunk;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Maximum total size of an assembled context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    Chars(usize),
    Tokens(usize),
}

impl Budget {
    pub fn limit(&self) -> usize {
        match self {
            Budget::Chars(n) | Budget::Tokens(n) => *n,
        }
    }

    /// Size of `chunk` in this budget's unit.
    pub fn cost(&self, chunk: &Chunk) -> usize {
        match self {
            Budget::Chars(_) => chunk.char_len(),
            Budget::Tokens(_) => chunk.token_count_estimate,
        }
    }
}

/// Unit used when a budget is given as a bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetUnit {
    #[default]
    Tokens,
    Chars,
}

impl BudgetUnit {
    pub fn budget(self, amount: usize) -> Budget {
        match self {
            BudgetUnit::Tokens => Budget::Tokens(amount),
            BudgetUnit::Chars => Budget::Chars(amount),
        }
    }
}

#[derive(Error, Debug)]
pub enum AssembleError {
    #[error("store was built with `{stored}`, assembler uses `{configured}`")]
    ModelMismatch { stored: String, configured: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embedder(#[from] EmbedderError),
}

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
}

/// Read-only view over the store that answers context queries.
#[derive(Clone)]
pub struct ContextAssembler {
    store: VectorStore,
    embedder: Arc<dyn Embedder>,
    limiter: EmbedLimiter,
    backoff: Backoff,
    model: String,
    candidates: usize,
    cancel: CancellationToken,
}

impl ContextAssembler {
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
            backoff: Backoff::default(),
            model: model.into(),
            candidates: 20,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_candidates(mut self, candidates: usize) -> Self {
        self.candidates = candidates;
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

    /// Chunks most relevant to `query_text`, packed under `budget`, in rank order.
    pub async fn assemble(&self, query_text: &str, budget: Budget) -> Result<Vec<Chunk>, AssembleError> {
        if budget.limit() == 0 {
            return Ok(Vec::new());
        }
        let hits = self.retrieve(query_text, self.candidates).await?;
        let ranked: Vec<Chunk> = hits.into_iter().map(|h| h.chunk).collect();
        let packed = pack(ranked, budget);
        info!(
            selected = packed.len(),
            used = packed.iter().map(|c| budget.cost(c)).sum::<usize>(),
            limit = budget.limit(),
            "context assembled"
        );
        Ok(packed)
    }

    /// Top `k` chunks for `query_text` with scores, without packing.
    pub async fn search(&self, query_text: &str, k: usize) -> Result<Vec<SearchHit>, AssembleError> {
        self.retrieve(query_text, k).await
    }

    async fn retrieve(&self, query_text: &str, k: usize) -> Result<Vec<SearchHit>, AssembleError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let store = self.store.clone();
        let header = tokio::task::spawn_blocking(move || store.header())
            .await
            .map_err(|e| StoreError::Corrupt(format!("store task failed: {e}")))??;
        let Some(header) = header else {
            debug!("empty store, no candidates");
            return Ok(Vec::new());
        };
        if header.model_identifier != self.model {
            return Err(AssembleError::ModelMismatch {
                stored: header.model_identifier,
                configured: self.model.clone(),
            });
        }

        let texts = vec![query_text.to_string()];
        let mut vectors = embed_with_retry(
            self.embedder.as_ref(),
            &self.limiter,
            &self.backoff,
            &texts,
            &self.model,
            &self.cancel,
        )
        .await?;
        let query_vector = vectors
            .pop()
            .ok_or_else(|| EmbedderError::InvalidResponse("no query embedding returned".into()))?;

        let store = self.store.clone();
        let hits = tokio::task::spawn_blocking(move || {
            let scored = store.query(&query_vector, k)?;
            let ids: Vec<String> = scored.iter().map(|s| s.chunk_id.clone()).collect();
            let mut chunks = store.load_chunks(&ids)?;
            // ids deleted since the query are dropped
            Ok::<_, StoreError>(
                scored
                    .into_iter()
                    .filter_map(|s| {
                        chunks.remove(&s.chunk_id).map(|chunk| SearchHit {
                            chunk,
                            score: s.score,
                        })
                    })
                    .collect::<Vec<_>>(),
            )
        })
        .await
        .map_err(|e| StoreError::Corrupt(format!("store task failed: {e}")))??;

        debug!(candidates = hits.len(), "retrieved");
        Ok(hits)
    }
}

/// Greedy budget packing over rank-ordered chunks.
///
/// The first chunk per symbol is primary, later ones are deferred until all
/// primaries had their chance. Chunks that do not fit are skipped, never
/// truncated. The result keeps rank order.
pub fn pack(ranked: Vec<Chunk>, budget: Budget) -> Vec<Chunk> {
    let limit = budget.limit();
    if limit == 0 {
        return Vec::new();
    }

    let mut seen_symbols = HashSet::new();
    let mut primary = Vec::new();
    let mut deferred = Vec::new();
    for (rank, chunk) in ranked.into_iter().enumerate() {
        if seen_symbols.insert(chunk.source_symbol_id.clone()) {
            primary.push((rank, chunk));
        } else {
            deferred.push((rank, chunk));
        }
    }

    let mut used = 0;
    let mut selected = Vec::new();
    for (rank, chunk) in primary.into_iter().chain(deferred) {
        let cost = budget.cost(&chunk);
        if used + cost <= limit {
            used += cost;
            selected.push((rank, chunk));
        }
    }

    selected.sort_by_key(|(rank, _)| *rank);
    selected.into_iter().map(|(_, chunk)| chunk).collect()
}

/// Format packed chunks as a prompt block.
pub fn render_context(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        let _ = writeln!(out, "### {} ({})", chunk.file_path, chunk.kind);
        let _ = writeln!(out, "{}", chunk.text.trim_end());
        out.push('\n');
    }
    out
}
