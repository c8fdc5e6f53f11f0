use super::chunks::{Chunk, ChunkBuilder, ChunkKind, SummaryMap, chunk_id};
use super::code_parser::{ExtractError, SymbolExtractor};
use super::repo_map::RepoMap;
use super::summaries::{Summarizer, collect_summaries};
use super::symbols::Symbol;
use super::vectors::{IndexReport, VectorIndexer};
use crate::db::{StoreError, VectorStore, content_hash};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// One source file handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub text: String,
    pub language: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
            language: language.into(),
        }
    }
}

/// A file left out of a run, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncReport {
    pub files_indexed: usize,
    pub skipped: Vec<SkippedFile>,
    pub symbols: usize,
    pub chunks: usize,
    /// Chunks whose stored text was already current.
    pub unchanged: usize,
    /// Stored chunks removed because their symbol or kind is gone.
    pub stale_removed: usize,
    /// The store was wiped because the embedding model changed.
    pub store_reset: bool,
    /// Summaries requested from the summarizer in this run.
    pub summarized: usize,
    /// Stored summaries kept because their symbol's code did not change.
    pub summaries_reused: usize,
    pub index: IndexReport,
}

/// Drives the write path: extract → repo map → chunks → vectors.
#[derive(Clone)]
pub struct RepoIndex {
    extractor: Arc<SymbolExtractor>,
    repo_map: Arc<RepoMap>,
    chunker: ChunkBuilder,
    indexer: VectorIndexer,
    store: VectorStore,
    summarizer: Option<(Arc<dyn Summarizer>, usize)>,
}

impl RepoIndex {
    pub fn new(
        extractor: Arc<SymbolExtractor>,
        repo_map: Arc<RepoMap>,
        chunker: ChunkBuilder,
        indexer: VectorIndexer,
        store: VectorStore,
    ) -> Self {
        Self {
            extractor,
            repo_map,
            chunker,
            indexer,
            store,
            summarizer: None,
        }
    }

    /// Summarize extracted symbols during `sync`, `max_concurrency` calls at a time.
    #[must_use]
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>, max_concurrency: usize) -> Self {
        self.summarizer = Some((summarizer, max_concurrency));
        self
    }

    pub fn repo_map(&self) -> &Arc<RepoMap> {
        &self.repo_map
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Extract symbols for every file in parallel.
    ///
    /// Failed files are returned separately and leave the repo map untouched.
    pub async fn extract_all(&self, files: Vec<SourceFile>) -> (Vec<(SourceFile, Vec<Symbol>)>, Vec<SkippedFile>) {
        let mut tasks = JoinSet::new();
        for file in files {
            let extractor = Arc::clone(&self.extractor);
            tasks.spawn_blocking(move || {
                let result = extractor.extract(&file.path, &file.text, &file.language);
                (file, result)
            });
        }

        let mut extracted = Vec::new();
        let mut skipped = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((file, Ok(symbols))) => {
                    debug!(path = %file.path, symbols = symbols.len(), "extracted");
                    extracted.push((file, symbols));
                }
                Ok((file, Err(e))) => {
                    match &e {
                        ExtractError::UnsupportedLanguage(_) => debug!(path = %file.path, "skipped: {e}"),
                        _ => warn!(path = %file.path, "skipped: {e}"),
                    }
                    skipped.push(SkippedFile {
                        path: file.path,
                        reason: e.to_string(),
                    });
                }
                Err(e) => warn!("extraction task panicked: {e}"),
            }
        }
        extracted.sort_by(|a, b| a.0.path.cmp(&b.0.path));
        skipped.sort_by(|a, b| a.path.cmp(&b.path));
        (extracted, skipped)
    }

    /// Index a batch of files incrementally.
    ///
    /// Only chunks whose text changed are re-embedded; chunks of the same
    /// files that no longer exist are deleted. Per-file and per-chunk failures
    /// end up in the report; only store-level failures abort the run.
    pub async fn sync(&self, files: Vec<SourceFile>, summaries: &SummaryMap) -> Result<SyncReport, StoreError> {
        let mut report = SyncReport::default();

        let store = self.store.clone();
        let model = self.indexer.model().to_string();
        report.store_reset = run_blocking(move || store.ensure_model(&model)).await?;

        let (extracted, skipped) = self.extract_all(files).await;
        report.skipped = skipped;

        let summaries = self.summaries_for(&extracted, summaries, &mut report).await;

        let mut pending: Vec<Chunk> = Vec::new();
        for (file, symbols) in extracted {
            let chunks = self.chunker.build_all(&symbols, &summaries);
            report.symbols += symbols.len();
            report.chunks += chunks.len();
            self.repo_map.update(&file.path, symbols);

            let (fresh, unchanged, stale_removed) = match self.diff_against_store(&file.path, chunks).await {
                Ok(diff) => diff,
                Err(e) => {
                    warn!(path = %file.path, "skipped: {e}");
                    report.skipped.push(SkippedFile {
                        path: file.path,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            report.unchanged += unchanged;
            report.stale_removed += stale_removed;
            report.files_indexed += 1;
            pending.extend(fresh);
        }

        report.index = self.indexer.index(pending).await;
        info!(
            files = report.files_indexed,
            skipped = report.skipped.len(),
            symbols = report.symbols,
            chunks = report.chunks,
            unchanged = report.unchanged,
            indexed = report.index.indexed,
            "sync finished"
        );
        Ok(report)
    }

    /// Caller summaries plus, with a summarizer, summaries for the remaining symbols.
    ///
    /// A symbol whose stored code chunk is current keeps its stored summary,
    /// so unchanged code never goes back to the model.
    async fn summaries_for(
        &self,
        extracted: &[(SourceFile, Vec<Symbol>)],
        provided: &SummaryMap,
        report: &mut SyncReport,
    ) -> SummaryMap {
        let mut summaries = provided.clone();
        let Some((summarizer, max_concurrency)) = &self.summarizer else {
            return summaries;
        };
        if self.indexer.cancellation().is_cancelled() {
            return summaries;
        }

        let mut reuse: Vec<String> = Vec::new();
        let mut pending: Vec<Symbol> = Vec::new();
        for (file, symbols) in extracted {
            let store = self.store.clone();
            let path = file.path.clone();
            let stored = match run_blocking(move || store.content_hashes_for_file(&path)).await {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(path = %file.path, "stored hashes unavailable: {e}");
                    Default::default()
                }
            };

            for symbol in symbols.iter().filter(|s| !summaries.contains_key(&s.id)) {
                let summary_id = chunk_id(&symbol.id, ChunkKind::Summary);
                let code_current = self
                    .chunker
                    .build(symbol, None)
                    .iter()
                    .find(|c| c.kind == ChunkKind::Code)
                    .is_some_and(|code| stored.get(&code.id) == Some(&content_hash(&code.text)));
                if code_current && stored.contains_key(&summary_id) {
                    reuse.push(summary_id);
                } else {
                    pending.push(symbol.clone());
                }
            }
        }

        if !reuse.is_empty() {
            let store = self.store.clone();
            match run_blocking(move || store.load_chunks(&reuse)).await {
                Ok(stored) => {
                    report.summaries_reused = stored.len();
                    for chunk in stored.into_values() {
                        summaries.insert(chunk.source_symbol_id, chunk.text);
                    }
                }
                Err(e) => warn!("stored summaries unavailable: {e}"),
            }
        }

        if !pending.is_empty() {
            report.summarized = pending.len();
            let fresh = collect_summaries(Arc::clone(summarizer), &pending, *max_concurrency).await;
            debug!(requested = pending.len(), produced = fresh.len(), "summaries collected");
            summaries.extend(fresh);
        }
        summaries
    }

    /// Split `chunks` into those needing embedding, and drop stored chunks of
    /// the file that were not rebuilt.
    async fn diff_against_store(&self, path: &str, chunks: Vec<Chunk>) -> Result<(Vec<Chunk>, usize, usize), StoreError> {
        let store = self.store.clone();
        let file = path.to_string();
        let existing = run_blocking(move || store.content_hashes_for_file(&file)).await?;

        let live: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let stale: Vec<String> = existing
            .keys()
            .filter(|id| !live.contains(id.as_str()))
            .cloned()
            .collect();

        let stale_removed = if stale.is_empty() {
            0
        } else {
            let store = self.store.clone();
            run_blocking(move || store.delete(&stale)).await?
        };

        let total = chunks.len();
        let fresh: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| existing.get(&c.id) != Some(&content_hash(&c.text)))
            .collect();
        let unchanged = total - fresh.len();
        Ok((fresh, unchanged, stale_removed))
    }

    /// Re-index a single file.
    pub async fn update_file(&self, file: SourceFile, summaries: &SummaryMap) -> Result<SyncReport, StoreError> {
        self.sync(vec![file], summaries).await
    }

    /// Forget a file: drop its symbols and stored chunks.
    pub async fn remove_file(&self, path: &str) -> Result<usize, StoreError> {
        self.repo_map.remove(path);
        let store = self.store.clone();
        let file = path.to_string();
        let removed = run_blocking(move || store.delete_file(&file)).await?;
        info!(path, removed, "file removed from index");
        Ok(removed)
    }

    /// Delete stored chunks whose symbol is no longer in the repo map.
    pub async fn compact(&self) -> Result<usize, StoreError> {
        let live = self.repo_map.symbol_ids();
        let store = self.store.clone();
        let removed = run_blocking(move || store.retain_symbols(&live)).await?;
        info!(removed, "compaction finished");
        Ok(removed)
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Corrupt(format!("store task failed: {e}")))?
}
