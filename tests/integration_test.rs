/// End-to-end integration tests for the coderag pipeline.
///
/// Tests the complete flow:
///   Source files → Extractor → RepoMap → Chunks → Vectors → Store → Assembler
use async_trait::async_trait;
use coderag::assembler::{AssembleError, Budget, ContextAssembler, render_context};
use coderag::db::models::EmbeddingRecord;
use coderag::db::{StoreError, VectorStore};
use coderag::embedder::limiter::EmbedLimiter;
use coderag::embedder::mock::MockEmbedder;
use coderag::embedder::{Embedder, EmbedderError};
use coderag::indexer::chunks::{Chunk, ChunkBuilder, ChunkKind, SummaryMap};
use coderag::indexer::code_parser::SymbolExtractor;
use coderag::indexer::core::{RepoIndex, SourceFile};
use coderag::indexer::repo_map::RepoMap;
use coderag::indexer::symbols::SymbolKind;
use coderag::indexer::vectors::VectorIndexer;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const MODEL: &str = "mock-embed";

const A_PY: &str = r#"def foo(items):
    """Sum the even items."""
    total = 0
    for item in items:
        if item % 2 == 0:
            total += item
    return total
"#;

const B_PY: &str = r#"class Bar:
    """A bar that can baz."""

    def baz(self):
        return 42
"#;

fn limiter() -> EmbedLimiter {
    EmbedLimiter::new(4, Duration::from_secs(5))
}

fn repo_index(store: &VectorStore) -> RepoIndex {
    let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(16));
    RepoIndex::new(
        Arc::new(SymbolExtractor::with_builtin().unwrap()),
        Arc::new(RepoMap::new()),
        ChunkBuilder::new(2000),
        VectorIndexer::new(store.clone(), embedder, limiter(), MODEL).with_batch_size(2),
        store.clone(),
    )
}

fn assembler(store: &VectorStore) -> ContextAssembler {
    ContextAssembler::new(store.clone(), Arc::new(MockEmbedder::new(16)), limiter(), MODEL)
}

/// Full pipeline: two Python files → sync → repo map → assemble
#[tokio::test]
async fn test_full_pipeline() {
    let temp_dir = tempdir().unwrap();
    let store = VectorStore::open(temp_dir.path().join("vectors.db")).unwrap();
    let index = repo_index(&store);

    let report = index
        .sync(
            vec![
                SourceFile::new("a.py", A_PY, "python"),
                SourceFile::new("b.py", B_PY, "python"),
            ],
            &SummaryMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(report.files_indexed, 2);
    assert!(report.skipped.is_empty());
    assert!(report.index.is_complete(), "unexpected failures: {:?}", report.index);

    // RepoMap: b.py holds Bar and its method baz
    let b = index.repo_map().lookup("b.py");
    let names: Vec<&str> = b.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Bar", "baz"]);
    assert_eq!(b[0].kind, SymbolKind::Class);
    assert_eq!(b[1].kind, SymbolKind::Method);
    assert_eq!(b[1].parent_id.as_deref(), Some(b[0].id.as_str()));

    let a = index.repo_map().lookup("a.py");
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].name, "foo");
    assert_eq!(a[0].line_count(), 7);

    // Exact text of baz's code chunk is retrievable by similarity
    let hits = assembler(&store).search("def baz(self):\n        return 42", 3).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].chunk.source_symbol_id, b[1].id);
    assert_eq!(hits[0].chunk.kind, ChunkKind::Code);

    // Packing never exceeds the budget
    let budget = Budget::Chars(120);
    let packed = assembler(&store).assemble("sum even items", budget).await.unwrap();
    let used: usize = packed.iter().map(|c| c.char_len()).sum();
    assert!(used <= 120);
    assert!(render_context(&packed).lines().filter(|l| l.starts_with("### ")).count() == packed.len());

    // Budget 0 yields nothing
    assert!(assembler(&store).assemble("anything", Budget::Tokens(0)).await.unwrap().is_empty());
}

/// Records and header survive a reopen; no re-extraction needed to query.
#[tokio::test]
async fn test_store_persists_across_restart() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("vectors.db");
    {
        let store = VectorStore::open(&path).unwrap();
        repo_index(&store)
            .sync(vec![SourceFile::new("b.py", B_PY, "python")], &SummaryMap::new())
            .await
            .unwrap();
    }

    let store = VectorStore::open(&path).unwrap();
    assert_eq!(store.header().unwrap().unwrap().dimension, 16);
    let hits = assembler(&store).search("class Bar", 10).await.unwrap();
    // Bar: code + docstring, baz: code
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|h| h.chunk.file_path == "b.py"));
}

#[test]
fn test_chunk_ids_stable_across_runs() {
    let extractor = SymbolExtractor::with_builtin().unwrap();
    let builder = ChunkBuilder::new(2000);
    let build = || {
        let symbols = extractor.extract("b.py", B_PY, "python").unwrap();
        builder.build_all(&symbols, &SummaryMap::new())
    };
    assert_eq!(build(), build());
}

fn record(id: &str, vector: Vec<f32>) -> EmbeddingRecord {
    let chunk = Chunk {
        id: id.to_string(),
        source_symbol_id: format!("sym-{id}"),
        file_path: "x.rs".to_string(),
        kind: ChunkKind::Code,
        text: id.to_string(),
        token_count_estimate: 1,
    };
    EmbeddingRecord::from_chunk(&chunk, vector, "fixed")
}

/// 3 records of dimension 4; a 5-dimension query is rejected.
#[test]
fn test_query_dimension_mismatch() {
    let store = VectorStore::open_in_memory().unwrap();
    let report = store
        .upsert(&[
            record("r1", vec![1.0, 0.0, 0.0, 0.0]),
            record("r2", vec![0.0, 1.0, 0.0, 0.0]),
            record("r3", vec![0.0, 0.0, 1.0, 0.0]),
        ])
        .unwrap();
    assert_eq!(report.written, 3);

    let err = store.query(&[1.0, 0.0, 0.0, 0.0, 0.0], 3).unwrap_err();
    assert!(matches!(
        err,
        StoreError::DimensionMismatch {
            expected: 4,
            actual: 5
        }
    ));
}

#[test]
fn test_upsert_twice_and_delete() {
    let store = VectorStore::open_in_memory().unwrap();
    store.upsert(&[record("r1", vec![1.0, 0.0])]).unwrap();
    store.upsert(&[record("r1", vec![0.0, 1.0])]).unwrap();
    assert_eq!(store.len().unwrap(), 1);
    assert_eq!(store.get("r1").unwrap().unwrap().vector, vec![0.0, 1.0]);

    store.upsert(&[record("r2", vec![0.0, 1.0])]).unwrap();
    store.delete(&["r1".to_string()]).unwrap();
    let hits = store.query(&[0.0, 1.0], 5).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "r2");
}

/// Returns the same query vector for every text.
struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str, _model: &str) -> Result<Vec<f32>, EmbedderError> {
        Ok(vec![1.0, 0.0, 0.0, 0.0])
    }

    fn dimensions(&self) -> usize {
        4
    }
}

/// Five ranked candidates; 1 and 2 fit, 3 is too large, 4 still fits.
#[tokio::test]
async fn test_budget_packing_skips_oversized_candidate() {
    let store = VectorStore::open_in_memory().unwrap();
    let candidates = [
        ("c1", 30, vec![1.0, 0.0, 0.0, 0.0]),
        ("c2", 30, vec![1.0, 0.2, 0.0, 0.0]),
        ("c3", 50, vec![1.0, 0.5, 0.0, 0.0]),
        ("c4", 20, vec![1.0, 1.0, 0.0, 0.0]),
        ("c5", 30, vec![0.0, 1.0, 0.0, 0.0]),
    ];
    let records: Vec<EmbeddingRecord> = candidates
        .iter()
        .map(|(id, len, vector)| {
            let chunk = Chunk {
                id: id.to_string(),
                source_symbol_id: format!("sym-{id}"),
                file_path: "x.rs".to_string(),
                kind: ChunkKind::Code,
                text: "y".repeat(*len),
                token_count_estimate: len / 4,
            };
            EmbeddingRecord::from_chunk(&chunk, vector.clone(), "fixed")
        })
        .collect();
    store.upsert(&records).unwrap();

    let assembler = ContextAssembler::new(store.clone(), Arc::new(FixedEmbedder), limiter(), "fixed")
        .with_candidates(5);
    let packed = assembler.assemble("anything", Budget::Chars(80)).await.unwrap();
    let ids: Vec<&str> = packed.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2", "c4"]);

    let err = ContextAssembler::new(store, Arc::new(FixedEmbedder), limiter(), "another-model")
        .assemble("anything", Budget::Chars(80))
        .await
        .unwrap_err();
    assert!(matches!(err, AssembleError::ModelMismatch { .. }));
}
