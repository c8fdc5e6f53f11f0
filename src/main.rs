use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coderag::assembler::{ContextAssembler, render_context};
use coderag::config::Config;
use coderag::db::VectorStore;
use coderag::embedder::Embedder;
use coderag::embedder::http::HttpEmbedder;
use coderag::embedder::mock::MockEmbedder;
use coderag::indexer::chunks::{ChunkBuilder, SummaryMap};
use coderag::indexer::code_parser::SymbolExtractor;
use coderag::indexer::core::{RepoIndex, SourceFile};
use coderag::indexer::openai::OpenAiSummarizer;
use coderag::indexer::repo_map::RepoMap;
use coderag::indexer::vectors::VectorIndexer;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coderag", version, about = "Symbol-aware code indexing and context retrieval")]
struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index every supported source file under a directory
    Index {
        dir: PathBuf,

        /// Keep records of symbols that are no longer in the tree
        #[arg(long)]
        no_compact: bool,
    },
    /// Assemble context for a query under a budget
    Query {
        text: String,

        /// Budget in the configured unit (tokens by default)
        #[arg(short, long, default_value_t = 2000)]
        budget: usize,
    },
    /// Show the top-k scored chunks for a query
    Search {
        text: String,

        #[arg(short, default_value_t = 10)]
        k: usize,
    },
    /// Print the symbol enclosing a line of a source file
    Context {
        file: PathBuf,

        /// 1-based line number
        line: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    config.validate().context("invalid configuration")?;

    let store = VectorStore::open(&config.db_path).context("Failed to open vector store")?;
    let client = reqwest::Client::new();
    let embedder = build_embedder(&config, &client);
    let limiter = config.limiter();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing in-flight work");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Index { dir, no_compact } => {
            let extractor = Arc::new(SymbolExtractor::with_builtin()?);
            let files = collect_files(&dir, &extractor)?;
            info!("Found {} source files under {}", files.len(), dir.display());

            let indexer = VectorIndexer::new(store.clone(), embedder, limiter, config.model.name.clone())
                .with_batch_size(config.indexer.batch_size)
                .with_backoff(config.backoff())
                .with_cancellation(cancel.clone());
            let mut index = RepoIndex::new(
                extractor,
                Arc::new(RepoMap::new()),
                ChunkBuilder::new(config.chunker.max_code_chars),
                indexer,
                store,
            );
            if let (Some(settings), Some(section)) = (config.summarizer_settings(), &config.summarizer) {
                info!("Summarizing symbols with {} at {}", settings.model, settings.base_url);
                let summarizer = OpenAiSummarizer::new(settings).with_client(client.clone());
                index = index.with_summarizer(Arc::new(summarizer), section.max_concurrency);
            }

            let report = index.sync(files, &SummaryMap::new()).await?;
            let compacted = if no_compact || cancel.is_cancelled() || !report.skipped.is_empty() {
                0
            } else {
                index.compact().await?
            };

            println!(
                "files: {} indexed, {} skipped",
                report.files_indexed,
                report.skipped.len()
            );
            println!(
                "chunks: {} total, {} unchanged, {} embedded, {} stale removed, {} compacted",
                report.chunks, report.unchanged, report.index.indexed, report.stale_removed, compacted
            );
            if config.summarizer.is_some() {
                println!(
                    "summaries: {} requested, {} reused",
                    report.summarized, report.summaries_reused
                );
            }
            for failed in &report.index.failed {
                println!("failed {}: {}", failed.chunk_id, failed.reason);
            }
            if !report.index.cancelled.is_empty() {
                println!("cancelled: {} chunks not indexed", report.index.cancelled.len());
            }
        }
        Command::Query { text, budget } => {
            let assembler = assembler(&config, store, embedder, limiter, cancel);
            let chunks = assembler
                .assemble(&text, config.assembler.budget_unit.budget(budget))
                .await?;
            print!("{}", render_context(&chunks));
        }
        Command::Search { text, k } => {
            let assembler = assembler(&config, store, embedder, limiter, cancel);
            for hit in assembler.search(&text, k).await? {
                println!(
                    "{:.4}  {}  {}  {}",
                    hit.score,
                    hit.chunk.file_path,
                    hit.chunk.kind,
                    hit.chunk.text.lines().next().unwrap_or_default()
                );
            }
        }
        Command::Context { file, line } => {
            let extractor = SymbolExtractor::with_builtin()?;
            let language = extractor
                .registry()
                .language_for_path(&file)
                .with_context(|| format!("no grammar for {}", file.display()))?
                .to_string();
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let path = file.to_string_lossy().replace('\\', "/");
            let repo_map = RepoMap::new();
            repo_map.update(&path, extractor.extract(&path, &text, &language)?);

            let chain = repo_map.enclosing_symbols(&path, line);
            let Some(innermost) = chain.last() else {
                anyhow::bail!("no symbol encloses {path}:{line}");
            };
            for symbol in &chain {
                println!(
                    "{} {} (lines {}-{})",
                    symbol.kind, symbol.name, symbol.line_span.0, symbol.line_span.1
                );
            }
            println!();
            println!("{}", innermost.text);
        }
    }

    Ok(())
}

fn build_embedder(config: &Config, client: &reqwest::Client) -> Arc<dyn Embedder> {
    match &config.embedder.endpoint {
        Some(endpoint) => Arc::new(
            HttpEmbedder::new(endpoint.clone(), config.api_key(), config.model.dimensions)
                .with_client(client.clone()),
        ),
        None => {
            warn!("No embedder.endpoint configured, using the offline mock embedder");
            Arc::new(MockEmbedder::new(config.model.dimensions))
        }
    }
}

fn assembler(
    config: &Config,
    store: VectorStore,
    embedder: Arc<dyn Embedder>,
    limiter: coderag::embedder::limiter::EmbedLimiter,
    cancel: CancellationToken,
) -> ContextAssembler {
    ContextAssembler::new(store, embedder, limiter, config.model.name.clone())
        .with_candidates(config.assembler.candidates)
        .with_backoff(config.backoff())
        .with_cancellation(cancel)
}

/// Walk `dir` (respecting .gitignore) and read every file with a known grammar.
fn collect_files(dir: &Path, extractor: &SymbolExtractor) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();
    let walker = WalkBuilder::new(dir).hidden(false).build();

    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let Some(language) = extractor.registry().language_for_path(path) else {
            continue;
        };

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Skipping {}: {e}", path.display());
                continue;
            }
        };

        // Store paths relative to the root with forward slashes for stable ids.
        let relative = path.strip_prefix(dir).unwrap_or(path);
        let path_str = relative.to_string_lossy().replace('\\', "/");
        files.push(SourceFile::new(path_str, text, language));
    }

    Ok(files)
}
