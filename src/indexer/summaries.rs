//! Optional LLM summaries for symbols, fed to the chunk builder as precomputed text.

use super::chunks::SummaryMap;
use super::symbols::Symbol;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM provider unavailable: {0}")]
    Unavailable(String),

    #[error("LLM provider rate limited the request")]
    RateLimited,

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("{0}")]
    Other(String),
}

/// Request/response contract of the summarization collaborator.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `symbol_text`; `context` names where the symbol lives.
    async fn summarize(&self, symbol_text: &str, context: &str) -> Result<String, LlmError>;
}

/// Short location line passed to the summarizer alongside the symbol text.
pub fn symbol_context(symbol: &Symbol) -> String {
    format!(
        "{} {} `{}` in {} (lines {}-{})",
        symbol.language, symbol.kind, symbol.name, symbol.file_path, symbol.line_span.0, symbol.line_span.1
    )
}

/// Summarize `symbols` with at most `max_concurrency` calls in flight.
///
/// Failures are logged and leave the symbol without a summary.
pub async fn collect_summaries(
    summarizer: Arc<dyn Summarizer>,
    symbols: &[Symbol],
    max_concurrency: usize,
) -> SummaryMap {
    let permits = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for symbol in symbols {
        let summarizer = Arc::clone(&summarizer);
        let permits = Arc::clone(&permits);
        let id = symbol.id.clone();
        let text = symbol.text.clone();
        let context = symbol_context(symbol);
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let result = summarizer.summarize(&text, &context).await;
            (id, context, result)
        });
    }

    let mut summaries = SummaryMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((id, _, Ok(summary))) if !summary.trim().is_empty() => {
                summaries.insert(id, summary.trim().to_string());
            }
            Ok((_, context, Ok(_))) => debug!("empty summary for {context}"),
            Ok((_, context, Err(e))) => warn!("summarization failed for {context}: {e}"),
            Err(e) => warn!("summarization task panicked: {e}"),
        }
    }
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::symbols::SymbolKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Echo {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Summarizer for Echo {
        async fn summarize(&self, symbol_text: &str, _context: &str) -> Result<String, LlmError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if symbol_text.contains("fail") {
                Err(LlmError::Unavailable("offline".into()))
            } else {
                Ok(format!("summary of {symbol_text}"))
            }
        }
    }

    fn symbol(id: &str, text: &str) -> Symbol {
        Symbol {
            id: id.to_string(),
            file_path: "a.py".to_string(),
            language: "python".to_string(),
            kind: SymbolKind::Function,
            name: id.to_string(),
            byte_span: (0, text.len()),
            line_span: (1, 1),
            signature_text: text.to_string(),
            leading_comment_text: None,
            parent_id: None,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_collect_summaries_skips_failures() {
        let echo = Arc::new(Echo {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let symbols: Vec<Symbol> = (0..6)
            .map(|i| symbol(&format!("s{i}"), if i == 3 { "fail" } else { "ok" }))
            .collect();
        let summaries = collect_summaries(echo.clone(), &symbols, 2).await;
        assert_eq!(summaries.len(), 5);
        assert!(!summaries.contains_key("s3"));
        assert_eq!(summaries["s0"], "summary of ok");
        assert!(echo.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_symbol_context() {
        let ctx = symbol_context(&symbol("foo", "def foo(): pass"));
        assert_eq!(ctx, "python function `foo` in a.py (lines 1-1)");
    }
}
