//! Derives searchable chunks (code, docstring, summary) from symbols.

use super::symbols::{Symbol, short_hex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Precomputed summaries keyed by symbol id.
pub type SummaryMap = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Code,
    Docstring,
    Summary,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Code => "code",
            ChunkKind::Docstring => "docstring",
            ChunkKind::Summary => "summary",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(ChunkKind::Code),
            "docstring" => Ok(ChunkKind::Docstring),
            "summary" => Ok(ChunkKind::Summary),
            other => Err(format!("unknown chunk kind: {other}")),
        }
    }
}

/// A unit of text eligible for embedding and retrieval.
///
/// `source_symbol_id` is weak: the symbol may be gone from the repo map
/// until the next compaction removes the chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source_symbol_id: String,
    pub file_path: String,
    pub kind: ChunkKind,
    pub text: String,
    pub token_count_estimate: usize,
}

impl Chunk {
    pub fn new(symbol: &Symbol, kind: ChunkKind, text: String) -> Self {
        Self {
            id: chunk_id(&symbol.id, kind),
            source_symbol_id: symbol.id.clone(),
            file_path: symbol.file_path.clone(),
            kind,
            token_count_estimate: estimate_tokens(&text),
            text,
        }
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Deterministic chunk id from the owning symbol id and chunk kind.
pub fn chunk_id(symbol_id: &str, kind: ChunkKind) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(symbol_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(kind.as_str().as_bytes());
    short_hex(hasher.finalize())
}

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Builds chunks from symbols. Never calls a summarizer.
#[derive(Debug, Clone)]
pub struct ChunkBuilder {
    max_code_chars: usize,
}

impl ChunkBuilder {
    pub fn new(max_code_chars: usize) -> Self {
        Self { max_code_chars }
    }

    /// Chunks for one symbol: always code, then docstring and summary when present.
    pub fn build(&self, symbol: &Symbol, summary: Option<&str>) -> Vec<Chunk> {
        let mut chunks = Vec::with_capacity(3);

        let body = if symbol.text.trim().is_empty() {
            symbol.signature_text.as_str()
        } else {
            symbol.text.as_str()
        };
        let code = truncate_at_line(body, self.max_code_chars);
        if !code.trim().is_empty() {
            chunks.push(Chunk::new(symbol, ChunkKind::Code, code));
        }

        if let Some(doc) = non_blank(symbol.leading_comment_text.as_deref()) {
            chunks.push(Chunk::new(symbol, ChunkKind::Docstring, doc.to_string()));
        }

        if let Some(summary) = non_blank(summary) {
            chunks.push(Chunk::new(symbol, ChunkKind::Summary, summary.to_string()));
        }

        chunks
    }

    /// Chunks for many symbols, taking summaries from `summaries` by symbol id.
    pub fn build_all(&self, symbols: &[Symbol], summaries: &SummaryMap) -> Vec<Chunk> {
        symbols
            .iter()
            .flat_map(|s| self.build(s, summaries.get(&s.id).map(String::as_str)))
            .collect()
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}

/// Truncate to at most `max_chars` characters, cutting only at line ends.
///
/// The first line is always kept whole, even when it alone exceeds the limit.
fn truncate_at_line(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut out = String::new();
    let mut used = 0;
    for (i, line) in text.lines().enumerate() {
        let cost = line.chars().count() + usize::from(i > 0);
        if i > 0 && used + cost > max_chars {
            break;
        }
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line);
        used += cost;
    }
    out
}
