//! Structural symbol records produced by the extractor and owned by the repo map.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a structural symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    /// Classes, structs, enums, traits, interfaces and type aliases.
    Class,
    Method,
    Variable,
    Module,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Class => "class",
            SymbolKind::Method => "method",
            SymbolKind::Variable => "variable",
            SymbolKind::Module => "module",
        }
    }

    /// Map a query capture name (`@function`, `@class`, ...) to a kind.
    pub fn from_capture(name: &str) -> Option<Self> {
        match name {
            "function" => Some(SymbolKind::Function),
            "class" => Some(SymbolKind::Class),
            "method" => Some(SymbolKind::Method),
            "variable" => Some(SymbolKind::Variable),
            "module" => Some(SymbolKind::Module),
            _ => None,
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named structural unit of a source file.
///
/// `parent_id` is a weak reference: it names the enclosing symbol in the same
/// file and must be resolved through the [`RepoMap`](super::repo_map::RepoMap).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: String,
    pub file_path: String,
    pub language: String,
    pub kind: SymbolKind,
    pub name: String,
    /// Half-open byte range `[start, end)` into the source text.
    pub byte_span: (usize, usize),
    /// 1-based inclusive line range.
    pub line_span: (usize, usize),
    pub signature_text: String,
    pub leading_comment_text: Option<String>,
    pub parent_id: Option<String>,
    /// Source text covered by `byte_span`.
    pub text: String,
}

impl Symbol {
    /// True when `other` lies inside this symbol and the spans differ.
    pub fn strictly_contains(&self, other: &Symbol) -> bool {
        spans_strictly_contain(self.byte_span, other.byte_span)
    }

    pub fn line_count(&self) -> usize {
        self.line_span.1.saturating_sub(self.line_span.0) + 1
    }
}

pub(crate) fn spans_strictly_contain(outer: (usize, usize), inner: (usize, usize)) -> bool {
    outer.0 <= inner.0 && inner.1 <= outer.1 && outer != inner
}

/// Stable symbol id from file path, qualified name, kind and ordinal.
///
/// The ordinal separates symbols that share all other parts, such as two
/// `impl Foo` blocks in one Rust file.
pub(crate) fn symbol_id(file_path: &str, qualified_name: &str, kind: SymbolKind, ordinal: usize) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(file_path.as_bytes());
    hasher.update(&[0]);
    hasher.update(qualified_name.as_bytes());
    hasher.update(&[0]);
    hasher.update(kind.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(&(ordinal as u64).to_le_bytes());
    short_hex(hasher.finalize())
}

pub(crate) fn short_hex(hash: blake3::Hash) -> String {
    hash.to_hex().as_str()[..32].to_string()
}
