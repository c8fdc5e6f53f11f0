//! # coderag: symbol-aware code retrieval
//!
//! Indexes a source repository for semantic retrieval: extracts structural
//! symbols with tree-sitter, embeds code, docstring and summary chunks, and
//! packs the most relevant chunks into a bounded context window.
//!
//! ## Architecture
//!
//! - **[`indexer`]**: Symbol extraction, repository map, chunking, batched embedding
//! - **[`db`]**: SQLite + sqlite-vec vector store (upsert, delete, cosine query)
//! - **[`embedder`]**: Embedding providers, shared rate limiter, retry policy
//! - **[`assembler`]**: Query, dedupe and budget packing of retrieved chunks
//! - **[`config`]**: Configuration loading and validation

pub mod assembler;
pub mod config;
pub mod db;
pub mod embedder;
pub mod indexer;

#[cfg(test)]
mod test_support;
