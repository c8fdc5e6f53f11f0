//! Write path: symbol extraction, repository map, chunking and embedding.

pub mod chunks;
pub mod code_parser;
pub mod core;
pub mod languages;
pub mod openai;
pub mod repo_map;
pub mod summaries;
pub mod symbols;
pub mod vectors;
