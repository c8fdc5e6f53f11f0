//! Process-wide map of file path → ordered symbol table.
//!
//! Readers always observe a whole file's symbols from a single update. Writes
//! to the same path are serialised through a per-file slot so that a later
//! `update` or `remove` call can never be overtaken by an earlier one; writes
//! to different files proceed independently.

use super::symbols::Symbol;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

type SymbolTable = Arc<Vec<Symbol>>;

#[derive(Default)]
struct SlotState {
    symbols: Option<SymbolTable>,
    /// Set once the slot is unlinked from the map; writers must fetch a new one.
    detached: bool,
}

#[derive(Default)]
struct FileSlot {
    state: Mutex<SlotState>,
}

/// Concurrent file path → symbols map.
#[derive(Default)]
pub struct RepoMap {
    files: RwLock<HashMap<String, Arc<FileSlot>>>,
}

impl RepoMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, file_path: &str) -> Arc<FileSlot> {
        if let Some(slot) = self.read_files().get(file_path) {
            return Arc::clone(slot);
        }
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(files.entry(file_path.to_string()).or_default())
    }

    fn read_files(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<FileSlot>>> {
        self.files.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock(slot: &FileSlot) -> std::sync::MutexGuard<'_, SlotState> {
        slot.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(slot: &FileSlot) -> Option<SymbolTable> {
        Self::lock(slot).symbols.clone()
    }

    /// Atomically replace all symbols for `file_path`.
    pub fn update(&self, file_path: &str, symbols: Vec<Symbol>) {
        let table = Arc::new(symbols);
        loop {
            let slot = self.slot(file_path);
            let mut state = Self::lock(&slot);
            if !state.detached {
                state.symbols = Some(table);
                return;
            }
        }
    }

    /// Drop `file_path` and its symbols. Removing an unknown path is a no-op.
    pub fn remove(&self, file_path: &str) {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = files.remove(file_path) {
            let mut state = Self::lock(&slot);
            state.symbols = None;
            state.detached = true;
        }
    }

    /// Symbols for `file_path` in source order, or empty if unknown.
    pub fn lookup(&self, file_path: &str) -> Vec<Symbol> {
        self.lookup_shared(file_path)
            .map(|table| table.as_ref().clone())
            .unwrap_or_default()
    }

    /// Shared handle to the current symbol table, without copying it.
    pub fn lookup_shared(&self, file_path: &str) -> Option<SymbolTable> {
        let slot = self.read_files().get(file_path).map(Arc::clone)?;
        Self::snapshot(&slot)
    }

    /// Resolve a symbol id, such as a `parent_id`, within one file.
    pub fn resolve(&self, file_path: &str, symbol_id: &str) -> Option<Symbol> {
        self.lookup_shared(file_path)?
            .iter()
            .find(|s| s.id == symbol_id)
            .cloned()
    }

    /// Innermost symbol of `file_path` whose line span contains `line` (1-based).
    pub fn symbol_at(&self, file_path: &str, line: usize) -> Option<Symbol> {
        self.lookup_shared(file_path)?
            .iter()
            .filter(|s| s.line_span.0 <= line && line <= s.line_span.1)
            .min_by_key(|s| s.byte_span.1 - s.byte_span.0)
            .cloned()
    }

    /// Symbols enclosing `line`, outermost first, following parent links
    /// up from [`symbol_at`](Self::symbol_at).
    pub fn enclosing_symbols(&self, file_path: &str, line: usize) -> Vec<Symbol> {
        let Some(table) = self.lookup_shared(file_path) else {
            return Vec::new();
        };
        let Some(innermost) = self.symbol_at(file_path, line) else {
            return Vec::new();
        };
        let mut chain = vec![innermost];
        while let Some(parent_id) = chain.last().and_then(|s| s.parent_id.clone()) {
            match table.iter().find(|s| s.id == parent_id) {
                Some(parent) => chain.push(parent.clone()),
                None => break,
            }
        }
        chain.reverse();
        chain
    }

    /// Every file with its symbols, ordered by path.
    pub fn all(&self) -> Vec<(String, Vec<Symbol>)> {
        self.files()
            .into_iter()
            .filter_map(|path| {
                let table = self.lookup_shared(&path)?;
                Some((path, table.as_ref().clone()))
            })
            .collect()
    }

    /// All symbols named `name` across the repository, ordered by path.
    pub fn find_by_name(&self, name: &str) -> Vec<Symbol> {
        let mut found = Vec::new();
        for path in self.files() {
            if let Some(table) = self.lookup_shared(&path) {
                found.extend(table.iter().filter(|s| s.name == name).cloned());
            }
        }
        found
    }

    /// Paths that currently hold symbols, sorted.
    ///
    /// A path whose first `update` is still in flight is left out.
    pub fn files(&self) -> Vec<String> {
        let slots: Vec<(String, Arc<FileSlot>)> = self
            .read_files()
            .iter()
            .map(|(path, slot)| (path.clone(), Arc::clone(slot)))
            .collect();
        let mut paths: Vec<String> = slots
            .into_iter()
            .filter(|(_, slot)| Self::snapshot(slot).is_some())
            .map(|(path, _)| path)
            .collect();
        paths.sort();
        paths
    }

    /// Ids of every live symbol.
    pub fn symbol_ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        for path in self.files() {
            if let Some(table) = self.lookup_shared(&path) {
                ids.extend(table.iter().map(|s| s.id.clone()));
            }
        }
        ids
    }

    /// Number of files currently tracked.
    pub fn len(&self) -> usize {
        self.files().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
