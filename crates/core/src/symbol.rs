//! Symbols and the per-tree symbol namespace

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A named semantic element (function, class, module, asset)
///
/// `parent == None` hangs the symbol off the implicit root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub parent: Option<String>,
}

impl Symbol {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
        }
    }

    pub fn child(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: Some(parent.into()),
        }
    }
}

#[derive(Debug, Clone)]
struct SymbolEntry {
    symbol: Symbol,
    /// Path of the file that first declared the symbol
    declared_in: String,
    /// Path of the file whose chunk realizes the symbol
    bound_in: Option<String>,
}

/// Name -> symbol index scoped to the construction of one tree
///
/// Names are unique across the whole tree. A file is admitted atomically:
/// either all its declarations and bindings are accepted or none are.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: BTreeMap<String, SymbolEntry>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a file's declarations and chunk bindings
    pub fn admit(
        &mut self,
        path: &str,
        symbols: &[Symbol],
        bound: &[&str],
    ) -> Result<(), ValidationError> {
        let mut declared: BTreeMap<&str, &Symbol> = BTreeMap::new();
        for symbol in symbols {
            if let Some(existing) = declared.get(symbol.name.as_str()) {
                if existing.parent != symbol.parent {
                    return Err(collision(existing, symbol));
                }
                continue;
            }
            if let Some(entry) = self.entries.get(&symbol.name) {
                if entry.symbol.parent != symbol.parent {
                    return Err(collision(&entry.symbol, symbol));
                }
            }
            declared.insert(&symbol.name, symbol);
        }

        let mut seen = HashSet::new();
        for &name in bound {
            if !seen.insert(name) {
                return Err(ValidationError::SymbolRebound { name: name.to_string() });
            }
            if let Some(entry) = self.entries.get(name) {
                if entry.bound_in.is_some() {
                    return Err(ValidationError::SymbolRebound { name: name.to_string() });
                }
            }
        }

        for (name, symbol) in declared {
            self.entries.entry(name.to_string()).or_insert_with(|| SymbolEntry {
                symbol: symbol.clone(),
                declared_in: path.to_string(),
                bound_in: None,
            });
        }
        for &name in bound {
            if let Some(entry) = self.entries.get_mut(name) {
                entry.bound_in = Some(path.to_string());
            }
        }
        Ok(())
    }

    /// Check parent links once every file is admitted
    ///
    /// Returns the declaring file and error for each symbol whose parent is
    /// undeclared or that sits on a parent cycle.
    pub fn unresolved(&self) -> Vec<(String, ValidationError)> {
        let mut problems = Vec::new();
        for (name, entry) in &self.entries {
            let Some(parent) = &entry.symbol.parent else {
                continue;
            };
            if !self.entries.contains_key(parent) {
                problems.push((
                    entry.declared_in.clone(),
                    ValidationError::UnknownSymbolParent {
                        name: name.clone(),
                        parent: parent.clone(),
                    },
                ));
            } else if self.on_cycle(name) {
                problems.push((
                    entry.declared_in.clone(),
                    ValidationError::SymbolCycle { name: name.clone() },
                ));
            }
        }
        problems
    }

    fn on_cycle(&self, start: &str) -> bool {
        let mut visited = HashSet::new();
        let mut current = start;
        while let Some(parent) = self
            .entries
            .get(current)
            .and_then(|entry| entry.symbol.parent.as_deref())
        {
            if parent == start {
                return true;
            }
            if !visited.insert(parent) {
                return false;
            }
            current = parent;
        }
        false
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.entries.get(name).map(|entry| &entry.symbol)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Symbols in name order
    pub fn into_symbols(self) -> Vec<Symbol> {
        self.entries.into_values().map(|entry| entry.symbol).collect()
    }
}

fn collision(existing: &Symbol, incoming: &Symbol) -> ValidationError {
    ValidationError::SymbolCollision {
        name: incoming.name.clone(),
        existing: existing.parent.clone(),
        parent: incoming.parent.clone(),
    }
}
