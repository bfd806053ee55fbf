//! Key tables and the process-wide binding registry.
//!
//! A [`KeyTable`] is a named, swappable set of key-to-command bindings.
//! Tables are shared between clients through `Arc`: the registry holds one
//! reference, each client holds one for its current table, and the dispatcher
//! pins (clones) a table for the duration of a dispatch so a concurrent
//! unbind or table removal cannot free it mid-command.

use crate::command::Command;
use crate::keys::Key;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the root table; it exists for the lifetime of the process.
pub const ROOT_TABLE: &str = "root";

/// Name of the table entered after the prefix key.
pub const PREFIX_TABLE: &str = "prefix";

/// One bound key: a command list plus dispatch attributes.
#[derive(Debug, Clone)]
pub struct KeyBinding {
    /// Commands executed when the binding fires.
    pub commands: Vec<Command>,
    /// Repeat-eligible: keeps the client in the current table while the
    /// repeat timer runs.
    pub repeat: bool,
    /// Optional annotation shown by `list-keys`.
    pub note: Option<String>,
}

/// A named set of key bindings.
#[derive(Debug)]
pub struct KeyTable {
    name: String,
    bindings: Mutex<HashMap<Key, KeyBinding>>,
}

impl KeyTable {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// The table's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True for the root table.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.name == ROOT_TABLE
    }

    /// Look up a binding by exact key.
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<KeyBinding> {
        self.bindings.lock().get(key).cloned()
    }

    /// Install or replace a binding.
    pub fn bind(&self, key: Key, binding: KeyBinding) {
        self.bindings.lock().insert(key, binding);
    }

    /// Remove a binding; reports whether one existed.
    pub fn unbind(&self, key: &Key) -> bool {
        self.bindings.lock().remove(key).is_some()
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.lock().len()
    }

    /// True when the table holds no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.lock().is_empty()
    }

    /// Snapshot of all bindings, sorted by key display name for stable
    /// listing output.
    #[must_use]
    pub fn entries(&self) -> Vec<(Key, KeyBinding)> {
        let mut entries: Vec<_> = self
            .bindings
            .lock()
            .iter()
            .map(|(key, binding)| (*key, binding.clone()))
            .collect();
        entries.sort_by_key(|(key, _)| key.to_string());
        entries
    }
}

/// The process-wide registry of key tables.
///
/// Constructed at startup and passed by reference into the event loop and
/// dispatch paths; never a singleton. Tables are created lazily on first
/// lookup by name and dropped from the registry once nothing references them,
/// except the root table which is never destroyed.
#[derive(Debug)]
pub struct KeyTables {
    tables: HashMap<String, Arc<KeyTable>>,
}

impl KeyTables {
    /// Create a registry containing only an empty root table.
    #[must_use]
    pub fn new() -> Self {
        let mut tables = HashMap::new();
        tables.insert(
            ROOT_TABLE.to_string(),
            Arc::new(KeyTable::new(ROOT_TABLE)),
        );
        Self { tables }
    }

    /// Fetch a table by name, creating it lazily.
    pub fn get_or_create(&mut self, name: &str) -> Arc<KeyTable> {
        Arc::clone(
            self.tables
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(KeyTable::new(name))),
        )
    }

    /// Fetch a table by name without creating it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<KeyTable>> {
        self.tables.get(name).map(Arc::clone)
    }

    /// The root table.
    ///
    /// # Panics
    ///
    /// Never: the root table is installed at construction and `gc` refuses to
    /// remove it.
    #[must_use]
    pub fn root(&self) -> Arc<KeyTable> {
        self.get(ROOT_TABLE).unwrap_or_else(|| unreachable!("root table always exists"))
    }

    /// Names of all live tables, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop tables nothing refers to any more.
    ///
    /// A table is collected when it holds no bindings and the registry's own
    /// `Arc` is the last reference, meaning no client or in-flight dispatch
    /// still points at it. The root table is never collected.
    pub fn gc(&mut self) {
        self.tables.retain(|name, table| {
            name == ROOT_TABLE || !table.is_empty() || Arc::strong_count(table) > 1
        });
    }
}

impl Default for KeyTables {
    fn default() -> Self {
        Self::new()
    }
}
