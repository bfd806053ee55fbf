//! Key-table dispatch.
//!
//! Each client resolves keys against a current table. The prefix key always
//! switches into the prefix table; a resolved binding is executed with its
//! table pinned; unresolved keys fall back to the root table at most once
//! per event, then forward to the focused pane (or drop for read-only
//! clients).

use crate::bindings::{KeyBinding, KeyTable, KeyTables, PREFIX_TABLE};
use crate::keys::Key;
use std::sync::Arc;
use tracing::debug;

/// How a key resolved.
#[derive(Debug)]
pub enum Resolution {
    /// A binding matched. The table reference pins the table for the
    /// duration of command execution.
    Command {
        /// Pinned table the binding came from.
        table: Arc<KeyTable>,
        /// The matched binding.
        binding: KeyBinding,
    },
    /// The key was consumed by a table switch (prefix key).
    Consumed,
    /// No binding anywhere: forward to the focused pane.
    Forward,
    /// No binding and the client is read-only: discard.
    Drop,
}

/// Per-client dispatch state.
#[derive(Debug)]
pub struct DispatchState {
    current: Arc<KeyTable>,
    /// True while the repeat timer runs for a repeat-eligible binding.
    repeat_armed: bool,
}

impl DispatchState {
    /// New state, resting in the root table.
    #[must_use]
    pub fn new(tables: &KeyTables) -> Self {
        Self {
            current: tables.root(),
            repeat_armed: false,
        }
    }

    /// Name of the client's current table.
    #[must_use]
    pub fn table_name(&self) -> &str {
        self.current.name()
    }

    /// True while a repeat window is open.
    #[must_use]
    pub const fn repeating(&self) -> bool {
        self.repeat_armed
    }

    /// Switch to a named table, creating it lazily. Cancels any repeat
    /// window.
    pub fn switch_table(&mut self, tables: &mut KeyTables, name: &str) {
        debug!(from = self.current.name(), to = name, "table switch");
        self.current = tables.get_or_create(name);
        self.repeat_armed = false;
    }

    /// Return to the root table (repeat expiry, detach, post-dispatch).
    pub fn reset(&mut self, tables: &KeyTables) {
        self.current = tables.root();
        self.repeat_armed = false;
    }

    /// The repeat timer fired: back to root.
    pub fn repeat_timeout(&mut self, tables: &KeyTables) {
        if self.repeat_armed {
            debug!("repeat window closed");
            self.reset(tables);
        }
    }

    /// Resolve one key.
    ///
    /// `mode_table` is the focused pane's mode table when it declares one;
    /// it is searched instead of the client's current table. The returned
    /// [`Resolution::Command`] pins the matched table; the caller applies
    /// [`DispatchState::after_match`] before running the command list.
    pub fn resolve(
        &mut self,
        tables: &mut KeyTables,
        key: &Key,
        prefix: &Key,
        mode_table: Option<&Arc<KeyTable>>,
        read_only: bool,
    ) -> Resolution {
        // The prefix key pre-empts resolution unless already in the prefix
        // table.
        if key == prefix && self.current.name() != PREFIX_TABLE {
            self.switch_table(tables, PREFIX_TABLE);
            return Resolution::Consumed;
        }

        let searched = mode_table.unwrap_or(&self.current);
        let searched = Arc::clone(searched);
        if let Some(binding) = lookup(&searched, key) {
            return Resolution::Command {
                table: searched,
                binding,
            };
        }

        // One root retry for non-root tables and open repeat windows.
        if !searched.is_root() || self.repeat_armed {
            self.reset(tables);
            let root = tables.root();
            if let Some(binding) = lookup(&root, key) {
                return Resolution::Command {
                    table: root,
                    binding,
                };
            }
        } else {
            self.reset(tables);
        }

        if read_only {
            debug!(key = %key, "unresolved key dropped, client is read-only");
            Resolution::Drop
        } else {
            Resolution::Forward
        }
    }

    /// Settle the table for a matched binding before its command list runs:
    /// a repeat-eligible match holds the current table open (the caller arms
    /// the repeat timer); anything else returns the client to root. Running
    /// this first lets a bound table switch land after the reset and
    /// persist.
    pub fn after_match(&mut self, tables: &KeyTables, repeat: bool) {
        if repeat {
            self.repeat_armed = true;
        } else {
            self.reset(tables);
        }
    }
}

/// Exact match first, then the table's wildcard entry.
fn lookup(table: &KeyTable, key: &Key) -> Option<KeyBinding> {
    table.get(key).or_else(|| table.get(&Key::any()))
}
