//! Key-binding configuration.

use crate::bindings::{KeyBinding, KeyTables, PREFIX_TABLE, ROOT_TABLE};
use crate::command::parse_command_line;
use crate::keys::parse_key;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Key bindings as configured: table name to key string to command line.
///
/// A command line may start with `-r ` to mark the binding repeat-eligible.
/// User entries are merged over the built-in root/prefix sets, user wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    /// Map of table name to key-string/command-line pairs.
    tables: HashMap<String, HashMap<String, String>>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        let mut root = HashMap::new();
        root.insert("WheelUpStatus".to_string(), "refresh-client".to_string());
        root.insert(
            "MouseDown1Pane".to_string(),
            "select-pane -t 0".to_string(),
        );

        let mut prefix = HashMap::new();
        prefix.insert("d".to_string(), "detach-client".to_string());
        prefix.insert("r".to_string(), "refresh-client".to_string());
        prefix.insert("C-b".to_string(), "send-prefix".to_string());
        prefix.insert("?".to_string(), "list-keys".to_string());
        prefix.insert("o".to_string(), "select-pane -t 0".to_string());
        prefix.insert("Up".to_string(), "-r resize-pane 80 20".to_string());
        prefix.insert("Down".to_string(), "-r resize-pane 80 28".to_string());

        let mut tables = HashMap::new();
        tables.insert(ROOT_TABLE.to_string(), root);
        tables.insert(PREFIX_TABLE.to_string(), prefix);
        Self { tables }
    }
}

impl KeyBindings {
    /// Merge in any missing built-in bindings; existing entries win.
    pub fn merge_defaults(&mut self) {
        for (table, bindings) in Self::default().tables {
            let entry = self.tables.entry(table).or_default();
            for (key, line) in bindings {
                entry.entry(key).or_insert(line);
            }
        }
    }

    /// Install every configured binding into the registry.
    ///
    /// # Errors
    ///
    /// Returns an error when a key string or command line fails to parse.
    pub fn install(&self, tables: &mut KeyTables) -> Result<()> {
        for (table_name, bindings) in &self.tables {
            let table = tables.get_or_create(table_name);
            for (key_spec, line) in bindings {
                let (repeat, line) = match line.strip_prefix("-r ") {
                    Some(rest) => (true, rest),
                    None => (false, line.as_str()),
                };
                let key = parse_key(key_spec)
                    .with_context(|| format!("bad key {key_spec:?} in table {table_name:?}"))?;
                let commands = parse_command_line(line)
                    .with_context(|| format!("bad binding for {key_spec:?}: {line:?}"))?;
                table.bind(
                    key,
                    KeyBinding {
                        commands,
                        repeat,
                        note: None,
                    },
                );
            }
        }
        Ok(())
    }

    /// Add or replace a configured binding.
    pub fn set(&mut self, table: &str, key: &str, line: &str) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), line.to_string());
    }
}
