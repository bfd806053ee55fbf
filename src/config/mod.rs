//! Configuration management for ptmux.

mod keys;

pub use keys::KeyBindings;

use crate::keys::{Key, parse_key};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Prefix key that enters the prefix table (e.g. "C-b")
    #[serde(default = "default_prefix_key")]
    pub prefix_key: String,

    /// How long a repeat-eligible binding keeps its table active
    #[serde(default = "default_repeat_time")]
    pub repeat_time_ms: u64,

    /// Window for promoting a click to double/triple
    #[serde(default = "default_click_time")]
    pub click_time_ms: u64,

    /// Interval between resize-queue checks
    #[serde(default = "default_resize_interval")]
    pub resize_interval_ms: u64,

    /// Retry interval for redraws deferred behind queued output
    #[serde(default = "default_redraw_retry")]
    pub redraw_retry_ms: u64,

    /// Attach clients read-only by default
    #[serde(default)]
    pub read_only: bool,

    /// Keybindings configuration
    #[serde(default)]
    pub keys: KeyBindings,
}

fn default_prefix_key() -> String {
    "C-b".to_string()
}

const fn default_repeat_time() -> u64 {
    500
}

const fn default_click_time() -> u64 {
    300
}

const fn default_resize_interval() -> u64 {
    50
}

const fn default_redraw_retry() -> u64 {
    50
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix_key: default_prefix_key(),
            repeat_time_ms: default_repeat_time(),
            click_time_ms: default_click_time(),
            resize_interval_ms: default_resize_interval(),
            redraw_retry_ms: default_redraw_retry(),
            read_only: false,
            keys: KeyBindings::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// # Errors
    ///
    /// Returns an error if reading or parsing the config file fails
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        // Ensure any new default keybindings are available
        config.keys.merge_defaults();
        // Fail at load time, not at the first keypress
        config.prefix()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be created or the file
    /// cannot be written
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Get the default configuration file path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ptmux")
            .join("config.json")
    }

    /// Default server socket path
    #[must_use]
    pub fn default_socket_path() -> PathBuf {
        dirs::runtime_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(format!("ptmux-{}.sock", current_uid()))
    }

    /// The parsed prefix key.
    ///
    /// # Errors
    ///
    /// Returns an error when the configured key string does not parse.
    pub fn prefix(&self) -> Result<Key> {
        parse_key(&self.prefix_key)
            .with_context(|| format!("bad prefix key {:?}", self.prefix_key))
    }

    /// Repeat window for repeat-eligible bindings.
    #[must_use]
    pub const fn repeat_time(&self) -> Duration {
        Duration::from_millis(self.repeat_time_ms)
    }

    /// Double/triple click promotion window.
    #[must_use]
    pub const fn click_time(&self) -> Duration {
        Duration::from_millis(self.click_time_ms)
    }

    /// Resize-queue check interval.
    #[must_use]
    pub const fn resize_interval(&self) -> Duration {
        Duration::from_millis(self.resize_interval_ms)
    }

    /// Deferred-redraw retry interval.
    #[must_use]
    pub const fn redraw_retry(&self) -> Duration {
        Duration::from_millis(self.redraw_retry_ms)
    }
}

fn current_uid() -> u32 {
    nix::unistd::Uid::current().as_raw()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyCode as TermCode, KeyModifiers};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() -> Result<()> {
        let config = Config::default();
        assert_eq!(config.prefix_key, "C-b");
        assert_eq!(config.repeat_time(), Duration::from_millis(500));
        assert_eq!(config.click_time(), Duration::from_millis(300));
        assert!(!config.read_only);
        assert_eq!(
            config.prefix()?,
            Key::with_modifiers(TermCode::Char('b'), KeyModifiers::CONTROL)
        );
        Ok(())
    }

    #[test]
    fn test_save_and_load() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.json");

        let config = Config {
            prefix_key: "C-a".to_string(),
            repeat_time_ms: 250,
            read_only: true,
            ..Config::default()
        };

        config.save_to(&config_path)?;
        let loaded = Config::load_from(&config_path)?;

        assert_eq!(config, loaded);
        Ok(())
    }

    #[test]
    fn test_load_nonexistent_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        assert!(Config::load_from(&temp_dir.path().join("nonexistent.json")).is_err());
        Ok(())
    }

    #[test]
    fn test_serde_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let json = r#"{"prefix_key": "C-Space"}"#;
        let config: Config = serde_json::from_str(json)?;

        assert_eq!(config.prefix_key, "C-Space");
        assert_eq!(config.repeat_time_ms, 500);
        assert!(!config.read_only);
        Ok(())
    }

    #[test]
    fn test_bad_prefix_key_fails_at_load() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.json");
        std::fs::write(&config_path, r#"{"prefix_key": "NotAKey"}"#)?;
        assert!(Config::load_from(&config_path).is_err());
        Ok(())
    }

    #[test]
    fn test_default_paths() {
        assert!(
            Config::default_path()
                .to_string_lossy()
                .contains("ptmux")
        );
        assert!(
            Config::default_socket_path()
                .to_string_lossy()
                .contains("ptmux-")
        );
    }
}
