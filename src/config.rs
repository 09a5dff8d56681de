//! Shell configuration
//!
//! Loaded from camelCase JSON; every field has a default so an empty
//! object (or no file at all) yields a working shell.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {field} {reason}")]
    Invalid { field: &'static str, reason: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShellConfig {
    pub hostname: String,
    pub default_user: String,
    /// Entries kept per user
    pub history_limit: usize,
    /// Loop iterations between voluntary yields
    pub yield_interval: usize,
    /// Nested script invocations allowed
    pub max_script_depth: usize,
    pub max_symlink_depth: usize,
    pub storage_prefix: String,
    /// Save after each foreground line when something changed
    pub autosave: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            hostname: "websh".to_string(),
            default_user: "Guest".to_string(),
            history_limit: 100,
            yield_interval: 1000,
            max_script_depth: 16,
            max_symlink_depth: crate::vfs::MAX_SYMLINK_DEPTH,
            storage_prefix: "websh".to_string(),
            autosave: true,
        }
    }
}

impl ShellConfig {
    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: ShellConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "historyLimit",
                reason: "must be positive",
            });
        }
        if self.yield_interval == 0 {
            return Err(ConfigError::Invalid {
                field: "yieldInterval",
                reason: "must be positive",
            });
        }
        if self.default_user.is_empty() {
            return Err(ConfigError::Invalid {
                field: "defaultUser",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}
