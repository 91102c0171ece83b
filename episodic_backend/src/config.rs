use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    // Durable log location
    #[serde(default = "default_database_path")]
    pub database_path: String,

    // Working set windows
    #[serde(default = "default_window", alias = "action_capacity")]
    pub action_window: usize,
    #[serde(default = "default_window", alias = "reflection_capacity")]
    pub reflection_window: usize,

    // Prompt-facing query limits
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_blocked_directions_limit")]
    pub blocked_directions_limit: usize,

    // Feedback classification
    #[serde(default = "default_success_marker")]
    pub success_marker: String,
    #[serde(default = "default_failure_marker")]
    pub failure_marker: String,
    #[serde(default = "default_blocked_pattern")]
    pub blocked_pattern: String,
}

fn default_database_path() -> String {
    "episodic_memory.db".to_string()
}

fn default_window() -> usize {
    100
}

fn default_history_limit() -> usize {
    50
}

fn default_blocked_directions_limit() -> usize {
    10
}

fn default_success_marker() -> String {
    "[SUCCESS]".to_string()
}

fn default_failure_marker() -> String {
    "[FAILURE]".to_string()
}

fn default_blocked_pattern() -> String {
    "block".to_string()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            action_window: default_window(),
            reflection_window: default_window(),
            history_limit: default_history_limit(),
            blocked_directions_limit: default_blocked_directions_limit(),
            success_marker: default_success_marker(),
            failure_marker: default_failure_marker(),
            blocked_pattern: default_blocked_pattern(),
        }
    }
}

impl MemoryConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("episodic_config.toml")
    }

    /// Load config from episodic_config.toml (next to executable), falling back to env vars
    pub fn load() -> Self {
        let path = Self::config_path();
        match Self::load_from(&path) {
            Ok(Some(config)) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Ok(None) => {
                tracing::warn!("No config file found, using defaults + env vars");
                Self::from_env()
            }
            Err(e) => {
                tracing::error!("Failed to parse {:?}: {:#}", path, e);
                Self::from_env()
            }
        }
    }

    /// Read a config file. A missing file is `Ok(None)`.
    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config at {:?}", path))
            }
        };
        let config = toml::from_str::<MemoryConfig>(&contents)
            .with_context(|| format!("Invalid config in {:?}", path))?;
        Ok(Some(config.normalized()))
    }

    /// Save config to file (next to executable)
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = env::var("EPISODIC_DB_PATH") {
            if !path.trim().is_empty() {
                config.database_path = path;
            }
        }

        if let Ok(window) = env::var("EPISODIC_ACTION_WINDOW") {
            if let Ok(size) = window.parse() {
                config.action_window = size;
            }
        }

        if let Ok(window) = env::var("EPISODIC_REFLECTION_WINDOW") {
            if let Ok(size) = window.parse() {
                config.reflection_window = size;
            }
        }

        if let Ok(limit) = env::var("EPISODIC_HISTORY_LIMIT") {
            if let Ok(limit) = limit.parse() {
                config.history_limit = limit;
            }
        }

        config.normalized()
    }

    /// Windows and limits of zero would make the working set useless.
    fn normalized(mut self) -> Self {
        self.action_window = self.action_window.max(1);
        self.reflection_window = self.reflection_window.max(1);
        self.history_limit = self.history_limit.max(1);
        self.blocked_directions_limit = self.blocked_directions_limit.max(1);
        self
    }
}
