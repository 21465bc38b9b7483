//! Engine configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.flowsync/
//!   config.yaml
//! ```
//!
//! Like the rest of the workspace, every loader has two forms: `load_at(home)`
//! with an explicit home (tests) and `load()` deriving it from
//! `dirs::home_dir()`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_state_file() -> String {
    ".flowsync-state.json".to_string()
}

fn default_archive_dir() -> String {
    ".archive".to_string()
}

fn default_backup_dir() -> String {
    ".backups".to_string()
}

/// Everything one engine instance needs to know about its sync directory
/// and remote scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding one JSON file per workflow.
    pub sync_dir: PathBuf,
    /// Remote project scope passed to every listing call.
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Rename-detection window for deletions.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Only mirror workflows flagged active on the remote.
    #[serde(default)]
    pub active_only: bool,
    /// Only mirror workflows carrying at least one of these tags. Empty = all.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Baseline file, relative to `sync_dir`.
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// Discard directory for `archive`, relative to `sync_dir`.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: String,
    /// Pre-deletion remote snapshots, relative to `sync_dir`.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,
}

impl EngineConfig {
    /// Config with defaults for everything except the directory.
    pub fn new(sync_dir: impl Into<PathBuf>) -> Self {
        Self {
            sync_dir: sync_dir.into(),
            project_id: None,
            poll_interval_secs: default_poll_interval_secs(),
            debounce_ms: default_debounce_ms(),
            active_only: false,
            tags: Vec::new(),
            state_file: default_state_file(),
            archive_dir: default_archive_dir(),
            backup_dir: default_backup_dir(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn state_path(&self) -> PathBuf {
        self.sync_dir.join(&self.state_file)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.sync_dir.join(&self.archive_dir)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.sync_dir.join(&self.backup_dir)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        for (field, value) in [
            ("state_file", &self.state_file),
            ("archive_dir", &self.archive_dir),
            ("backup_dir", &self.backup_dir),
        ] {
            if value.is_empty() || value.contains('/') || value.contains('\\') {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be a plain name inside sync_dir, got '{value}'"
                )));
            }
        }
        Ok(())
    }
}

/// `<home>/.flowsync/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".flowsync").join("config.yaml")
}

/// Load and validate `<home>/.flowsync/config.yaml`.
///
/// Returns `ConfigError::NotFound` if absent, `ConfigError::Parse` (with the
/// path) if malformed.
pub fn load_at(home: &Path) -> Result<EngineConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::NotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    let config: EngineConfig =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<EngineConfig, ConfigError> {
    load_at(&home()?)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(home: &Path, yaml: &str) {
        let path = config_path_at(home);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, yaml).expect("write");
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let home = TempDir::new().unwrap();
        write_config(home.path(), "sync_dir: /tmp/workflows\n");

        let config = load_at(home.path()).unwrap();
        assert_eq!(config, EngineConfig::new("/tmp/workflows"));
        assert_eq!(config.debounce_window(), Duration::from_secs(1));
        assert_eq!(
            config.state_path(),
            PathBuf::from("/tmp/workflows/.flowsync-state.json")
        );
    }

    #[test]
    fn missing_config_is_not_found() {
        let home = TempDir::new().unwrap();
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    }

    #[test]
    fn malformed_config_names_the_file() {
        let home = TempDir::new().unwrap();
        write_config(home.path(), "sync_dir: [unclosed\n");
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn zero_poll_interval_is_invalid() {
        let home = TempDir::new().unwrap();
        write_config(home.path(), "sync_dir: /tmp/w\npoll_interval_secs: 0\n");
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn nested_special_dirs_are_invalid() {
        let mut config = EngineConfig::new("/tmp/w");
        config.backup_dir = "a/b".to_string();
        assert!(config.validate().is_err());
    }
}
