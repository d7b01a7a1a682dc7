//! Engine configuration, persisted as YAML.
//!
//! # Storage layout
//!
//! ```text
//! ~/.tasksheet/
//!   config.yaml     (mode 0600; created by `tasksheet init`)
//!   aliases.yaml    (optional assignee alias table)
//!   queue.json      (staging queue, owned by tasksheet-sync)
//! ```
//!
//! # API pattern
//!
//! Every function touching the filesystem has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::task::DEFAULT_TRACKER_BASE_URL;

pub const ENV_ACCESS_TOKEN: &str = "TASKSHEET_ACCESS_TOKEN";
pub const ENV_SPREADSHEET_ID: &str = "TASKSHEET_SPREADSHEET_ID";

pub const DEFAULT_API_BASE_URL: &str = "https://sheets.googleapis.com";

/// Runtime configuration for the synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Spreadsheet document identifier.
    pub spreadsheet_id: String,
    /// Worksheet (tab) title inside the document.
    pub worksheet: String,
    /// OAuth bearer token; usually supplied through `TASKSHEET_ACCESS_TOKEN`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub api_base_url: String,
    pub tracker_base_url: String,
    /// Alias table path; relative paths resolve against `~/.tasksheet/`.
    pub aliases_path: PathBuf,
    /// Rows after the header skipped when looking for free space.
    pub reserved_rows: usize,
    pub poll_interval_secs: u64,
    pub quota_backoff_secs: u64,
    pub error_backoff_secs: u64,
    pub min_request_interval_ms: u64,
    pub key_cache_ttl_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            worksheet: "Tasks".to_string(),
            access_token: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            tracker_base_url: DEFAULT_TRACKER_BASE_URL.to_string(),
            aliases_path: PathBuf::from("aliases.yaml"),
            reserved_rows: 1,
            poll_interval_secs: 30,
            quota_backoff_secs: 60,
            error_backoff_secs: 30,
            min_request_interval_ms: 1_000,
            key_cache_ttl_secs: 30,
            request_timeout_secs: 60,
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn quota_backoff(&self) -> Duration {
        Duration::from_secs(self.quota_backoff_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn key_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.key_cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Absolute alias table path for a given home.
    pub fn aliases_path_at(&self, home: &Path) -> PathBuf {
        if self.aliases_path.is_absolute() {
            self.aliases_path.clone()
        } else {
            root_at(home).join(&self.aliases_path)
        }
    }

    /// Fail early when the settings needed to reach the sheet are blank.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.spreadsheet_id.trim().is_empty() {
            return Err(CoreError::MissingSetting("spreadsheet_id"));
        }
        if self.worksheet.trim().is_empty() {
            return Err(CoreError::MissingSetting("worksheet"));
        }
        if self.access_token.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(CoreError::MissingSetting("access_token"));
        }
        Ok(())
    }

    /// Overlay `TASKSHEET_*` environment variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(ENV_ACCESS_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.access_token = Some(token);
        }
        if let Some(id) = lookup(ENV_SPREADSHEET_ID).filter(|v| !v.trim().is_empty()) {
            self.spreadsheet_id = id;
        }
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.tasksheet/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".tasksheet")
}

/// `<home>/.tasksheet/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load the configuration file and overlay environment variables.
///
/// Returns [`CoreError::ConfigNotFound`] if absent and [`CoreError::Parse`]
/// (with path context) if malformed.
pub fn load_at(home: &Path) -> Result<Config, CoreError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(CoreError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let mut config: Config =
        serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })?;
    config.apply_env(|name| std::env::var(name).ok());
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, CoreError> {
    load_at(&home()?)
}

/// Atomically save the configuration.
///
/// Write flow: serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<(), CoreError> {
    let root = root_at(home);
    std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// Write a default configuration if none exists; returns what is on disk.
///
/// Idempotent: an existing file is loaded and returned unchanged.
pub fn init_at(
    home: &Path,
    spreadsheet_id: Option<String>,
    worksheet: Option<String>,
) -> Result<Config, CoreError> {
    if config_path_at(home).exists() {
        return load_at(home);
    }
    let mut config = Config::default();
    if let Some(id) = spreadsheet_id {
        config.spreadsheet_id = id;
    }
    if let Some(title) = worksheet {
        config.worksheet = title;
    }
    save_at(home, &config)?;
    Ok(config)
}

/// Home directory from `dirs::home_dir()`.
pub fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_intervals() {
        let config = Config::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.quota_backoff(), Duration::from_secs(60));
        assert_eq!(config.error_backoff(), Duration::from_secs(30));
        assert_eq!(config.min_request_interval(), Duration::from_secs(1));
        assert_eq!(config.key_cache_ttl(), Duration::from_secs(30));
        assert_eq!(config.reserved_rows, 1);
    }

    #[test]
    fn env_overrides_token_and_spreadsheet() {
        let env = HashMap::from([
            (ENV_ACCESS_TOKEN, "tok".to_string()),
            (ENV_SPREADSHEET_ID, "sheet-1".to_string()),
        ]);
        let mut config = Config::default();
        config.apply_env(|name| env.get(name).cloned());
        assert_eq!(config.access_token.as_deref(), Some("tok"));
        assert_eq!(config.spreadsheet_id, "sheet-1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env(|_| Some("  ".to_string()));
        assert!(config.access_token.is_none());
    }

    #[test]
    fn validate_names_missing_setting() {
        let err = Config::default().validate().unwrap_err();
        assert!(matches!(err, CoreError::MissingSetting("spreadsheet_id")));
    }

    #[test]
    fn relative_alias_path_resolves_under_root() {
        let config = Config::default();
        let home = Path::new("/home/u");
        assert_eq!(
            config.aliases_path_at(home),
            PathBuf::from("/home/u/.tasksheet/aliases.yaml")
        );
    }
}
