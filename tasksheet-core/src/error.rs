//! Error types for tasksheet-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from configuration, header mapping and task
/// payload handling.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file path.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`, so `~/.tasksheet/` cannot be located.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The configuration file did not exist at the expected path.
    #[error("config not found at {path}; run `tasksheet init` first")]
    ConfigNotFound { path: PathBuf },

    /// A required configuration value is missing or blank.
    #[error("config value `{0}` is not set")]
    MissingSetting(&'static str),

    /// The sheet header row is empty or could not be read.
    #[error("header row is empty; refusing to map columns")]
    EmptyHeader,

    /// A queued payload could not be turned into a task record.
    #[error("invalid task payload: {0}")]
    InvalidPayload(String),
}

/// Convenience constructor for [`CoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
