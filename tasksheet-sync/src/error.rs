//! Error types for tasksheet-sync.

use std::path::PathBuf;

use thiserror::Error;

use tasksheet_core::CoreError;

/// Failures talking to the spreadsheet backend.
///
/// Classification drives the retry policy ([`SheetError::is_retryable`]),
/// session invalidation ([`SheetError::invalidates_session`]) and the
/// worker's cool-down choice ([`SheetError::is_quota`]).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SheetError {
    /// The API refused the call for quota or rate-limit reasons.
    #[error("quota exceeded (HTTP {status}): {message}")]
    Quota { status: u16, message: String },

    /// Server-side failure that may succeed on retry (5xx).
    #[error("transient API failure (HTTP {status}): {message}")]
    Transient { status: u16, message: String },

    /// The API rejected the request; retrying will not help.
    #[error("API rejected request (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Network-level failure before an HTTP status was received.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The request did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The configured worksheet does not exist in the spreadsheet.
    #[error("worksheet '{0}' not found in spreadsheet")]
    WorksheetNotFound(String),

    /// The header row could not be turned into a column mapping.
    #[error("header row unusable: {0}")]
    Header(String),

    /// The API answered with a body we could not interpret.
    #[error("malformed API response: {0}")]
    Decode(String),
}

impl SheetError {
    /// Whether the retry policy should try the call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Quota { .. } | Self::Transient { .. } | Self::Connection(_) | Self::Timeout(_)
        )
    }

    /// Quota errors get a longer cool-down in the worker loop.
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Quota { .. })
    }

    /// API-classified failures drop the held session so the next call
    /// reconnects and re-reads the header.
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            Self::Quota { .. }
                | Self::Transient { .. }
                | Self::Api { .. }
                | Self::Connection(_)
                | Self::Timeout(_)
        )
    }

    /// Short error code for structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Quota { .. } => "quota",
            Self::Transient { .. } => "transient",
            Self::Api { .. } => "api",
            Self::Connection(_) => "connection",
            Self::Timeout(_) => "timeout",
            Self::WorksheetNotFound(_) => "worksheet_not_found",
            Self::Header(_) => "header",
            Self::Decode(_) => "decode",
        }
    }
}

impl From<CoreError> for SheetError {
    fn from(err: CoreError) -> Self {
        SheetError::Header(err.to_string())
    }
}

/// All errors that can arise from queueing and sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The spreadsheet backend failed.
    #[error("sheet error: {0}")]
    Sheet(#[from] SheetError),

    /// Configuration or payload error from the core crate.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Queue file JSON serialization/deserialization error.
    #[error("queue JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Queue entries must be keyed by a non-empty task key.
    #[error("queue key must not be empty")]
    EmptyKey,
}

impl SyncError {
    /// Quota exhaustion anywhere in the chain.
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Sheet(err) if err.is_quota())
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
