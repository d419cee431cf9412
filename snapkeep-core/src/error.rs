/*!
Error types for the Snapkeep core engine.
*/

use thiserror::Error;

/// Result type used throughout the Snapkeep core.
pub type Result<T> = std::result::Result<T, SnapkeepError>;

/// How a run should react to a reported condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Informational condition logged into the run transcript; processing continues.
    Notice,
    /// Aborts the whole run, including all remaining targets.
    Fatal,
}

/// Errors that can occur while managing snapshots.
#[derive(Error, Debug)]
pub enum SnapkeepError {
    /// I/O errors while reading configuration or delivering the transcript
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON deserialization errors in the configuration file
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// A call against the snapshot repository failed
    #[error("Repository {operation} failed: {message}")]
    Repository {
        operation: &'static str,
        message: String,
    },

    /// The snapshot no longer exists in the repository
    #[error("Snapshot {0} not found")]
    SnapshotNotFound(String),

    /// The run transcript could not be delivered
    #[error("Notification error: {0}")]
    Notify(String),
}

impl SnapkeepError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new repository error for the named operation
    pub fn repository<S: Into<String>>(operation: &'static str, msg: S) -> Self {
        Self::Repository {
            operation,
            message: msg.into(),
        }
    }

    /// Create a new notification error
    pub fn notify<S: Into<String>>(msg: S) -> Self {
        Self::Notify(msg.into())
    }

    /// Classify the error for the run driver.
    ///
    /// Every error, including every repository failure, aborts the run.
    /// Informational conditions are reported as notices through
    /// [`crate::Diagnostic::notice`] and never travel as errors.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Fatal
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// Short stable code used in one-line diagnostics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "E_IO",
            Self::Json(_) => "E_JSON",
            Self::Config(_) => "E_CONFIG",
            Self::Validation(_) => "E_VALIDATION",
            Self::Repository { .. } => "E_REPOSITORY",
            Self::SnapshotNotFound(_) => "E_SNAPSHOT_NOT_FOUND",
            Self::Notify(_) => "E_NOTIFY",
        }
    }
}
