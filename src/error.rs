//! Error types for the study core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Main error type for the study core
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Import error: {0}")]
    Import(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for CoreError {
    fn from(e: toml::de::Error) -> Self {
        CoreError::Config(e.to_string())
    }
}

impl CoreError {
    /// Expected, common conditions a well-behaved client will hit
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            CoreError::PreconditionFailed(_) | CoreError::Unavailable(_)
        )
    }

    /// Stale client or a real defect
    pub fn is_client_fault(&self) -> bool {
        matches!(self, CoreError::NotFound(_) | CoreError::InvalidState(_))
    }

    /// Severity used when the error is reported at the API boundary
    pub fn log_level(&self) -> log::Level {
        if self.is_expected() {
            log::Level::Debug
        } else if self.is_client_fault() {
            log::Level::Warn
        } else {
            log::Level::Error
        }
    }

    /// Short machine-readable kind, used by the Python bindings
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::InvalidState(_) => "invalid_state",
            CoreError::PreconditionFailed(_) => "precondition_failed",
            CoreError::Unavailable(_) => "unavailable",
            CoreError::Conflict(_) => "conflict",
            CoreError::Database(_) => "database",
            CoreError::Serialization(_) => "serialization",
            CoreError::Io(_) => "io",
            CoreError::Import(_) => "import",
            CoreError::Config(_) => "config",
        }
    }
}
