use thiserror::Error;

/// Main error type for the session layer
#[derive(Error, Debug)]
pub enum SessionError {
    // Usage errors
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    // Runtime boundary errors (passed through untouched)
    #[error("Runtime error during {operation}: {reason}")]
    Runtime { operation: String, reason: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration template error: {0}")]
    Template(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Lock purge pattern errors
    #[error("Invalid lock file pattern: {0}")]
    Pattern(#[from] globset::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SessionError {
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        SessionError::InvalidOperation(message.into())
    }

    pub fn runtime(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        SessionError::Runtime {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error reports role or lifecycle misuse by the caller
    pub fn is_invalid_operation(&self) -> bool {
        matches!(self, SessionError::InvalidOperation(_))
    }
}

/// Result type alias for SessionError
pub type Result<T> = std::result::Result<T, SessionError>;
