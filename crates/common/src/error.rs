//! Error types for jobkit.

use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Boxed error returned by job callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Redis error: {0}")]
    Redis(String),

    /// Worker tasks did not finish cleanly.
    #[error("Queue error: {0}")]
    Queue(String),

    /// A lifecycle operation was called in the wrong state.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),
}

impl AppError {
    /// Returns a stable error code for logs.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::Lifecycle(_) => "LIFECYCLE_ERROR",
        }
    }

    /// Returns whether the failure came from an external collaborator
    /// rather than from misuse of the API.
    #[must_use]
    pub const fn is_external(&self) -> bool {
        matches!(self, Self::Redis(_))
    }
}

// === From implementations ===

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<fred::error::Error> for AppError {
    fn from(err: fred::error::Error) -> Self {
        Self::Redis(err.to_string())
    }
}
