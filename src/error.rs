//! Error types for the chime engine.

/// Top-level error type for the task scheduling engine.
#[derive(Debug, thiserror::Error)]
pub enum ChimeError {
    /// Task store read/write/parse error.
    #[error("store error: {0}")]
    Store(String),

    /// Expiry engine state error.
    #[error("engine error: {0}")]
    Engine(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ChimeError>;
