use thiserror::Error;

/// Top-level error type for Zapdesk.
#[derive(Debug, Error)]
pub enum ZapdeskError {
    /// Error from the underlying chat-client adapter.
    #[error("adapter error: {0}")]
    Adapter(String),

    /// Error in session lifecycle handling.
    #[error("session error: {0}")]
    Session(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
