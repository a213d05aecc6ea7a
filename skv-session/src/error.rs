//! Error types for session store operations.

use skv_client::ClientError;

/// Error type for session store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store was never opened, or has been closed.
    #[error("invalid session connection")]
    ConnectionUnavailable,

    /// Zero-length payloads are indistinguishable from a missing value.
    #[error("empty session data")]
    EmptyData,

    /// A stored value is not valid base64.
    #[error("failed to decode session data: {0}")]
    Decode(#[from] base64::DecodeError),

    /// A setting had the wrong type.
    #[error("invalid session settings: {0}")]
    Settings(String),

    /// Dial, handshake, pool, or command failure from the backend client.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Result type for session store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
