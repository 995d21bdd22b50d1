//! Error types for the fleet gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the fleet gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Device identity failed validation
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// Another live session already holds this identity
    #[error("identity already in use: {0}")]
    IdentityInUse(String),

    /// Agent message could not be parsed
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Registry snapshot could not be loaded or saved
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Transport send failed or the connection is gone
    #[error("transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Wire code sent to an agent before its connection is closed
    ///
    /// Only registration rejections have one; everything else is
    /// handled server-side.
    #[must_use]
    pub const fn wire_code(&self) -> Option<&'static str> {
        match self {
            Self::InvalidIdentity(_) => Some("invalid_username"),
            Self::IdentityInUse(_) => Some("username_taken"),
            _ => None,
        }
    }
}
