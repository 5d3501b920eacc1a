//! Error types for credential storage and token operations

/// Errors from credential storage, callback parsing and token refresh.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Credential storage unavailable or a read/write failed.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("invalid login callback: {0}")]
    Callback(String),

    /// Refresh endpoint unreachable.
    #[error("network error: {0}")]
    Network(String),

    /// Refresh endpoint answered, but not with a usable token.
    #[error("token refresh rejected: {0}")]
    RefreshRejected(String),

    #[error("no refresh token stored")]
    MissingRefreshToken,
}

impl Error {
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
