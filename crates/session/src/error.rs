//! Error types for session operations

/// Errors from session state checks and mutations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential store error: {0}")]
    Credential(#[from] dealer_auth::Error),
}

/// Errors from PIN setup and verification.
///
/// A wrong PIN is not an error; see [`PinCheck`](crate::pin::PinCheck).
#[derive(Debug, thiserror::Error)]
pub enum PinError {
    #[error("PIN storage error: {0}")]
    Storage(#[from] dealer_auth::Error),

    #[error("no PIN has been set")]
    NotSet,

    /// A PIN is stored; it must be reset before a new one can be set.
    #[error("a PIN is already set")]
    AlreadySet,

    #[error("PIN must be exactly {0} digits")]
    InvalidFormat(usize),

    /// Pending login could not be turned into a session.
    #[error("login finalization failed: {0}")]
    LoginFinalization(String),
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
