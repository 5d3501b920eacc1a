//! Shared types for the dealer portal client workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{Secret, fingerprint};
