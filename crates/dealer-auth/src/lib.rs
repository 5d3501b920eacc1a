//! Dealer portal authentication library
//!
//! Credential storage, login callback parsing, the token refresh contract
//! and session termination for the dealer equipment portal client. No
//! HTTP client lives here; the API middleware drives refresh through its
//! own transport.
//!
//! Session lifecycle:
//! 1. The login web view posts a `callBackinfo` message ([`callback`])
//! 2. The payload is held as the pending login until a PIN is set
//! 3. PIN setup writes tokens and flags through [`CredentialStore`]
//! 4. The API middleware refreshes the access token on 401 ([`token`])
//! 5. [`SessionTerminator`] wipes credentials and emits on the [`EventBus`]

pub mod callback;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod events;
pub mod logout;
pub mod token;

pub use callback::{BridgeMessage, CallbackInfo, UserProfile};
pub use constants::*;
pub use credentials::{
    CredentialKey, CredentialStore, FileCredentialStore, MemoryCredentialStore, StoreOp, TRUE,
};
pub use error::{Error, Result};
pub use events::{AuthEvent, AuthEventKind, EventBus, Subscription};
pub use logout::{LogoutReport, SessionTerminator};
pub use token::{REFRESH_PATH, REFRESH_QUERY_PARAM, parse_refresh_response};
