//! Session lifecycle for the dealer portal client
//!
//! Derives the session from stored credentials, gates it behind a local
//! PIN and decides which screen the user may see.
//!
//! Lifecycle:
//! 1. [`SessionStore::check_status`] derives the session on launch
//! 2. [`RouteGuard`] sends the user to login, PIN setup or PIN verify
//! 3. [`PinGate::set_pin`] completes a pending login; `verify_pin` unlocks
//! 4. Backgrounding and resuming forces a fresh PIN challenge
//! 5. Logout and auth failures end the session through the shared
//!    terminator; the store and guard follow via the event bus

pub mod controller;
pub mod error;
pub mod guard;
pub mod pin;
pub mod state;
pub mod store;

pub use controller::{SessionController, spawn_session_watch};
pub use error::{Error, PinError, Result};
pub use guard::{AppState, GuardAction, GuardEvent, Location, RouteGuard};
pub use pin::{PinCheck, PinEntryMode, PinGate};
pub use state::{CredentialSnapshot, Session, derive_session, pin_expired};
pub use store::SessionStore;
