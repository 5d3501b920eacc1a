//! Session state derivation
//!
//! The session is never stored. It is computed from the credential record
//! each time, first matching row wins:
//!
//! | logged in | token | PIN | verified & fresh | pending login | session |
//! |---|---|---|---|---|---|
//! | yes | yes | yes | yes | - | `Authenticated` |
//! | yes | yes | yes | no | - | `PinVerificationRequired` |
//! | yes | yes | no | - | - | `AuthenticatedNoPin` |
//! | - | - | no | - | yes | `PinSetupRequired` |
//! | otherwise | | | | | `Unauthenticated` |
//!
//! A verification is fresh while less than the validity window (24h by
//! default) has passed since `lastPinVerification`. A missing or
//! unparseable timestamp counts as expired.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use dealer_auth::{CredentialKey, CredentialStore, TRUE};

/// Where the user stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Session {
    Unauthenticated,
    /// Logged in, but no local PIN chosen yet.
    AuthenticatedNoPin,
    /// Identity provider finished; PIN setup will complete the login.
    PinSetupRequired,
    PinVerificationRequired,
    Authenticated,
}

impl Session {
    pub fn label(self) -> &'static str {
        match self {
            Session::Unauthenticated => "unauthenticated",
            Session::AuthenticatedNoPin => "authenticated_no_pin",
            Session::PinSetupRequired => "pin_setup_required",
            Session::PinVerificationRequired => "pin_verification_required",
            Session::Authenticated => "authenticated",
        }
    }

    pub fn is_authenticated(self) -> bool {
        self == Session::Authenticated
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The credential record fields that decide the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSnapshot {
    pub is_logged_in: bool,
    pub has_token: bool,
    pub has_pin: bool,
    pub pin_verified: bool,
    pub last_pin_verification: Option<String>,
    pub has_pending_login: bool,
}

impl CredentialSnapshot {
    /// Read the deciding keys from `store`. Any failed read fails the
    /// whole snapshot.
    pub async fn read(store: &dyn CredentialStore) -> dealer_auth::Result<Self> {
        let present = |v: Option<String>| v.is_some_and(|v| !v.is_empty());

        Ok(Self {
            is_logged_in: store.get(CredentialKey::IsLoggedIn).await?.as_deref() == Some(TRUE),
            has_token: present(store.get(CredentialKey::AuthToken).await?),
            has_pin: present(store.get(CredentialKey::UserPin).await?),
            pin_verified: store.get(CredentialKey::PinVerified).await?.as_deref() == Some(TRUE),
            last_pin_verification: store.get(CredentialKey::LastPinVerification).await?,
            has_pending_login: present(store.get(CredentialKey::PendingLoginInfo).await?),
        })
    }
}

/// Whether a verification stamped at `last` has lapsed by `now`.
pub fn pin_expired(last: Option<&str>, now: DateTime<Utc>, validity: Duration) -> bool {
    let Some(last) = last else {
        return true;
    };
    match DateTime::parse_from_rfc3339(last) {
        Ok(at) => now.signed_duration_since(at.with_timezone(&Utc)) > validity,
        Err(_) => true,
    }
}

pub fn derive_session(snapshot: &CredentialSnapshot, now: DateTime<Utc>, validity: Duration) -> Session {
    let s = snapshot;
    let fresh = s.pin_verified && !pin_expired(s.last_pin_verification.as_deref(), now, validity);

    if s.is_logged_in && s.has_token {
        return match (s.has_pin, fresh) {
            (true, true) => Session::Authenticated,
            (true, false) => Session::PinVerificationRequired,
            (false, _) => Session::AuthenticatedNoPin,
        };
    }
    if s.has_pending_login && !s.has_pin {
        return Session::PinSetupRequired;
    }
    Session::Unauthenticated
}

/// Timestamp format for `lastPinVerification`.
pub fn stamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339()
}
