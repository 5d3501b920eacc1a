//! Local PIN gate
//!
//! First run sets a 4-digit PIN; later cold starts and foreground resumes
//! challenge it. Setting the PIN also completes a pending identity-provider
//! login. Mismatches are counted in memory only: the count resets on a
//! match and on lockout, and restarts from zero on every launch. Reaching
//! the attempt limit ends the session through the shared logout routine.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use dealer_auth::{
    AuthEvent, CallbackInfo, CredentialKey, CredentialStore, PIN_LENGTH, SessionTerminator, TRUE,
};
use tracing::{error, info, warn};

use crate::error::PinError;
use crate::state::stamp;

/// Which PIN screen applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinEntryMode {
    /// No PIN stored yet.
    Set,
    Enter,
}

/// Outcome of a PIN challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinCheck {
    Verified,
    Mismatch { attempts_remaining: u32 },
    /// Too many mismatches; the session has been ended.
    LockedOut,
}

pub struct PinGate {
    terminator: Arc<SessionTerminator>,
    max_attempts: u32,
    failed_attempts: Mutex<u32>,
}

impl PinGate {
    pub fn new(terminator: Arc<SessionTerminator>, max_attempts: u32) -> Self {
        Self {
            terminator,
            max_attempts: max_attempts.max(1),
            failed_attempts: Mutex::new(0),
        }
    }

    fn credentials(&self) -> &Arc<dyn CredentialStore> {
        self.terminator.store()
    }

    pub fn failed_attempts(&self) -> u32 {
        *self.attempts()
    }

    fn attempts(&self) -> std::sync::MutexGuard<'_, u32> {
        self.failed_attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn entry_mode(&self) -> Result<PinEntryMode, PinError> {
        let stored = self.credentials().get(CredentialKey::UserPin).await?;
        Ok(match stored {
            Some(pin) if !pin.is_empty() => PinEntryMode::Enter,
            _ => PinEntryMode::Set,
        })
    }

    /// Store a new PIN and mark it verified. A pending login is finalized
    /// in the same write. The pending payload is discarded afterwards
    /// whether or not that write succeeded.
    ///
    /// Only valid while no PIN is stored; replacing one goes through
    /// [`reset_pin`](Self::reset_pin) first.
    pub async fn set_pin(&self, pin: &str) -> Result<(), PinError> {
        // A malformed PIN is rejected before any write, so it is not a
        // finalization failure and the pending payload stays for a retry
        validate(pin)?;
        if self.entry_mode().await? == PinEntryMode::Enter {
            warn!("PIN already set, refusing to overwrite");
            return Err(PinError::AlreadySet);
        }

        let result = self.write_pin(pin).await;
        if let Err(e) = self
            .credentials()
            .remove(&[CredentialKey::PendingLoginInfo])
            .await
        {
            warn!(error = %e, "discarding pending login failed");
        }

        match &result {
            Ok(finalized) => {
                *self.attempts() = 0;
                info!(finalized_login = finalized, "PIN set");
            }
            Err(e) => error!(error = %e, "PIN setup failed"),
        }
        result.map(|_| ())
    }

    /// Returns whether a pending login was finalized.
    async fn write_pin(&self, pin: &str) -> Result<bool, PinError> {
        let pending = self
            .credentials()
            .get(CredentialKey::PendingLoginInfo)
            .await?
            .filter(|p| !p.is_empty());

        let mut entries = vec![
            (CredentialKey::UserPin, pin.to_string()),
            (CredentialKey::PinVerified, TRUE.to_string()),
            (CredentialKey::LastPinVerification, stamp(Utc::now())),
        ];

        let finalized = match pending {
            Some(json) => {
                let info = CallbackInfo::from_json(&json)
                    .map_err(|e| PinError::LoginFinalization(e.to_string()))?;
                entries.extend(login_entries(info));
                true
            }
            None => false,
        };

        self.credentials().set_many(entries).await.map_err(|e| {
            if finalized {
                PinError::LoginFinalization(e.to_string())
            } else {
                PinError::Storage(e)
            }
        })?;
        Ok(finalized)
    }

    pub async fn verify_pin(&self, entered: &str) -> Result<PinCheck, PinError> {
        validate(entered)?;

        let stored = self
            .credentials()
            .get(CredentialKey::UserPin)
            .await?
            .filter(|p| !p.is_empty())
            .ok_or(PinError::NotSet)?;

        if stored == entered {
            self.credentials()
                .set_many(vec![
                    (CredentialKey::PinVerified, TRUE.to_string()),
                    (CredentialKey::LastPinVerification, stamp(Utc::now())),
                ])
                .await?;
            *self.attempts() = 0;
            info!("PIN verified");
            return Ok(PinCheck::Verified);
        }

        let attempts = {
            let mut failed = self.attempts();
            *failed += 1;
            let attempts = *failed;
            if attempts >= self.max_attempts {
                *failed = 0;
            }
            attempts
        };

        if attempts < self.max_attempts {
            let attempts_remaining = self.max_attempts - attempts;
            warn!(attempts, attempts_remaining, "PIN mismatch");
            return Ok(PinCheck::Mismatch { attempts_remaining });
        }

        warn!(attempts, "PIN attempts exhausted, ending session");
        metrics::counter!("auth_pin_lockouts_total").increment(1);
        self.terminator
            .terminate(AuthEvent::auth_failure("PIN attempts exhausted"))
            .await;
        Ok(PinCheck::LockedOut)
    }

    /// Forget the PIN and its verification. Tokens stay, so the next check
    /// routes to PIN setup.
    pub async fn reset_pin(&self) -> Result<(), PinError> {
        self.credentials().remove(&CredentialKey::PIN).await?;
        *self.attempts() = 0;
        info!("PIN reset");
        Ok(())
    }

    /// Require a fresh challenge without forgetting the PIN.
    pub async fn clear_verification(&self) -> Result<(), PinError> {
        self.credentials()
            .set(CredentialKey::PinVerified, "false".to_string())
            .await?;
        Ok(())
    }
}

fn validate(pin: &str) -> Result<(), PinError> {
    if pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(PinError::InvalidFormat(PIN_LENGTH))
    }
}

fn login_entries(info: CallbackInfo) -> Vec<(CredentialKey, String)> {
    let mut entries = vec![
        (CredentialKey::AuthToken, info.token),
        (CredentialKey::RefreshToken, info.refresh_token),
        (CredentialKey::UserLoginName, info.user_login_name),
        (CredentialKey::IsLoggedIn, TRUE.to_string()),
    ];
    if let Some(exp) = info.token_expiration {
        entries.push((CredentialKey::TokenExpiration, exp));
    }
    if let Some(exp) = info.refresh_token_expiration {
        entries.push((CredentialKey::RefreshTokenExpiration, exp));
    }
    entries
}
