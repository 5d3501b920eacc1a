//! Session termination
//!
//! One routine ends a session, whoever triggers it: explicit logout, a
//! failed token refresh, PIN lockout. It bumps the session epoch, removes
//! every credential key and then emits the event. Emission always happens,
//! even when storage misbehaves, so listeners never wait on a logout that
//! silently failed.
//!
//! The epoch lets in-flight work detect that the session it started under
//! has ended. The API middleware records the epoch before refreshing and
//! drops its new token if the epoch moved in the meantime.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{error, info, warn};

use crate::credentials::{CredentialKey, CredentialStore};
use crate::events::{AuthEvent, EventBus};

/// What a credential wipe achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogoutReport {
    /// Batch removal of the known keys succeeded.
    pub removed: bool,
    /// Batch removal failed and the whole record was cleared instead.
    pub fell_back_to_clear: bool,
    /// Keys still readable after the wipe. Empty on a clean logout.
    pub remaining: Vec<CredentialKey>,
}

impl LogoutReport {
    pub fn is_clean(&self) -> bool {
        self.remaining.is_empty() && (self.removed || self.fell_back_to_clear)
    }
}

/// Ends sessions and tracks the session epoch.
pub struct SessionTerminator {
    store: Arc<dyn CredentialStore>,
    bus: EventBus,
    epoch: AtomicU64,
}

impl SessionTerminator {
    pub fn new(store: Arc<dyn CredentialStore>, bus: EventBus) -> Self {
        Self {
            store,
            bus,
            epoch: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Current session epoch. Changes every time a session ends.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// End the session unconditionally.
    pub async fn terminate(&self, event: AuthEvent) -> LogoutReport {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.finish(event).await
    }

    /// End the session only if no other termination happened since
    /// `observed` was read. Returns `None` when someone else got there first,
    /// in which case nothing is cleared and nothing is emitted.
    pub async fn terminate_if_current(
        &self,
        observed: u64,
        event: AuthEvent,
    ) -> Option<LogoutReport> {
        if self
            .epoch
            .compare_exchange(observed, observed + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!(
                observed,
                current = self.epoch(),
                reason = event.reason(),
                "session already ended, skipping duplicate termination"
            );
            return None;
        }
        Some(self.finish(event).await)
    }

    async fn finish(&self, event: AuthEvent) -> LogoutReport {
        let kind = event.kind().label();
        let report = self.clear_credentials().await;

        if report.is_clean() {
            info!(kind, reason = event.reason(), "session ended");
        } else {
            warn!(
                kind,
                reason = event.reason(),
                remaining = report.remaining.len(),
                "session ended with credentials left behind"
            );
        }

        metrics::counter!("auth_logouts_total", "kind" => kind).increment(1);
        self.bus.emit(event);
        report
    }

    /// Remove every credential key, falling back to a full clear when the
    /// batch removal fails, then re-read to find any survivors.
    pub async fn clear_credentials(&self) -> LogoutReport {
        let mut report = LogoutReport::default();

        match self.store.remove(&CredentialKey::ALL).await {
            Ok(()) => report.removed = true,
            Err(e) => {
                error!(error = %e, "removing credentials failed, clearing record");
                match self.store.clear().await {
                    Ok(()) => report.fell_back_to_clear = true,
                    Err(e) => error!(error = %e, "clearing credential record failed"),
                }
            }
        }

        for key in CredentialKey::ALL {
            match self.store.get(key).await {
                Ok(None) => {}
                Ok(Some(_)) => report.remaining.push(key),
                Err(e) => {
                    warn!(%key, error = %e, "could not verify credential removal");
                }
            }
        }
        if !report.remaining.is_empty() {
            let keys: Vec<&str> = report.remaining.iter().map(|k| k.as_str()).collect();
            error!(?keys, "credentials survived logout");
        }

        report
    }
}
