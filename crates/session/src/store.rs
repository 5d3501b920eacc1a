//! Session store
//!
//! Derives the session from the credential record and publishes it on a
//! watch channel. The credential store stays the single source of truth:
//! every mutation here writes through it and then re-derives.
//!
//! Logout and auth-failure events from other components are handled
//! optimistically: the store publishes `Unauthenticated` the moment the
//! event arrives, then confirms against storage in a spawned task.

use std::sync::{Arc, Weak};

use chrono::{Duration, Utc};
use dealer_auth::{
    AuthEvent, AuthEventKind, CallbackInfo, CredentialKey, CredentialStore, EventBus,
    LogoutReport, SessionTerminator, Subscription, TRUE,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::state::{CredentialSnapshot, Session, derive_session};

pub struct SessionStore {
    terminator: Arc<SessionTerminator>,
    pin_validity: Duration,
    state: watch::Sender<Option<Session>>,
}

impl SessionStore {
    pub fn new(terminator: Arc<SessionTerminator>, pin_validity: Duration) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            terminator,
            pin_validity,
            state,
        }
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        self.terminator.store()
    }

    /// Last published session; `None` until the first check completes.
    pub fn current(&self) -> Option<Session> {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.state.subscribe()
    }

    pub async fn snapshot(&self) -> Result<CredentialSnapshot> {
        Ok(CredentialSnapshot::read(self.credentials().as_ref()).await?)
    }

    /// Re-read the credential record, derive the session and publish it.
    ///
    /// When storage cannot be read the session is published as
    /// `Unauthenticated` and the error returned.
    pub async fn check_status(&self) -> Result<Session> {
        match self.snapshot().await {
            Ok(snapshot) => {
                let session = derive_session(&snapshot, Utc::now(), self.pin_validity);
                self.publish(session);
                Ok(session)
            }
            Err(e) => {
                error!(error = %e, "session check failed, treating as unauthenticated");
                self.publish(Session::Unauthenticated);
                Err(e)
            }
        }
    }

    /// Mark the user as logged in. A stored PIN still has to be verified
    /// before the session is `Authenticated`.
    pub async fn login(&self) -> Result<Session> {
        self.credentials()
            .set(CredentialKey::IsLoggedIn, TRUE.to_string())
            .await?;
        self.check_status().await
    }

    /// Hold the identity provider's callback until PIN setup completes it.
    pub async fn accept_callback(&self, info: &CallbackInfo) -> Result<Session> {
        info.validate()?;
        self.credentials()
            .set(CredentialKey::PendingLoginInfo, info.to_json()?)
            .await?;
        info!(user = %info.user_login_name, "login callback accepted, awaiting PIN setup");
        self.check_status().await
    }

    /// End the session. Never fails: storage problems are logged and the
    /// session is published as `Unauthenticated` regardless.
    pub async fn logout(&self) -> LogoutReport {
        let report = self
            .terminator
            .terminate(AuthEvent::logout("user logout"))
            .await;
        if self.check_status().await.is_err() {
            warn!("post-logout session check failed");
        }
        report
    }

    /// Follow logout and auth-failure events on `bus`.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Vec<Subscription> {
        [AuthEventKind::Logout, AuthEventKind::AuthFailure]
            .into_iter()
            .map(|kind| {
                let store = Arc::downgrade(self);
                bus.subscribe(kind, move |event| on_session_ended(&store, event))
            })
            .collect()
    }

    fn publish(&self, session: Session) {
        self.state.send_if_modified(|current| {
            if *current == Some(session) {
                return false;
            }
            info!(
                from = current.map(Session::label).unwrap_or("none"),
                to = session.label(),
                "session state changed"
            );
            *current = Some(session);
            true
        });
    }
}

fn on_session_ended(store: &Weak<SessionStore>, event: &AuthEvent) {
    let Some(store) = store.upgrade() else {
        return;
    };
    store.publish(Session::Unauthenticated);

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let reason = event.reason().to_string();
            handle.spawn(async move {
                if let Err(e) = store.check_status().await {
                    warn!(%reason, error = %e, "confirming session check failed");
                }
            });
        }
        Err(_) => debug!("no async runtime, skipping confirming session check"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealer_auth::{MemoryCredentialStore, StoreOp};

    const PAYLOAD: &str = r#"{"UserLoginName":"dealer01","Token":"at","RefreshToken":"rt"}"#;

    fn setup() -> (Arc<MemoryCredentialStore>, EventBus, Arc<SessionTerminator>, Arc<SessionStore>) {
        let credentials = Arc::new(MemoryCredentialStore::new());
        let bus = EventBus::new();
        let terminator = Arc::new(SessionTerminator::new(credentials.clone(), bus.clone()));
        let store = Arc::new(SessionStore::new(terminator.clone(), Duration::hours(24)));
        (credentials, bus, terminator, store)
    }

    #[tokio::test]
    async fn fresh_install_is_unauthenticated() {
        let (_, _, _, store) = setup();
        assert_eq!(store.current(), None);
        assert_eq!(store.check_status().await.unwrap(), Session::Unauthenticated);
        assert_eq!(store.current(), Some(Session::Unauthenticated));
    }

    #[tokio::test]
    async fn storage_failure_publishes_unauthenticated() {
        let (credentials, _, _, store) = setup();
        credentials.fail_on(StoreOp::Get);
        assert!(store.check_status().await.is_err());
        assert_eq!(store.current(), Some(Session::Unauthenticated));
    }

    #[tokio::test]
    async fn callback_leads_to_pin_setup() {
        let (credentials, _, _, store) = setup();
        let info = CallbackInfo::from_json(PAYLOAD).unwrap();

        let session = store.accept_callback(&info).await.unwrap();
        assert_eq!(session, Session::PinSetupRequired);
        assert!(credentials.peek(CredentialKey::PendingLoginInfo).is_some());
        assert!(credentials.peek(CredentialKey::AuthToken).is_none());
    }

    #[tokio::test]
    async fn login_with_stored_pin_requires_verification() {
        let (credentials, _, _, store) = setup();
        credentials
            .set_many(vec![
                (CredentialKey::AuthToken, "at".into()),
                (CredentialKey::UserPin, "1234".into()),
            ])
            .await
            .unwrap();

        assert_eq!(store.login().await.unwrap(), Session::PinVerificationRequired);
    }

    #[tokio::test]
    async fn logout_survives_storage_failure() {
        let (credentials, _, _, store) = setup();
        credentials
            .set(CredentialKey::AuthToken, "at".into())
            .await
            .unwrap();
        credentials.fail_on(StoreOp::Remove);
        credentials.fail_on(StoreOp::Clear);
        credentials.fail_on(StoreOp::Get);

        let report = store.logout().await;
        assert!(!report.is_clean());
        assert_eq!(store.current(), Some(Session::Unauthenticated));
    }

    #[tokio::test]
    async fn logout_twice_is_harmless() {
        let (credentials, bus, _, store) = setup();
        let _subs = store.attach(&bus);
        credentials
            .set(CredentialKey::IsLoggedIn, TRUE.into())
            .await
            .unwrap();

        assert!(store.logout().await.is_clean());
        assert!(store.logout().await.is_clean());
        assert!(credentials.is_empty());
        assert_eq!(store.current(), Some(Session::Unauthenticated));
    }

    #[tokio::test]
    async fn auth_failure_event_publishes_immediately() {
        let (credentials, bus, terminator, store) = setup();
        let _subs = store.attach(&bus);
        credentials
            .set_many(vec![
                (CredentialKey::IsLoggedIn, TRUE.into()),
                (CredentialKey::AuthToken, "at".into()),
            ])
            .await
            .unwrap();
        assert_eq!(store.check_status().await.unwrap(), Session::AuthenticatedNoPin);

        let mut rx = store.subscribe();
        rx.borrow_and_update();
        terminator
            .terminate(AuthEvent::auth_failure("refresh failed"))
            .await;

        // Published synchronously from the handler, before any re-check runs
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Some(Session::Unauthenticated));
    }

    #[tokio::test]
    async fn detached_store_ignores_events() {
        let (_, bus, terminator, store) = setup();
        let subs = store.attach(&bus);
        for sub in &subs {
            sub.unsubscribe();
        }
        terminator.terminate(AuthEvent::logout("user")).await;
        assert_eq!(store.current(), None);
    }

    #[test]
    fn event_without_runtime_still_publishes() {
        let (_, bus, _, store) = setup();
        let _subs = store.attach(&bus);
        bus.emit(AuthEvent::logout("user"));
        assert_eq!(store.current(), Some(Session::Unauthenticated));
    }
}
