//! Session controller
//!
//! Glue between the route guard and the stores. UI inputs (navigation,
//! app state, PIN entry, logout) arrive here; the controller performs the
//! store operation, feeds the outcome to the guard and executes whatever
//! the guard asks for. A background task forwards every session change
//! published by the [`SessionStore`] to the guard as well, which covers
//! logouts started elsewhere (API middleware, other screens).
//!
//! Navigation listeners run while the guard is locked and must not call
//! back into the controller.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use dealer_auth::{CallbackInfo, LogoutReport};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{PinError, Result};
use crate::guard::{AppState, GuardAction, GuardEvent, Location, RouteGuard};
use crate::pin::{PinCheck, PinEntryMode, PinGate};
use crate::state::Session;
use crate::store::SessionStore;

pub struct SessionController {
    store: Arc<SessionStore>,
    pins: Arc<PinGate>,
    guard: Mutex<RouteGuard>,
}

impl SessionController {
    pub fn new(store: Arc<SessionStore>, pins: Arc<PinGate>, initial: Location) -> Self {
        Self {
            store,
            pins,
            guard: Mutex::new(RouteGuard::new(initial)),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn pins(&self) -> &Arc<PinGate> {
        &self.pins
    }

    fn guard(&self) -> MutexGuard<'_, RouteGuard> {
        self.guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn on_navigate<F>(&self, listener: F)
    where
        F: Fn(&Location) + Send + Sync + 'static,
    {
        self.guard().on_navigate(listener);
    }

    pub fn location(&self) -> Location {
        self.guard().location().clone()
    }

    /// The session the guard is currently enforcing.
    pub fn effective_session(&self) -> Option<Session> {
        self.guard().effective_session()
    }

    /// Run the initial session check and let the guard place the user.
    pub async fn start(&self) -> Session {
        let session = self.checked_session().await;
        self.dispatch(GuardEvent::InitialCheckComplete(session)).await;
        session
    }

    pub async fn navigate(&self, location: Location) -> Location {
        self.dispatch(GuardEvent::LocationChanged(location)).await;
        self.location()
    }

    pub async fn app_state_changed(&self, state: AppState) -> Location {
        self.dispatch(GuardEvent::AppStateChanged(state)).await;
        self.location()
    }

    pub async fn accept_callback(&self, info: &CallbackInfo) -> Result<Session> {
        let session = self.store.accept_callback(info).await?;
        self.dispatch(GuardEvent::SessionChanged(session)).await;
        Ok(session)
    }

    pub async fn login(&self) -> Result<Session> {
        let session = self.store.login().await?;
        self.dispatch(GuardEvent::SessionChanged(session)).await;
        Ok(session)
    }

    pub async fn entry_mode(&self) -> std::result::Result<PinEntryMode, PinError> {
        self.pins.entry_mode().await
    }

    pub async fn set_pin(&self, pin: &str) -> std::result::Result<Session, PinError> {
        let outcome = self.pins.set_pin(pin).await;
        if outcome.is_ok() {
            self.dispatch(GuardEvent::PinChallengePassed).await;
        }
        let session = self.checked_session().await;
        self.dispatch(GuardEvent::SessionChanged(session)).await;
        outcome?;
        Ok(session)
    }

    pub async fn verify_pin(&self, pin: &str) -> std::result::Result<PinCheck, PinError> {
        let check = self.pins.verify_pin(pin).await?;
        match check {
            PinCheck::Verified => {
                self.dispatch(GuardEvent::PinChallengePassed).await;
                let session = self.checked_session().await;
                self.dispatch(GuardEvent::SessionChanged(session)).await;
            }
            PinCheck::LockedOut => {
                let session = self.checked_session().await;
                self.dispatch(GuardEvent::SessionChanged(session)).await;
            }
            PinCheck::Mismatch { .. } => {}
        }
        Ok(check)
    }

    pub async fn reset_pin(&self) -> std::result::Result<Session, PinError> {
        self.pins.reset_pin().await?;
        let session = self.checked_session().await;
        self.dispatch(GuardEvent::SessionChanged(session)).await;
        Ok(session)
    }

    pub async fn logout(&self) -> LogoutReport {
        let report = self.store.logout().await;
        let session = self.store.current().unwrap_or(Session::Unauthenticated);
        self.dispatch(GuardEvent::SessionChanged(session)).await;
        report
    }

    /// Feed one event to the guard and carry out the resulting actions,
    /// including any events those actions produce.
    pub async fn dispatch(&self, event: GuardEvent) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            let actions = self.guard().transition(event);
            for action in actions {
                match action {
                    GuardAction::Navigate(location) => {
                        debug!(%location, "navigated");
                    }
                    GuardAction::ClearPinVerification => {
                        if let Err(e) = self.pins.clear_verification().await {
                            warn!(error = %e, "clearing PIN verification failed");
                        }
                        let session = self.checked_session().await;
                        pending.push_back(GuardEvent::SessionChanged(session));
                    }
                }
            }
        }
    }

    async fn checked_session(&self) -> Session {
        self.store
            .check_status()
            .await
            .unwrap_or(Session::Unauthenticated)
    }
}

/// Forward every published session change to the controller's guard.
///
/// Runs until aborted.
pub fn spawn_session_watch(controller: Arc<SessionController>) -> JoinHandle<()> {
    let mut changes = controller.store.subscribe();
    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let session = *changes.borrow_and_update();
            if let Some(session) = session {
                controller
                    .dispatch(GuardEvent::SessionChanged(session))
                    .await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use dealer_auth::{
        AuthEvent, CredentialKey, CredentialStore, EventBus, MemoryCredentialStore,
        SessionTerminator, Subscription, TRUE,
    };

    const PAYLOAD: &str = r#"{"UserLoginName":"dealer01","Token":"at","RefreshToken":"rt"}"#;

    struct App {
        credentials: Arc<MemoryCredentialStore>,
        terminator: Arc<SessionTerminator>,
        controller: Arc<SessionController>,
        _subs: Vec<Subscription>,
    }

    fn app(credentials: Arc<MemoryCredentialStore>) -> App {
        let bus = EventBus::new();
        let terminator = Arc::new(SessionTerminator::new(credentials.clone(), bus.clone()));
        let store = Arc::new(SessionStore::new(terminator.clone(), Duration::hours(24)));
        let subs = store.attach(&bus);
        let pins = Arc::new(PinGate::new(terminator.clone(), 3));
        let controller = Arc::new(SessionController::new(store, pins, Location::home()));
        App {
            credentials,
            terminator,
            controller,
            _subs: subs,
        }
    }

    async fn signed_in() -> Arc<MemoryCredentialStore> {
        let credentials = Arc::new(MemoryCredentialStore::new());
        credentials
            .set_many(vec![
                (CredentialKey::IsLoggedIn, TRUE.into()),
                (CredentialKey::AuthToken, "at".into()),
                (CredentialKey::RefreshToken, "rt".into()),
                (CredentialKey::UserPin, "1234".into()),
                (CredentialKey::PinVerified, TRUE.into()),
                (
                    CredentialKey::LastPinVerification,
                    crate::state::stamp(chrono::Utc::now()),
                ),
            ])
            .await
            .unwrap();
        credentials
    }

    #[tokio::test]
    async fn fresh_install_lands_on_login() {
        let a = app(Arc::new(MemoryCredentialStore::new()));
        assert_eq!(a.controller.start().await, Session::Unauthenticated);
        assert_eq!(a.controller.location(), Location::Login);
    }

    #[tokio::test]
    async fn callback_then_pin_setup_authenticates() {
        let a = app(Arc::new(MemoryCredentialStore::new()));
        a.controller.start().await;

        let info = CallbackInfo::from_json(PAYLOAD).unwrap();
        let session = a.controller.accept_callback(&info).await.unwrap();
        assert_eq!(session, Session::PinSetupRequired);
        assert_eq!(a.controller.location(), Location::PinSetup);
        assert_eq!(a.controller.entry_mode().await.unwrap(), PinEntryMode::Set);

        let session = a.controller.set_pin("1234").await.unwrap();
        assert_eq!(session, Session::Authenticated);
        assert_eq!(a.controller.location(), Location::home());

        let c = &a.credentials;
        assert_eq!(c.peek(CredentialKey::UserPin).as_deref(), Some("1234"));
        assert_eq!(c.peek(CredentialKey::PinVerified).as_deref(), Some(TRUE));
        assert_eq!(c.peek(CredentialKey::IsLoggedIn).as_deref(), Some(TRUE));
        assert!(c.peek(CredentialKey::PendingLoginInfo).is_none());
    }

    #[tokio::test]
    async fn cold_start_with_valid_session_still_challenges() {
        let a = app(signed_in().await);
        assert_eq!(a.controller.start().await, Session::Authenticated);
        assert_eq!(a.controller.location(), Location::PinVerify);

        assert_eq!(a.controller.verify_pin("1234").await.unwrap(), PinCheck::Verified);
        assert_eq!(a.controller.location(), Location::home());
    }

    #[tokio::test]
    async fn three_wrong_pins_log_out() {
        let a = app(signed_in().await);
        a.controller.start().await;

        for remaining in [2, 1] {
            assert_eq!(
                a.controller.verify_pin("0000").await.unwrap(),
                PinCheck::Mismatch { attempts_remaining: remaining }
            );
            assert_eq!(a.controller.location(), Location::PinVerify);
        }
        assert_eq!(a.controller.verify_pin("0000").await.unwrap(), PinCheck::LockedOut);
        assert_eq!(a.controller.location(), Location::Login);
        assert!(a.credentials.is_empty());
    }

    #[tokio::test]
    async fn resume_rechallenges_and_clears_flag() {
        let a = app(signed_in().await);
        a.controller.start().await;
        a.controller.verify_pin("1234").await.unwrap();
        a.controller.navigate(Location::from_path("/equipment")).await;

        a.controller.app_state_changed(AppState::Background).await;
        let location = a.controller.app_state_changed(AppState::Active).await;
        assert_eq!(location, Location::PinVerify);
        assert_eq!(
            a.credentials.peek(CredentialKey::PinVerified).as_deref(),
            Some("false")
        );
        assert_eq!(
            a.controller.store().current(),
            Some(Session::PinVerificationRequired)
        );

        // A second active report without backgrounding changes nothing
        assert_eq!(
            a.controller.app_state_changed(AppState::Active).await,
            Location::PinVerify
        );

        a.controller.verify_pin("1234").await.unwrap();
        assert_eq!(a.controller.location(), Location::home());
    }

    #[tokio::test]
    async fn reset_pin_routes_to_setup() {
        let a = app(signed_in().await);
        a.controller.start().await;
        a.controller.verify_pin("1234").await.unwrap();

        let session = a.controller.reset_pin().await.unwrap();
        assert_eq!(session, Session::AuthenticatedNoPin);
        assert_eq!(a.controller.location(), Location::PinSetup);

        a.controller.set_pin("5678").await.unwrap();
        assert_eq!(a.controller.location(), Location::home());
    }

    #[tokio::test]
    async fn set_pin_cannot_skip_verification() {
        let a = app(signed_in().await);
        a.controller.start().await;
        assert_eq!(a.controller.location(), Location::PinVerify);
        a.controller.verify_pin("0000").await.unwrap();
        a.controller.verify_pin("0000").await.unwrap();

        assert!(matches!(
            a.controller.set_pin("9999").await,
            Err(PinError::AlreadySet)
        ));
        assert_eq!(a.controller.location(), Location::PinVerify);
        assert_eq!(a.credentials.peek(CredentialKey::UserPin).as_deref(), Some("1234"));

        // The mismatch count survived, so one more miss locks out
        assert_eq!(a.controller.verify_pin("0000").await.unwrap(), PinCheck::LockedOut);
        assert_eq!(a.controller.location(), Location::Login);
    }

    #[tokio::test]
    async fn explicit_logout_goes_to_login() {
        let a = app(signed_in().await);
        a.controller.start().await;
        a.controller.verify_pin("1234").await.unwrap();

        assert!(a.controller.logout().await.is_clean());
        assert_eq!(a.controller.location(), Location::Login);
        assert!(a.credentials.is_empty());
    }

    #[tokio::test]
    async fn external_auth_failure_reaches_guard_through_watch() {
        let a = app(signed_in().await);
        a.controller.start().await;
        a.controller.verify_pin("1234").await.unwrap();
        let watcher = spawn_session_watch(a.controller.clone());

        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Mutex::new(Some(tx));
        a.controller.on_navigate(move |location| {
            if *location == Location::Login {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
            }
        });

        a.terminator
            .terminate(AuthEvent::auth_failure("token refresh failed"))
            .await;

        tokio::time::timeout(std::time::Duration::from_secs(5), rx)
            .await
            .expect("guard never redirected")
            .unwrap();
        assert_eq!(a.controller.location(), Location::Login);
        watcher.abort();
    }

    #[tokio::test]
    async fn set_pin_failure_still_updates_guard() {
        let credentials = Arc::new(MemoryCredentialStore::new());
        credentials
            .set(CredentialKey::PendingLoginInfo, "{broken".into())
            .await
            .unwrap();
        let a = app(credentials);
        assert_eq!(a.controller.start().await, Session::PinSetupRequired);

        assert!(a.controller.set_pin("1234").await.is_err());
        // Pending login was discarded and no session formed
        assert_eq!(a.controller.location(), Location::Login);
        assert!(a.credentials.get(CredentialKey::PendingLoginInfo).await.unwrap().is_none());
    }
}
