//! Route guard
//!
//! Decides the one screen the user may be on, given the session, the
//! current location and the app's foreground state. It is a plain state
//! machine: [`RouteGuard::transition`] consumes an event and returns the
//! actions to run. Navigation is applied to the guard's own location and
//! reported to listeners; everything else is left to the caller.
//!
//! Nothing is decided before the initial session check completes, so the
//! app never flashes a screen it is about to leave.
//!
//! Two edge triggers force a PIN challenge on an otherwise authenticated
//! session:
//! - resume: the app returns to the foreground from background/inactive
//! - cold start: the first authenticated evaluation of a launch, until a
//!   challenge has been passed once

use std::fmt;

use tracing::{debug, info};

use crate::state::Session;

/// App screens, as far as the guard cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Login,
    PinSetup,
    PinVerify,
    /// Any protected screen, by route path.
    Main(String),
}

impl Location {
    pub fn home() -> Self {
        Location::Main("/".to_string())
    }

    pub fn is_auth_screen(&self) -> bool {
        !matches!(self, Location::Main(_))
    }

    pub fn path(&self) -> &str {
        match self {
            Location::Login => "/login",
            Location::PinSetup => "/pin-setup",
            Location::PinVerify => "/pin-verify",
            Location::Main(path) => path,
        }
    }

    pub fn from_path(path: &str) -> Self {
        match path {
            "/login" => Location::Login,
            "/pin-setup" => Location::PinSetup,
            "/pin-verify" => Location::PinVerify,
            other => Location::Main(other.to_string()),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Foreground state reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Active,
    Inactive,
    Background,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardEvent {
    InitialCheckComplete(Session),
    SessionChanged(Session),
    LocationChanged(Location),
    AppStateChanged(AppState),
    /// A PIN was verified or newly set.
    PinChallengePassed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardAction {
    Navigate(Location),
    /// Drop the stored verification so storage agrees with the forced
    /// challenge.
    ClearPinVerification,
}

type Listener = Box<dyn Fn(&Location) + Send + Sync>;

pub struct RouteGuard {
    ready: bool,
    session: Option<Session>,
    location: Location,
    app_state: AppState,
    launch_challenge_passed: bool,
    resume_challenge: bool,
    listeners: Vec<Listener>,
}

impl RouteGuard {
    pub fn new(location: Location) -> Self {
        Self {
            ready: false,
            session: None,
            location,
            app_state: AppState::Active,
            launch_challenge_passed: false,
            resume_challenge: false,
            listeners: Vec::new(),
        }
    }

    /// Called with the new location after every guard-driven navigation.
    pub fn on_navigate<F>(&mut self, listener: F)
    where
        F: Fn(&Location) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn app_state(&self) -> AppState {
        self.app_state
    }

    /// The session as the guard enforces it, with forced challenges
    /// applied.
    pub fn effective_session(&self) -> Option<Session> {
        match self.session {
            Some(Session::Authenticated)
                if self.resume_challenge || !self.launch_challenge_passed =>
            {
                Some(Session::PinVerificationRequired)
            }
            other => other,
        }
    }

    pub fn transition(&mut self, event: GuardEvent) -> Vec<GuardAction> {
        debug!(?event, ready = self.ready, "guard event");
        let mut actions = Vec::new();

        match event {
            GuardEvent::InitialCheckComplete(session) => {
                self.session = Some(session);
                self.ready = true;
            }
            GuardEvent::SessionChanged(session) => {
                self.session = Some(session);
                // Storage now agrees the challenge is due, or the session is
                // gone; either way the forced state is no longer needed
                if session != Session::Authenticated {
                    self.resume_challenge = false;
                }
            }
            GuardEvent::LocationChanged(location) => {
                self.location = location;
            }
            GuardEvent::AppStateChanged(state) => {
                let previous = std::mem::replace(&mut self.app_state, state);
                let resumed = state == AppState::Active && previous != AppState::Active;
                if self.ready
                    && resumed
                    && self.effective_session() == Some(Session::Authenticated)
                {
                    info!("app resumed, requiring PIN challenge");
                    self.resume_challenge = true;
                    actions.push(GuardAction::ClearPinVerification);
                }
            }
            GuardEvent::PinChallengePassed => {
                self.launch_challenge_passed = true;
                self.resume_challenge = false;
            }
        }

        if !self.ready {
            return actions;
        }
        if let Some(target) = self.target() {
            info!(from = %self.location, to = %target, "guard redirect");
            self.location = target.clone();
            for listener in &self.listeners {
                listener(&self.location);
            }
            actions.push(GuardAction::Navigate(target));
        }
        actions
    }

    /// Where the user must go, if not where they are.
    fn target(&self) -> Option<Location> {
        let target = match self.effective_session()? {
            Session::Unauthenticated => Location::Login,
            Session::AuthenticatedNoPin | Session::PinSetupRequired => Location::PinSetup,
            Session::PinVerificationRequired => Location::PinVerify,
            Session::Authenticated if self.location.is_auth_screen() => Location::home(),
            Session::Authenticated => return None,
        };
        (target != self.location).then_some(target)
    }
}
