//! Session event bus
//!
//! Carries `Logout` and `AuthFailure` from the components that detect them
//! (API middleware, PIN lockout, explicit logout) to the components that
//! react (session store, route guard). Delivery is synchronous, in
//! registration order, with no buffering: a subscriber registered after an
//! emission never sees it.
//!
//! The bus is a cheap cloneable handle. Construct one per session manager
//! and hand clones to each component.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use tracing::debug;

/// Event discriminant, used to pick subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthEventKind {
    Logout,
    AuthFailure,
}

impl AuthEventKind {
    pub fn label(self) -> &'static str {
        match self {
            AuthEventKind::Logout => "logout",
            AuthEventKind::AuthFailure => "auth_failure",
        }
    }
}

/// Something ended the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// Explicit user logout.
    Logout { reason: String, at: DateTime<Utc> },
    /// Session lost without the user asking: refresh failed, PIN lockout.
    AuthFailure { reason: String, at: DateTime<Utc> },
}

impl AuthEvent {
    pub fn logout(reason: impl Into<String>) -> Self {
        AuthEvent::Logout {
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    pub fn auth_failure(reason: impl Into<String>) -> Self {
        AuthEvent::AuthFailure {
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    pub fn kind(&self) -> AuthEventKind {
        match self {
            AuthEvent::Logout { .. } => AuthEventKind::Logout,
            AuthEvent::AuthFailure { .. } => AuthEventKind::AuthFailure,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            AuthEvent::Logout { reason, .. } | AuthEvent::AuthFailure { reason, .. } => reason,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            AuthEvent::Logout { at, .. } | AuthEvent::AuthFailure { at, .. } => *at,
        }
    }
}

type Handler = Arc<dyn Fn(&AuthEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    kind: AuthEventKind,
    handler: Handler,
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Publish/subscribe channel for [`AuthEvent`]s.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`.
    pub fn subscribe<F>(&self, kind: AuthEventKind, handler: F) -> Subscription
    where
        F: Fn(&AuthEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().push(Subscriber {
            id,
            kind,
            handler: Arc::new(handler),
        });
        debug!(id, kind = kind.label(), "event subscriber registered");
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every current subscriber of its kind. Returns the
    /// number of handlers invoked.
    ///
    /// Handlers run outside the subscriber lock, so they may subscribe or
    /// unsubscribe (themselves included) while being called.
    pub fn emit(&self, event: AuthEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .inner
            .lock()
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.handler.clone())
            .collect();

        debug!(
            kind = kind.label(),
            reason = event.reason(),
            subscribers = handlers.len(),
            "emitting auth event"
        );
        for handler in &handlers {
            handler(&event);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self, kind: AuthEventKind) -> usize {
        self.inner.lock().iter().filter(|s| s.kind == kind).count()
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping it does not unsubscribe; call [`unsubscribe`](Self::unsubscribe).
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<Inner>,
}

impl Subscription {
    /// Remove the handler. Calling this again, or after the bus is gone,
    /// does nothing.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.bus.upgrade() {
            let mut subscribers = inner.lock();
            let before = subscribers.len();
            subscribers.retain(|s| s.id != self.id);
            if subscribers.len() != before {
                debug!(id = self.id, "event subscriber removed");
            }
        }
    }
}
