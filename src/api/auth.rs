//! Session-expiry observation
//!
//! The transport reports every 401 to an injected [`AuthObserver`] instead of
//! redirecting from a global interceptor. The CLI uses [`SessionState`] to
//! record the expiry and clear the cached session cookie.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::warn;

/// Receives authentication state changes from [`super::HoundClient`]
pub trait AuthObserver: Send + Sync {
    /// Called once per 401 response
    fn session_expired(&self);
}

/// Observer that ignores every notification
#[derive(Debug, Default)]
pub struct NoopObserver;

impl AuthObserver for NoopObserver {
    fn session_expired(&self) {}
}

type ExpiryHook = Box<dyn Fn() + Send + Sync>;

/// Tracks whether the current session has expired
#[derive(Default)]
pub struct SessionState {
    expired: AtomicBool,
    on_expired: Mutex<Option<ExpiryHook>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` the first time the session expires
    pub fn with_hook(hook: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            expired: AtomicBool::new(false),
            on_expired: Mutex::new(Some(Box::new(hook))),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }
}

impl AuthObserver for SessionState {
    fn session_expired(&self) {
        if self.expired.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("session expired, logging out");
        let hook = match self.on_expired.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("expired", &self.is_expired())
            .finish()
    }
}
