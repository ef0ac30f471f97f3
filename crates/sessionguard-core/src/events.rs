//! Session events and the outward-facing collaborators.
//!
//! - `EventBus`: explicit observer registry. Observers are called in
//!   registration order and can be removed with the id `subscribe` returns.
//! - `Notifier`: fire-and-forget user messages (toasts).
//! - `Navigator`: forced redirects, e.g. to the login page on expiry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SessionEvent {
    LoggedIn { user_id: i64 },
    LoggedOut,
    Refreshed,
    WarningStarted { remaining_seconds: i64 },
    ActivityResumed,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Observer = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    observers: Mutex<Vec<(SubscriptionId, Observer)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(observer)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Deliver `event` to every observer, first-registered first.
    ///
    /// Observers run outside the registry lock and may subscribe or
    /// unsubscribe from inside the callback.
    pub fn emit(&self, event: &SessionEvent) {
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in observers {
            observer(event);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Surface for user-visible messages.
pub trait Notifier: Send + Sync {
    fn show(&self, level: NoticeLevel, message: &str);
}

/// Routing service used for forced redirects.
pub trait Navigator: Send + Sync {
    fn navigate_to(&self, path: &str);
}

/// Writes notices to the log. Default when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Info => info!(notice = message, "Notice shown"),
            NoticeLevel::Warning => warn!(notice = message, "Notice shown"),
            NoticeLevel::Error => error!(notice = message, "Notice shown"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNavigator;

impl Navigator for TracingNavigator {
    fn navigate_to(&self, path: &str) {
        info!(path, "Navigation requested");
    }
}
