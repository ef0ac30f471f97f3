//! The authentication facade.
//!
//! `SessionManager` is the one place the rest of the application asks "am I
//! logged in, as whom, with which privileges". It combines the token
//! lifecycle with the inactivity timeout and runs the countdown ticker.
//!
//! Every session (each login or restore) gets a new generation number. The
//! ticker and any in-flight extension remember the generation they belong
//! to, and do nothing once it is no longer current. That keeps a late tick
//! after logout from touching the next session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, AuthApi};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::events::{
    EventBus, Navigator, NoticeLevel, Notifier, SessionEvent, TracingNavigator, TracingNotifier,
};
use crate::models::{Credentials, User};
use crate::storage::{FileStore, KeyValueStore};
use crate::utils::format_remaining;

use super::lifecycle::TokenLifecycle;
use super::timeout::{SessionStatus, SessionTimeout, Transition};
use super::tokens::TokenPair;
use super::SessionError;

/// Observable session state for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub authenticated: bool,
    pub warning_active: bool,
    /// Seconds left on the countdown; only set while the warning is active.
    pub remaining_seconds: Option<i64>,
}

impl SessionSnapshot {
    fn inactive() -> Self {
        Self {
            status: SessionStatus::Inactive,
            authenticated: false,
            warning_active: false,
            remaining_seconds: None,
        }
    }
}

/// Why a live session was ended by force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpiryReason {
    Inactivity,
    RefreshFailed,
}

impl ExpiryReason {
    fn notice(&self) -> &'static str {
        match self {
            ExpiryReason::Inactivity => {
                "Your session has expired due to inactivity. Please log in again."
            }
            ExpiryReason::RefreshFailed => {
                "Your session is no longer valid. Please log in again."
            }
        }
    }
}

struct SessionInner {
    config: SessionConfig,
    lifecycle: TokenLifecycle,
    api: Arc<dyn AuthApi>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    navigator: Arc<dyn Navigator>,
    events: EventBus,
    timeout: Mutex<SessionTimeout>,
    user: RwLock<Option<User>>,
    generation: AtomicU64,
    ticker: Mutex<Option<JoinHandle<()>>>,
    state_tx: watch::Sender<SessionSnapshot>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.ticker).take() {
            handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Session manager handle. Clone is cheap; all clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

pub struct SessionManagerBuilder {
    config: SessionConfig,
    api: Option<Arc<dyn AuthApi>>,
    store: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
    notifier: Option<Arc<dyn Notifier>>,
    navigator: Option<Arc<dyn Navigator>>,
}

impl SessionManagerBuilder {
    pub fn api(mut self, api: Arc<dyn AuthApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Unset collaborators default to the HTTP `ApiClient`, a `FileStore` in
    /// the configured storage directory, the system clock, and log-only
    /// notifier/navigator.
    pub fn build(self) -> anyhow::Result<SessionManager> {
        self.config.validate()?;

        let api: Arc<dyn AuthApi> = match self.api {
            Some(api) => api,
            None => Arc::new(ApiClient::new(&self.config)?),
        };
        let store: Arc<dyn KeyValueStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileStore::new(self.config.storage_dir()?)?),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let notifier: Arc<dyn Notifier> = match self.notifier {
            Some(notifier) => notifier,
            None => Arc::new(TracingNotifier),
        };
        let navigator: Arc<dyn Navigator> = match self.navigator {
            Some(navigator) => navigator,
            None => Arc::new(TracingNavigator),
        };

        let lifecycle = TokenLifecycle::new(
            store,
            Arc::clone(&api),
            Arc::clone(&clock),
            self.config.expiry_margin(),
        );
        let timeout = SessionTimeout::new(self.config.session_timeout(), self.config.warning_window());
        let (state_tx, _) = watch::channel(SessionSnapshot::inactive());

        Ok(SessionManager {
            inner: Arc::new(SessionInner {
                config: self.config,
                lifecycle,
                api,
                clock,
                notifier,
                navigator,
                events: EventBus::new(),
                timeout: Mutex::new(timeout),
                user: RwLock::new(None),
                generation: AtomicU64::new(0),
                ticker: Mutex::new(None),
                state_tx,
            }),
        })
    }
}

impl SessionManager {
    pub fn builder(config: SessionConfig) -> SessionManagerBuilder {
        SessionManagerBuilder {
            config,
            api: None,
            store: None,
            clock: None,
            notifier: None,
            navigator: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn lifecycle(&self) -> &TokenLifecycle {
        &self.inner.lifecycle
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    fn current_generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Startup / teardown
    // =========================================================================

    /// Pick up a session persisted by a previous run.
    ///
    /// An expired access token with a live refresh token is refreshed once;
    /// if that fails the stored tokens are gone and no session is restored.
    /// Must be called from within a Tokio runtime.
    pub async fn restore(&self) -> bool {
        let Some(pair) = self.inner.lifecycle.load_tokens() else {
            debug!("No stored session to restore");
            self.publish();
            return false;
        };

        if self.inner.lifecycle.is_expired(&pair.access) {
            debug!("Stored access token expired, attempting refresh");
            if let Err(e) = self.inner.lifecycle.refresh().await {
                info!(error = %e, "Stored session could not be refreshed");
                self.publish();
                return false;
            }
        }

        let user = self.inner.lifecycle.load_user();
        info!(user_id = ?user.as_ref().map(|u| u.id), "Session restored");
        self.begin_session(user);
        true
    }

    /// Stop the ticker and detach from the current session. Persisted tokens
    /// are left alone so the next process can `restore()`.
    pub fn destroy(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.stop_ticker();
        debug!("Session manager destroyed");
    }

    // =========================================================================
    // Login / logout
    // =========================================================================

    pub async fn login(&self, credentials: &Credentials) -> Result<User, SessionError> {
        if !credentials.is_complete() {
            return Err(ApiError::Validation {
                status: 400,
                message: "Username and password required".to_string(),
                fields: Default::default(),
            }
            .into());
        }

        let response = match self.inner.api.login(credentials).await {
            Ok(response) => response,
            Err(err) => {
                err.log("login");
                return Err(err.into());
            }
        };

        let pair = TokenPair::new(response.access, response.refresh);
        if !pair.is_complete() || self.inner.lifecycle.is_expired(&pair.access) {
            warn!("Login returned an unusable access token");
            return Err(ApiError::InvalidResponse(
                "Login returned an unusable access token".to_string(),
            )
            .into());
        }

        self.inner.lifecycle.save_tokens(&pair)?;
        let user = response.user;
        if let Err(e) = self.inner.lifecycle.save_user(&user) {
            warn!(error = %e, "Failed to persist user record");
        }

        self.begin_session(Some(user.clone()));
        info!(user_id = user.id, username = %user.username, "Login successful");
        self.inner
            .events
            .emit(&SessionEvent::LoggedIn { user_id: user.id });
        Ok(user)
    }

    /// End the session locally, then optionally tell the server.
    ///
    /// The server call is best-effort: its failure is logged and never blocks
    /// the local logout. Calling this again is harmless.
    pub async fn logout(&self, notify_server: bool) {
        let tokens = self.inner.lifecycle.load_tokens();
        let had_session = tokens.is_some()
            || self.status() != SessionStatus::Inactive
            || self.current_user().is_some();

        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.stop_ticker();
        self.inner.lifecycle.clear_tokens();
        *self.inner.user.write().unwrap_or_else(|e| e.into_inner()) = None;
        lock(&self.inner.timeout).reset();
        self.publish();

        if had_session {
            info!("Logged out");
            self.inner.events.emit(&SessionEvent::LoggedOut);
        }

        if notify_server {
            if let Some(pair) = tokens {
                if let Err(err) = self.inner.api.logout(&pair.access, &pair.refresh).await {
                    err.log("logout");
                }
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Computed on every call from the stored pair and the clock.
    pub fn is_authenticated(&self) -> bool {
        self.inner
            .lifecycle
            .load_tokens()
            .is_some_and(|pair| !self.inner.lifecycle.is_expired(&pair.access))
    }

    pub fn require_auth(&self) -> Result<(), SessionError> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(SessionError::AuthenticationRequired)
        }
    }

    /// Gate for the admin dashboard.
    pub fn require_admin(&self) -> Result<User, SessionError> {
        self.require_auth()?;
        self.current_user()
            .filter(User::is_admin)
            .ok_or(SessionError::PermissionDenied)
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner
            .user
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_admin(&self) -> bool {
        self.current_user().is_some_and(|u| u.is_admin())
    }

    pub fn is_superuser(&self) -> bool {
        self.current_user().is_some_and(|u| u.is_superuser())
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.current_user()
            .is_some_and(|u| u.has_permission(permission))
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.inner.timeout).status()
    }

    pub fn warning_active(&self) -> bool {
        self.status() == SessionStatus::Warning
    }

    /// Seconds left before the inactivity timeout, while the warning is up.
    pub fn remaining_seconds(&self) -> Option<i64> {
        let now = self.now();
        lock(&self.inner.timeout).remaining_seconds(now)
    }

    /// Last recorded activity of the live session.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner.timeout).last_activity()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let now = self.now();
        let (status, remaining_seconds) = {
            let timeout = lock(&self.inner.timeout);
            (timeout.status(), timeout.remaining_seconds(now))
        };
        SessionSnapshot {
            status,
            authenticated: self.is_authenticated(),
            warning_active: status == SessionStatus::Warning,
            remaining_seconds,
        }
    }

    /// Watch channel that receives a new snapshot whenever it changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state_tx.subscribe()
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.inner.state_tx.send_if_modified(|current| {
            if *current != next {
                *current = next;
                true
            } else {
                false
            }
        });
    }

    // =========================================================================
    // Activity and extension
    // =========================================================================

    /// Reset the inactivity timer. Activity after the deadline ends the
    /// session instead.
    pub fn record_activity(&self) {
        let generation = self.current_generation();
        let now = self.now();
        let change = lock(&self.inner.timeout).record_activity(now);
        self.after_activity(generation, change);
    }

    /// Returns false if the session turned out to be past its deadline.
    fn after_activity(&self, generation: u64, change: Option<Transition>) -> bool {
        match change {
            Some(Transition {
                to: SessionStatus::Expired,
                ..
            }) => {
                debug!("Activity arrived after the inactivity deadline");
                self.force_expire(generation, ExpiryReason::Inactivity);
                return false;
            }
            Some(Transition {
                from: SessionStatus::Warning,
                to: SessionStatus::Active,
            }) => {
                debug!("Activity cancelled session warning");
                self.inner.events.emit(&SessionEvent::ActivityResumed);
            }
            _ => {}
        }
        self.publish();
        true
    }

    /// Expire a session that is already past its deadline. Leaves the
    /// warning transition to the ticker so its notice is not skipped.
    fn check_deadline(&self, generation: u64) -> bool {
        let now = self.now();
        let past = lock(&self.inner.timeout)
            .deadline()
            .is_some_and(|deadline| now >= deadline);
        if past {
            self.force_expire(generation, ExpiryReason::Inactivity);
            return false;
        }
        true
    }

    /// Refresh the tokens and reset the inactivity timer ("Stay logged in").
    ///
    /// A failed refresh ends the session; it is not retried.
    pub async fn extend_session(&self) -> Result<(), SessionError> {
        let generation = self.current_generation();
        match self.status() {
            SessionStatus::Active | SessionStatus::Warning => {}
            SessionStatus::Expired => return Err(SessionError::SessionExpired),
            SessionStatus::Inactive => return Err(SessionError::AuthenticationRequired),
        }
        if !self.check_deadline(generation) {
            return Err(SessionError::SessionExpired);
        }

        match self.inner.lifecycle.refresh().await {
            Ok(_) => {
                if self.current_generation() != generation {
                    debug!("Session ended while extending");
                    return Err(SessionError::AuthenticationRequired);
                }
                let now = self.now();
                let change = lock(&self.inner.timeout).record_activity(now);
                if !self.after_activity(generation, change) {
                    return Err(SessionError::SessionExpired);
                }
                info!("Session extended");
                self.inner.events.emit(&SessionEvent::Refreshed);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "Session extension failed");
                self.force_expire(generation, ExpiryReason::RefreshFailed);
                Err(err)
            }
        }
    }

    /// A bearer token for outgoing API calls, refreshed first when it is
    /// about to expire. A failed refresh ends the session.
    pub async fn access_token(&self) -> Result<String, SessionError> {
        let generation = self.current_generation();
        if self.status().is_live() && !self.check_deadline(generation) {
            return Err(SessionError::SessionExpired);
        }

        let Some(pair) = self.inner.lifecycle.load_tokens() else {
            return Err(match self.status() {
                SessionStatus::Expired => SessionError::SessionExpired,
                _ => SessionError::AuthenticationRequired,
            });
        };

        if !self
            .inner
            .lifecycle
            .expires_within(&pair.access, self.inner.config.refresh_leeway())
        {
            return Ok(pair.access);
        }

        debug!("Access token near expiry, refreshing");
        match self.inner.lifecycle.refresh().await {
            Ok(pair) => {
                self.inner.events.emit(&SessionEvent::Refreshed);
                self.publish();
                Ok(pair.access)
            }
            Err(err) => {
                warn!(error = %err, "Silent token refresh failed");
                if self.status().is_live() {
                    self.force_expire(generation, ExpiryReason::RefreshFailed);
                } else {
                    self.publish();
                }
                Err(err)
            }
        }
    }

    // =========================================================================
    // Countdown
    // =========================================================================

    /// Run one countdown tick now. The background ticker calls this on every
    /// interval; callers driving a simulated clock call it directly.
    pub fn tick(&self) -> SessionStatus {
        self.tick_generation(self.current_generation());
        self.status()
    }

    /// Returns false once the ticker for `generation` should stop.
    fn tick_generation(&self, generation: u64) -> bool {
        if self.current_generation() != generation {
            debug!(generation, "Ignoring tick from a finished session");
            return false;
        }

        let now = self.now();
        let (change, remaining) = {
            let mut timeout = lock(&self.inner.timeout);
            let change = timeout.evaluate(now);
            (change, timeout.remaining_seconds(now))
        };

        match change.map(|c| c.to) {
            Some(SessionStatus::Warning) => {
                let remaining = remaining.unwrap_or(0);
                info!(remaining_seconds = remaining, "Session entering warning window");
                self.inner.notifier.show(
                    NoticeLevel::Warning,
                    &format!(
                        "Your session will expire in {} due to inactivity.",
                        format_remaining(remaining)
                    ),
                );
                self.inner.events.emit(&SessionEvent::WarningStarted {
                    remaining_seconds: remaining,
                });
            }
            Some(SessionStatus::Expired) => {
                self.force_expire(generation, ExpiryReason::Inactivity);
                return false;
            }
            _ => {}
        }

        self.publish();
        true
    }

    /// Forced logout. Only the first caller for a given generation acts.
    fn force_expire(&self, generation: u64, reason: ExpiryReason) {
        if self
            .inner
            .generation
            .compare_exchange(generation, generation + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        warn!(?reason, "Session expired, forcing logout");
        self.stop_ticker();
        self.inner.lifecycle.clear_tokens();
        *self.inner.user.write().unwrap_or_else(|e| e.into_inner()) = None;
        lock(&self.inner.timeout).expire();
        self.publish();

        self.inner.notifier.show(NoticeLevel::Warning, reason.notice());
        self.inner.navigator.navigate_to(&self.inner.config.login_path);
        self.inner.events.emit(&SessionEvent::Expired);
    }

    fn begin_session(&self, user: Option<User>) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.user.write().unwrap_or_else(|e| e.into_inner()) = user;
        let now = self.now();
        lock(&self.inner.timeout).start(now);
        self.start_ticker(generation);
        self.publish();
    }

    fn start_ticker(&self, generation: u64) {
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.tick_interval();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !(SessionManager { inner }).tick_generation(generation) {
                    break;
                }
            }
        });

        if let Some(previous) = lock(&self.inner.ticker).replace(handle) {
            previous.abort();
        }
    }

    fn stop_ticker(&self) {
        if let Some(handle) = lock(&self.inner.ticker).take() {
            handle.abort();
        }
    }
}
