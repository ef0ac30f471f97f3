//! Shared fixtures for session integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use sessionguard_core::api::{LoginResponse, RefreshResponse};
use sessionguard_core::{
    ApiError, AuthApi, Clock, Credentials, ManualClock, MemoryStore, Navigator, NoticeLevel,
    Notifier, SessionConfig, SessionEvent, SessionManager, User,
};

/// Build an unsigned JWT carrying only an `exp` claim.
pub fn jwt_expiring_at(exp: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{}}}"#, exp.timestamp()));
    format!("{}.{}.sig", header, payload)
}

pub fn user(id: i64, is_staff: bool) -> User {
    serde_json::from_value(json!({
        "id": id,
        "username": format!("user{}", id),
        "email": format!("user{}@example.com", id),
        "is_staff": is_staff,
        "is_superuser": false,
        "permissions": [],
    }))
    .expect("valid user fixture")
}

pub struct MockApi {
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    login_result: Mutex<Result<LoginResponse, ApiError>>,
    refresh_result: Mutex<Result<RefreshResponse, ApiError>>,
    logout_result: Mutex<Result<(), ApiError>>,
    refresh_delay: StdDuration,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            login_result: Mutex::new(Err(ApiError::Network("no login configured".into()))),
            refresh_result: Mutex::new(Err(ApiError::Network("no refresh configured".into()))),
            logout_result: Mutex::new(Ok(())),
            refresh_delay: StdDuration::from_millis(20),
        }
    }

    pub fn set_login(&self, result: Result<LoginResponse, ApiError>) {
        *self.login_result.lock().unwrap() = result;
    }

    pub fn set_refresh(&self, result: Result<RefreshResponse, ApiError>) {
        *self.refresh_result.lock().unwrap() = result;
    }

    pub fn set_logout(&self, result: Result<(), ApiError>) {
        *self.logout_result.lock().unwrap() = result;
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthApi for MockApi {
    async fn login(&self, _credentials: &Credentials) -> Result<LoginResponse, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login_result.lock().unwrap().clone()
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.refresh_delay).await;
        self.refresh_result.lock().unwrap().clone()
    }

    async fn logout(&self, _access: &str, _refresh: &str) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.logout_result.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<(NoticeLevel, String)>>,
}

impl Notifier for RecordingNotifier {
    fn show(&self, level: NoticeLevel, message: &str) {
        self.notices.lock().unwrap().push((level, message.to_string()));
    }
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    pub paths: Mutex<Vec<String>>,
}

impl Navigator for RecordingNavigator {
    fn navigate_to(&self, path: &str) {
        self.paths.lock().unwrap().push(path.to_string());
    }
}

impl RecordingNavigator {
    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

pub struct Harness {
    pub manager: SessionManager,
    pub api: Arc<MockApi>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub navigator: Arc<RecordingNavigator>,
    pub events: Arc<Mutex<Vec<SessionEvent>>>,
}

/// 30 minute timeout, 5 minute warning. The background ticker is set to an
/// hour so tests drive the countdown with `tick()`.
pub fn config() -> SessionConfig {
    SessionConfig {
        session_timeout_secs: 1800,
        warning_window_secs: 300,
        tick_interval_ms: 3_600_000,
        ..Default::default()
    }
}

pub fn harness() -> Harness {
    harness_with(config(), Arc::new(MemoryStore::new()))
}

pub fn harness_with(config: SessionConfig, store: Arc<MemoryStore>) -> Harness {
    let api = Arc::new(MockApi::new());
    let clock = Arc::new(ManualClock::starting_now());
    let notifier = Arc::new(RecordingNotifier::default());
    let navigator = Arc::new(RecordingNavigator::default());

    let manager = SessionManager::builder(config)
        .api(api.clone())
        .store(store.clone())
        .clock(clock.clone())
        .notifier(notifier.clone())
        .navigator(navigator.clone())
        .build()
        .expect("session manager");

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    manager
        .events()
        .subscribe(move |event| sink.lock().unwrap().push(event.clone()));

    Harness {
        manager,
        api,
        clock,
        store,
        notifier,
        navigator,
        events,
    }
}

impl Harness {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Tokens valid for an hour (access) and a day (refresh) from now.
    pub fn fresh_tokens(&self) -> (String, String) {
        (
            jwt_expiring_at(self.now() + Duration::hours(1)),
            jwt_expiring_at(self.now() + Duration::days(1)),
        )
    }

    pub fn expect_login_as(&self, user: User) {
        let (access, refresh) = self.fresh_tokens();
        self.api.set_login(Ok(LoginResponse {
            access,
            refresh,
            user,
        }));
    }

    pub fn expect_refresh(&self) {
        let (access, refresh) = self.fresh_tokens();
        self.api.set_refresh(Ok(RefreshResponse {
            access,
            refresh: Some(refresh),
        }));
    }

    pub async fn login(&self, user: User) -> User {
        self.expect_login_as(user);
        self.manager
            .login(&Credentials::new("u", "p"))
            .await
            .expect("login succeeds")
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(Duration::seconds(secs));
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }
}
