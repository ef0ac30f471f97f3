//! Token lifecycle: persisting, validating and refreshing the token pair.
//!
//! Only this module writes the persisted pair. Refreshes are single-flight:
//! while one `POST /refresh` is outstanding, every other caller awaits the
//! same outcome instead of spending the refresh token a second time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Duration;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::api::{ApiError, AuthApi};
use crate::clock::Clock;
use crate::models::User;
use crate::storage::KeyValueStore;

use super::tokens::{decode_expiry, is_expired_at, StoredTokens, TokenPair};
use super::SessionError;

/// Storage key for the token pair
const TOKENS_KEY: &str = "session_tokens";

/// Storage key for the cached user record
const USER_KEY: &str = "session_user";

type RefreshFuture = Shared<BoxFuture<'static, Result<TokenPair, SessionError>>>;

/// Persisted token state plus the clock used to judge expiry.
///
/// Every write or clear bumps `epoch`, so a refresh that started before a
/// logout (or a new login) can tell its result is stale and drop it.
#[derive(Clone)]
struct TokenStorage {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    expiry_margin: Duration,
    epoch: Arc<AtomicU64>,
    write_lock: Arc<Mutex<()>>,
}

impl TokenStorage {
    fn load_tokens(&self) -> Option<TokenPair> {
        let raw = match self.store.get(TOKENS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Failed to read stored tokens");
                return None;
            }
        };

        match serde_json::from_str::<StoredTokens>(&raw) {
            Ok(stored) => {
                let pair = stored.into_pair();
                if pair.is_none() {
                    debug!("Ignoring incomplete stored token pair");
                }
                pair
            }
            Err(e) => {
                warn!(error = %e, "Stored tokens are corrupt, ignoring");
                None
            }
        }
    }

    fn write(&self, pair: &TokenPair) -> Result<(), SessionError> {
        if !pair.is_complete() {
            return Err(SessionError::Storage(
                "Refusing to store an incomplete token pair".to_string(),
            ));
        }
        let raw = serde_json::to_string(&StoredTokens::from(pair))
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        self.store.set(TOKENS_KEY, &raw).map_err(SessionError::storage)
    }

    fn save_tokens(&self, pair: &TokenPair) -> Result<(), SessionError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.write(pair)
    }

    /// Save only if nothing replaced or cleared the pair since `epoch`.
    fn save_tokens_if_current(&self, pair: &TokenPair, epoch: u64) -> Result<(), SessionError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Session changed during refresh, discarding refreshed tokens");
            return Err(SessionError::AuthenticationRequired);
        }
        self.write(pair)
    }

    fn clear_tokens(&self) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.remove_all();
    }

    /// Clear only if nothing replaced or cleared the pair since `epoch`.
    /// A failure that belongs to an earlier session must not wipe a newer one.
    fn clear_tokens_if_current(&self, epoch: u64) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Session changed during refresh, leaving stored tokens alone");
            return;
        }
        self.remove_all();
    }

    /// Caller holds `write_lock`.
    fn remove_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        for key in [TOKENS_KEY, USER_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!(key, error = %format!("{:#}", e), "Failed to remove stored session data");
            }
        }
    }

    fn is_expired(&self, token: &str) -> bool {
        is_expired_at(token, self.clock.now(), self.expiry_margin)
    }

    /// True only for a token whose `exp` claim decodes and has passed.
    /// Opaque tokens are left for the server to judge.
    fn is_known_expired(&self, token: &str) -> bool {
        decode_expiry(token).is_some_and(|exp| exp - self.clock.now() <= self.expiry_margin)
    }
}

pub struct TokenLifecycle {
    storage: TokenStorage,
    api: Arc<dyn AuthApi>,
    in_flight: Mutex<Option<(u64, RefreshFuture)>>,
    next_flight: AtomicU64,
}

impl TokenLifecycle {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        api: Arc<dyn AuthApi>,
        clock: Arc<dyn Clock>,
        expiry_margin: Duration,
    ) -> Self {
        Self {
            storage: TokenStorage {
                store,
                clock,
                expiry_margin,
                epoch: Arc::new(AtomicU64::new(0)),
                write_lock: Arc::new(Mutex::new(())),
            },
            api,
            in_flight: Mutex::new(None),
            next_flight: AtomicU64::new(0),
        }
    }

    /// Read the persisted pair. Missing, unreadable, corrupt and incomplete
    /// records all come back as `None`.
    pub fn load_tokens(&self) -> Option<TokenPair> {
        self.storage.load_tokens()
    }

    /// Replace the persisted pair.
    ///
    /// A refresh still in flight for the old pair is detached: callers
    /// already waiting on it get its outcome, new callers start afresh.
    pub fn save_tokens(&self, pair: &TokenPair) -> Result<(), SessionError> {
        self.detach_flight();
        self.storage.save_tokens(pair)
    }

    /// Remove the persisted pair and cached user. Idempotent.
    pub fn clear_tokens(&self) {
        self.detach_flight();
        self.storage.clear_tokens();
    }

    fn detach_flight(&self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    /// Fail-closed expiry check against the configured clock and margin.
    pub fn is_expired(&self, token: &str) -> bool {
        self.storage.is_expired(token)
    }

    /// True if `token` expires within `window` (or is already expired).
    pub fn expires_within(&self, token: &str, window: Duration) -> bool {
        let window = window.max(self.storage.expiry_margin);
        is_expired_at(token, self.storage.clock.now(), window)
    }

    pub fn load_user(&self) -> Option<User> {
        let raw = match self.storage.store.get(USER_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Failed to read stored user");
                return None;
            }
        };
        serde_json::from_str(&raw)
            .map_err(|e| warn!(error = %e, "Stored user record is corrupt, ignoring"))
            .ok()
    }

    pub fn save_user(&self, user: &User) -> Result<(), SessionError> {
        let raw = serde_json::to_string(user).map_err(|e| SessionError::Storage(e.to_string()))?;
        self.storage
            .store
            .set(USER_KEY, &raw)
            .map_err(SessionError::storage)
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Exchange the refresh token for a new pair.
    ///
    /// Any failure clears the stored tokens; nothing is retried here.
    /// Concurrent callers share one request and one result.
    pub async fn refresh(&self) -> Result<TokenPair, SessionError> {
        let (id, flight) = {
            let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some((id, flight)) => {
                    debug!(flight = id, "Joining in-flight token refresh");
                    (*id, flight.clone())
                }
                None => {
                    let id = self.next_flight.fetch_add(1, Ordering::SeqCst);
                    let flight = refresh_once(self.storage.clone(), Arc::clone(&self.api))
                        .boxed()
                        .shared();
                    *slot = Some((id, flight.clone()));
                    (id, flight)
                }
            }
        };

        let result = flight.await;

        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(slot.as_ref(), Some((current, _)) if *current == id) {
            *slot = None;
        }
        result
    }
}

async fn refresh_once(
    storage: TokenStorage,
    api: Arc<dyn AuthApi>,
) -> Result<TokenPair, SessionError> {
    let epoch = storage.epoch.load(Ordering::SeqCst);

    let Some(current) = storage.load_tokens() else {
        debug!("No stored tokens to refresh");
        return Err(SessionError::AuthenticationRequired);
    };

    if storage.is_known_expired(&current.refresh) {
        warn!("Refresh token expired, clearing session");
        storage.clear_tokens_if_current(epoch);
        return Err(ApiError::Auth {
            status: None,
            message: "Refresh token expired".to_string(),
        }
        .into());
    }

    let response = match api.refresh(&current.refresh).await {
        Ok(response) => response,
        Err(err) => {
            err.log("refresh");
            storage.clear_tokens_if_current(epoch);
            return Err(err.into());
        }
    };

    let refresh = response
        .refresh
        .filter(|r| !r.is_empty())
        .unwrap_or(current.refresh);
    let pair = TokenPair::new(response.access, refresh);

    if !pair.is_complete() || storage.is_expired(&pair.access) {
        warn!("Refresh returned an unusable access token, clearing session");
        storage.clear_tokens_if_current(epoch);
        return Err(ApiError::InvalidResponse(
            "Refresh returned an unusable access token".to_string(),
        )
        .into());
    }

    storage.save_tokens_if_current(&pair, epoch)?;
    info!("Access token refreshed");
    Ok(pair)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::super::tokens::test_support::jwt_expiring_at;
    use super::*;
    use crate::api::{LoginResponse, RefreshResponse};
    use crate::clock::ManualClock;
    use crate::models::Credentials;
    use crate::storage::MemoryStore;

    struct StubApi {
        refresh_calls: AtomicUsize,
        response: Mutex<Result<RefreshResponse, ApiError>>,
        delay: std::time::Duration,
    }

    impl StubApi {
        fn returning(response: Result<RefreshResponse, ApiError>) -> Arc<Self> {
            Arc::new(Self {
                refresh_calls: AtomicUsize::new(0),
                response: Mutex::new(response),
                delay: std::time::Duration::from_millis(20),
            })
        }

        fn calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthApi for StubApi {
        async fn login(&self, _credentials: &Credentials) -> Result<LoginResponse, ApiError> {
            Err(ApiError::Network("not used".into()))
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<RefreshResponse, ApiError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.response.lock().unwrap().clone()
        }

        async fn logout(&self, _access: &str, _refresh: &str) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn lifecycle(api: Arc<StubApi>) -> (TokenLifecycle, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let lifecycle = TokenLifecycle::new(
            store.clone(),
            api,
            Arc::new(ManualClock::starting_now()),
            Duration::zero(),
        );
        (lifecycle, store)
    }

    fn valid_pair() -> TokenPair {
        TokenPair::new(
            jwt_expiring_at(Utc::now() + Duration::minutes(5)),
            jwt_expiring_at(Utc::now() + Duration::days(1)),
        )
    }

    #[test]
    fn test_load_tokens_ignores_corrupt_and_partial_records() {
        let (lifecycle, store) = lifecycle(StubApi::returning(Err(ApiError::Network("x".into()))));

        assert!(lifecycle.load_tokens().is_none());

        store.set(TOKENS_KEY, "{not json").unwrap();
        assert!(lifecycle.load_tokens().is_none());

        store.set(TOKENS_KEY, r#"{"refresh": "r"}"#).unwrap();
        assert!(lifecycle.load_tokens().is_none());

        let pair = valid_pair();
        lifecycle.save_tokens(&pair).unwrap();
        assert_eq!(lifecycle.load_tokens(), Some(pair));
    }

    #[test]
    fn test_clear_tokens_is_idempotent() {
        let (lifecycle, store) = lifecycle(StubApi::returning(Err(ApiError::Network("x".into()))));
        lifecycle.save_tokens(&valid_pair()).unwrap();

        lifecycle.clear_tokens();
        lifecycle.clear_tokens();
        assert!(lifecycle.load_tokens().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_rejects_incomplete_pair() {
        let (lifecycle, _) = lifecycle(StubApi::returning(Err(ApiError::Network("x".into()))));
        assert!(lifecycle.save_tokens(&TokenPair::new("a", "")).is_err());
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token_when_not_rotated() {
        let new_access = jwt_expiring_at(Utc::now() + Duration::minutes(5));
        let api = StubApi::returning(Ok(RefreshResponse {
            access: new_access.clone(),
            refresh: None,
        }));
        let (lifecycle, _) = lifecycle(api.clone());
        let old = valid_pair();
        lifecycle.save_tokens(&old).unwrap();

        let pair = lifecycle.refresh().await.unwrap();
        assert_eq!(pair.access, new_access);
        assert_eq!(pair.refresh, old.refresh);
        assert_eq!(lifecycle.load_tokens(), Some(pair));
        assert!(!lifecycle.is_refreshing());
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_tokens_without_retry() {
        let api = StubApi::returning(Err(ApiError::from_status(401, "")));
        let (lifecycle, _) = lifecycle(api.clone());
        lifecycle.save_tokens(&valid_pair()).unwrap();

        let err = lifecycle.refresh().await.unwrap_err();
        assert!(matches!(err, SessionError::Api(ApiError::Auth { .. })));
        assert_eq!(api.calls(), 1);
        assert!(lifecycle.load_tokens().is_none());
    }

    #[tokio::test]
    async fn test_refresh_rejects_malformed_access_token() {
        let api = StubApi::returning(Ok(RefreshResponse {
            access: "garbage".into(),
            refresh: Some("r2".into()),
        }));
        let (lifecycle, _) = lifecycle(api);
        lifecycle.save_tokens(&valid_pair()).unwrap();

        let err = lifecycle.refresh().await.unwrap_err();
        assert!(matches!(err, SessionError::Api(ApiError::InvalidResponse(_))));
        assert!(lifecycle.load_tokens().is_none());
    }

    #[tokio::test]
    async fn test_refresh_without_tokens_skips_network() {
        let api = StubApi::returning(Err(ApiError::Network("x".into())));
        let (lifecycle, _) = lifecycle(api.clone());

        assert_eq!(
            lifecycle.refresh().await,
            Err(SessionError::AuthenticationRequired)
        );
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_request() {
        let api = StubApi::returning(Ok(RefreshResponse {
            access: jwt_expiring_at(Utc::now() + Duration::minutes(5)),
            refresh: Some(jwt_expiring_at(Utc::now() + Duration::days(1))),
        }));
        let (lifecycle, _) = lifecycle(api.clone());
        lifecycle.save_tokens(&valid_pair()).unwrap();

        let results =
            futures::future::join_all((0..5).map(|_| lifecycle.refresh())).await;

        assert_eq!(api.calls(), 1);
        let first = results[0].clone().unwrap();
        assert!(results.iter().all(|r| r.as_ref() == Ok(&first)));
    }

    #[tokio::test]
    async fn test_opaque_refresh_token_goes_to_server() {
        let api = StubApi::returning(Ok(RefreshResponse {
            access: jwt_expiring_at(Utc::now() + Duration::minutes(5)),
            refresh: None,
        }));
        let (lifecycle, _) = lifecycle(api.clone());
        let access = jwt_expiring_at(Utc::now() + Duration::minutes(5));
        lifecycle.save_tokens(&TokenPair::new(access, "r1")).unwrap();

        let pair = lifecycle.refresh().await.unwrap();
        assert_eq!(api.calls(), 1);
        assert_eq!(pair.refresh, "r1");
    }

    #[tokio::test]
    async fn test_expired_refresh_token_skips_network() {
        let api = StubApi::returning(Err(ApiError::Network("x".into())));
        let (lifecycle, _) = lifecycle(api.clone());
        lifecycle
            .save_tokens(&TokenPair::new(
                jwt_expiring_at(Utc::now() + Duration::minutes(5)),
                jwt_expiring_at(Utc::now() - Duration::seconds(1)),
            ))
            .unwrap();

        let err = lifecycle.refresh().await.unwrap_err();
        assert!(matches!(err, SessionError::Api(ApiError::Auth { status: None, .. })));
        assert_eq!(api.calls(), 0);
        assert!(lifecycle.load_tokens().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_failures_are_shared() {
        let api = StubApi::returning(Err(ApiError::from_status(401, "")));
        let (lifecycle, _) = lifecycle(api.clone());
        lifecycle.save_tokens(&valid_pair()).unwrap();

        let results =
            futures::future::join_all((0..5).map(|_| lifecycle.refresh())).await;

        assert_eq!(api.calls(), 1);
        let first = results[0].clone().unwrap_err();
        assert!(results.iter().all(|r| r.as_ref().err() == Some(&first)));
        assert!(lifecycle.load_tokens().is_none());
    }

    #[tokio::test]
    async fn test_stale_refresh_failure_keeps_newer_tokens() {
        let api = StubApi::returning(Err(ApiError::from_status(401, "")));
        let (lifecycle, _) = lifecycle(api.clone());
        lifecycle.save_tokens(&valid_pair()).unwrap();
        let newer = valid_pair();

        let (result, ()) = tokio::join!(lifecycle.refresh(), async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            lifecycle.clear_tokens();
            lifecycle.save_tokens(&newer).unwrap();
        });

        assert!(matches!(result, Err(SessionError::Api(ApiError::Auth { .. }))));
        assert_eq!(api.calls(), 1);
        assert_eq!(lifecycle.load_tokens(), Some(newer));
        assert!(!lifecycle.is_refreshing());
    }

    #[tokio::test]
    async fn test_clear_during_refresh_discards_result() {
        let api = StubApi::returning(Ok(RefreshResponse {
            access: jwt_expiring_at(Utc::now() + Duration::minutes(5)),
            refresh: None,
        }));
        let (lifecycle, _) = lifecycle(api);
        lifecycle.save_tokens(&valid_pair()).unwrap();

        let (result, ()) = tokio::join!(lifecycle.refresh(), async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            lifecycle.clear_tokens();
        });

        assert_eq!(result, Err(SessionError::AuthenticationRequired));
        assert!(lifecycle.load_tokens().is_none());
    }
}
