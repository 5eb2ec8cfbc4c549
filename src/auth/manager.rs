//! Token lifecycle manager - owns the current access token, refreshes it when
//! it expires, and replays queued requests after a refresh.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};

use super::client::{HttpTokenService, HttpTransport, TokenService, Transport};
use crate::config::ClientConfig;
use crate::error::SdkError;
use crate::request::{ApiRequest, ApiResponse, RetryableRequest};
use crate::storage::{BackendKind, TokenStore};
use crate::token::AccessToken;

/// Default maximum refresh-and-retry cycles per request.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Mutable lifecycle state. Guarded by one mutex so that "check expiry,
/// decide to refresh, enqueue versus send" is a single atomic step; without
/// that, two concurrent requests can each trigger their own refresh exchange.
struct LifecycleState {
    token: Option<AccessToken>,
    /// True while a refresh exchange is in flight. At most one at a time.
    refreshing: bool,
    /// Requests parked while a refresh is in flight, replayed FIFO.
    waiting: VecDeque<RetryableRequest>,
}

/// Continuation chosen under the state lock. Routing decisions run
/// synchronously with the lock held and hand back the async work to do once
/// the guard is gone, so no lock guard is ever held across an await.
enum NextStep {
    /// Run the request against the transport with this bearer token.
    Execute(RetryableRequest, String),
    /// This caller owns the refresh exchange for this refresh token.
    Refresh(String),
    /// Parked behind an in-flight refresh, or settled under the lock.
    Done,
}

struct Inner {
    state: Mutex<LifecycleState>,
    store: TokenStore,
    tokens: Arc<dyn TokenService>,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
}

/// Owns the current access token and drives every authenticated API call.
///
/// Cheap to clone; clones share the same token, queue, and backends. The
/// manager is explicitly constructed and explicitly passed - there is no
/// process-wide singleton, though sharing one instance per application
/// process is a fine composition choice.
#[derive(Clone)]
pub struct TokenLifecycleManager {
    inner: Arc<Inner>,
}

impl TokenLifecycleManager {
    /// Wire up a manager with the default HTTP clients and storage backends:
    /// reads prefer the secure store, writes fan out to both backends.
    pub fn from_config(config: ClientConfig) -> Result<Self, SdkError> {
        let store = TokenStore::new(
            config.storage_identifier.clone(),
            vec![BackendKind::SecureStore, BackendKind::SimpleStore],
            vec![BackendKind::SecureStore, BackendKind::SimpleStore],
        )?;
        let tokens = Arc::new(HttpTokenService::new(config.clone()));
        let transport = Arc::new(HttpTransport::new(&config));
        Ok(Self::new(config, store, tokens, transport))
    }

    /// Create a manager over explicit collaborators, restoring any persisted
    /// token and healing backends that lost their copy.
    pub fn new(
        config: ClientConfig,
        store: TokenStore,
        tokens: Arc<dyn TokenService>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let token = store.load_and_replicate();
        match &token {
            Some(t) => info!(
                "Restored persisted token (user: {:?}, expires at {})",
                t.user_id, t.expires_at
            ),
            None => info!("No persisted token found; starting unauthenticated"),
        }

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LifecycleState {
                    token,
                    refreshing: false,
                    waiting: VecDeque::new(),
                }),
                store,
                tokens,
                transport,
                config,
            }),
        }
    }

    // ── Read-only queries ───────────────────────────────────────────────────

    /// True when a token is held (it may still be expired; the next send
    /// refreshes it lazily).
    pub fn is_authorized(&self) -> bool {
        self.inner.state.lock().token.is_some()
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .token
            .as_ref()
            .and_then(|t| t.user_id.clone())
    }

    pub fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().token.as_ref().map(|t| t.expires_at)
    }

    pub fn is_client_token(&self) -> bool {
        self.inner
            .state
            .lock()
            .token
            .as_ref()
            .is_some_and(|t| t.is_client_token)
    }

    // ── Authorization ───────────────────────────────────────────────────────

    /// Exchange an authorization code produced by the host's login flow for
    /// an initial token, install it, and persist it to every write backend.
    pub async fn authorize_with_code(&self, code: &str) -> Result<(), SdkError> {
        let token = self.inner.tokens.exchange_code(code).await?;
        self.install(token);
        Ok(())
    }

    /// Obtain an app-level token via the client-credentials flow.
    pub async fn authorize_client_credentials(&self) -> Result<(), SdkError> {
        let token = self.inner.tokens.client_credentials().await?;
        self.install(token);
        Ok(())
    }

    fn install(&self, token: AccessToken) {
        info!(
            "Access token installed (user: {:?}, expires at {})",
            token.user_id, token.expires_at
        );
        if !self.inner.store.store(&token) {
            warn!("Token not persisted to every backend");
        }
        self.inner.state.lock().token = Some(token);
    }

    /// Clear the local token and every backend copy (read and write sets).
    /// Requests parked behind an in-flight refresh fail with an authorization
    /// error; the refresh outcome itself is discarded when it lands.
    pub fn logout(&self) {
        info!("Logging out; clearing token state and all backends");
        let drained = {
            let mut state = self.inner.state.lock();
            state.token = None;
            state.refreshing = false;
            std::mem::take(&mut state.waiting)
        };
        self.inner.store.remove();
        for waiting in drained {
            waiting.complete(Err(SdkError::AuthorizationRejected("logged out".into())));
        }
    }

    // ── Request dispatch ────────────────────────────────────────────────────

    /// Send an authenticated API request and await its terminal outcome.
    ///
    /// Exactly one outcome is delivered: a response, or one of the error
    /// kinds in [`SdkError`]. The calling task is never blocked on network
    /// I/O beyond its own await.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SdkError> {
        let (retryable, receiver) = RetryableRequest::new(request);
        self.dispatch(retryable).await;
        receiver
            .await
            .map_err(|_| SdkError::Internal("request dropped without a result".into()))?
    }

    /// Route one retryable request: attach the current token, park it behind
    /// an in-flight refresh, or start the refresh it needs.
    ///
    /// Boxed because dispatch is resumed recursively after a refresh; the
    /// boxed trait object breaks the otherwise self-referential future type.
    fn dispatch(&self, request: RetryableRequest) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            match self.route(request) {
                NextStep::Execute(request, bearer) => self.execute(request, bearer).await,
                NextStep::Refresh(refresh_token) => self.run_refresh(refresh_token).await,
                NextStep::Done => {}
            }
        })
    }

    /// Pick the continuation for a fresh request. One critical section:
    /// "check expiry, decide to refresh, enqueue versus send" happens under a
    /// single hold of the lock, and the guard dies in here.
    fn route(&self, request: RetryableRequest) -> NextStep {
        let state = self.inner.state.lock();
        match state.token.clone() {
            None => {
                drop(state);
                debug!(
                    "Rejecting {} request: not authenticated",
                    request.request.path
                );
                request.complete(Err(SdkError::Unrefreshable));
                NextStep::Done
            }
            Some(token) if token.is_expired(Utc::now()) => {
                debug!(
                    "Token expired {}s ago; request needs a refresh",
                    -token.time_until_expiry(Utc::now()).num_seconds()
                );
                match self.queue_for_refresh(state, request, &token) {
                    Some(refresh_token) => NextStep::Refresh(refresh_token),
                    None => NextStep::Done,
                }
            }
            Some(token) => {
                drop(state);
                NextStep::Execute(request, token.access_token)
            }
        }
    }

    /// Run the request against the transport with `bearer` attached, handling
    /// an authorization failure via the refresh-and-retry path. Boxed for the
    /// same reason as [`Self::dispatch`]: it can resume itself.
    fn execute(
        &self,
        request: RetryableRequest,
        bearer: String,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            match self.inner.transport.execute(&request.request, &bearer).await {
                Ok(response) => request.complete(Ok(response)),
                Err(SdkError::AuthorizationRejected(reason)) => {
                    if request.attempt >= self.inner.config.max_retries {
                        warn!(
                            "{} still rejected after {} refresh-and-retry cycle(s)",
                            request.request.path, request.attempt
                        );
                        request.complete(Err(SdkError::RetryExhausted));
                        return;
                    }
                    debug!(
                        "{} rejected ({reason}); refreshing token and retrying",
                        request.request.path
                    );
                    match self.plan_retry(request, &bearer) {
                        NextStep::Execute(request, bearer) => self.execute(request, bearer).await,
                        NextStep::Refresh(refresh_token) => self.run_refresh(refresh_token).await,
                        NextStep::Done => {}
                    }
                }
                Err(err) => request.complete(Err(err)),
            }
        })
    }

    /// Pick the continuation for a request the server rejected on `bearer`.
    fn plan_retry(&self, mut request: RetryableRequest, bearer: &str) -> NextStep {
        let state = self.inner.state.lock();
        match state.token.clone() {
            // The token was superseded while this request was in flight;
            // retry with the new one, no further refresh.
            Some(token) if token.access_token != bearer => {
                drop(state);
                request.attempt += 1;
                NextStep::Execute(request, token.access_token)
            }
            // The server rejected a token that looked unexpired (clock skew
            // or revocation): same path as lazy expiry.
            Some(token) => match self.queue_for_refresh(state, request, &token) {
                Some(refresh_token) => NextStep::Refresh(refresh_token),
                None => NextStep::Done,
            },
            None => {
                drop(state);
                request.complete(Err(SdkError::Unrefreshable));
                NextStep::Done
            }
        }
    }

    /// Park `request` until the refresh completes. Returns the refresh token
    /// to exchange when this caller is the one to start the refresh; `None`
    /// when the request was parked behind an exchange already in flight, or
    /// settled immediately because no refresh is possible.
    fn queue_for_refresh(
        &self,
        mut state: MutexGuard<'_, LifecycleState>,
        request: RetryableRequest,
        token: &AccessToken,
    ) -> Option<String> {
        let Some(refresh_token) = token.refresh_token.clone() else {
            state.token = None;
            drop(state);
            warn!("Token cannot be refreshed (no refresh token); clearing credentials");
            self.inner.store.remove();
            request.complete(Err(SdkError::Unrefreshable));
            return None;
        };

        state.waiting.push_back(request);
        if state.refreshing {
            debug!(
                "Refresh already in flight; request parked ({} waiting)",
                state.waiting.len()
            );
            return None;
        }
        state.refreshing = true;
        drop(state);
        Some(refresh_token)
    }

    /// Perform the single in-flight refresh exchange and settle its outcome.
    ///
    /// Success installs and persists the new token, then resubmits every
    /// parked request in FIFO order with its retry counter advanced; a parked
    /// request that already reached the retry bound terminates with
    /// [`SdkError::RetryExhausted`] instead of being resubmitted. A rejected
    /// refresh clears the local token and every backend copy and fails the
    /// parked requests with an authorization error. A transport failure fails
    /// the parked requests but keeps the token, so a later send can retry the
    /// exchange.
    async fn run_refresh(&self, refresh_token: String) {
        info!("Starting access token refresh");
        match self.inner.tokens.refresh(&refresh_token).await {
            Ok(mut token) => {
                let drained = {
                    let mut state = self.inner.state.lock();
                    if !state.refreshing {
                        // A logout raced the exchange; its queue is already
                        // settled and the new credential must not outlive it.
                        info!("Refresh completed after logout; discarding new token");
                        return;
                    }
                    state.refreshing = false;

                    // Carry forward what the refresh response omitted, the
                    // old refresh token and subject stay valid.
                    if token.refresh_token.is_none() {
                        token.refresh_token = Some(refresh_token);
                    }
                    if token.user_id.is_none() {
                        if let Some(old) = &state.token {
                            token.user_id = old.user_id.clone();
                            token.is_client_token = old.is_client_token;
                        }
                    }

                    state.token = Some(token.clone());
                    std::mem::take(&mut state.waiting)
                };

                if !self.inner.store.update(&token) {
                    warn!("Refreshed token not persisted to every backend");
                }
                info!(
                    "Token refreshed; replaying {} waiting request(s)",
                    drained.len()
                );

                let mut replays = Vec::with_capacity(drained.len());
                for mut waiting in drained {
                    if waiting.attempt >= self.inner.config.max_retries {
                        waiting.complete(Err(SdkError::RetryExhausted));
                        continue;
                    }
                    waiting.attempt += 1;
                    replays.push(waiting);
                }

                // One replay task for the whole queue: join_all polls the
                // dispatches in queue order, so the transport sees the parked
                // requests submitted FIFO while they still run concurrently.
                let mgr = self.clone();
                tokio::spawn(async move {
                    let resubmissions: Vec<_> =
                        replays.into_iter().map(|w| mgr.dispatch(w)).collect();
                    join_all(resubmissions).await;
                });
            }
            Err(err) => {
                let rejected = err.is_authorization_rejected();
                let drained = {
                    let mut state = self.inner.state.lock();
                    if !state.refreshing {
                        return;
                    }
                    state.refreshing = false;
                    if rejected {
                        state.token = None;
                    }
                    std::mem::take(&mut state.waiting)
                };

                if rejected {
                    warn!("Refresh token rejected by the server; clearing credentials");
                    self.inner.store.remove();
                } else {
                    warn!("Refresh exchange failed: {err}; keeping token for a later attempt");
                }

                for waiting in drained {
                    waiting.complete(Err(err.clone()));
                }
            }
        }
    }

    // ── User API helpers ────────────────────────────────────────────────────

    /// Fetch the profile of the currently signed-in user.
    pub async fn get_current_user(&self) -> Result<ApiResponse, SdkError> {
        self.send(ApiRequest::get(self.api_path("/me"))).await
    }

    /// Fetch a user object by id.
    pub async fn get_user(&self, user_id: &str) -> Result<ApiResponse, SdkError> {
        self.send(ApiRequest::get(self.api_path(&format!("/user/{user_id}"))))
            .await
    }

    /// Fetch the login history of a user.
    pub async fn get_user_logins(&self, user_id: &str) -> Result<ApiResponse, SdkError> {
        self.send(ApiRequest::get(
            self.api_path(&format!("/user/{user_id}/logins")),
        ))
        .await
    }

    /// Request a one-time code for server-side use. The code is generated for
    /// the configured server client id, not the application client id.
    pub async fn get_one_time_code(&self) -> Result<ApiResponse, SdkError> {
        let body = serde_json::json!({
            "clientId": self.inner.config.one_time_code_client_id(),
            "type": "code",
        });
        self.send(ApiRequest::post(self.api_path("/oauth/exchange"), body))
            .await
    }

    fn api_path(&self, path: &str) -> String {
        format!("/api/{}{}", self.inner.config.api_version, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TokenStorage;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    // ── Mock collaborators ──────────────────────────────────────────────────

    #[derive(Default)]
    struct MemoryBackend {
        record: Mutex<Option<AccessToken>>,
    }

    impl MemoryBackend {
        fn held(&self) -> Option<AccessToken> {
            self.record.lock().clone()
        }
    }

    impl TokenStorage for MemoryBackend {
        fn get(&self, _identifier: &str) -> Result<Option<AccessToken>, SdkError> {
            Ok(self.record.lock().clone())
        }

        fn put(&self, _identifier: &str, token: &AccessToken) -> Result<(), SdkError> {
            *self.record.lock() = Some(token.clone());
            Ok(())
        }

        fn update(&self, identifier: &str, token: &AccessToken) -> Result<(), SdkError> {
            self.put(identifier, token)
        }

        fn remove(&self, _identifier: &str) -> Result<(), SdkError> {
            *self.record.lock() = None;
            Ok(())
        }
    }

    enum RefreshBehavior {
        Succeed,
        Reject,
        Unreachable,
    }

    struct MockTokens {
        refreshes: AtomicUsize,
        behavior: RefreshBehavior,
        delay: Option<StdDuration>,
    }

    impl MockTokens {
        fn new(behavior: RefreshBehavior) -> Arc<Self> {
            Arc::new(Self {
                refreshes: AtomicUsize::new(0),
                behavior,
                delay: None,
            })
        }

        fn slow(behavior: RefreshBehavior, delay: StdDuration) -> Arc<Self> {
            Arc::new(Self {
                refreshes: AtomicUsize::new(0),
                behavior,
                delay: Some(delay),
            })
        }

        fn refresh_count(&self) -> usize {
            self.refreshes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenService for MockTokens {
        async fn exchange_code(&self, _code: &str) -> Result<AccessToken, SdkError> {
            Ok(user_token("exchanged-token", Utc::now() + Duration::hours(1)))
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<AccessToken, SdkError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match self.behavior {
                RefreshBehavior::Succeed => {
                    Ok(user_token("refreshed-token", Utc::now() + Duration::hours(1)))
                }
                RefreshBehavior::Reject => {
                    Err(SdkError::AuthorizationRejected("invalid_grant".into()))
                }
                RefreshBehavior::Unreachable => {
                    Err(SdkError::Transport("connection refused".into()))
                }
            }
        }

        async fn client_credentials(&self) -> Result<AccessToken, SdkError> {
            Ok(AccessToken {
                access_token: "client-token".into(),
                refresh_token: None,
                expires_at: Utc::now() + Duration::hours(1),
                user_id: None,
                is_client_token: true,
            })
        }
    }

    enum TransportMode {
        Accept,
        RejectAll,
        RejectBearer(&'static str),
    }

    struct MockTransport {
        calls: AtomicUsize,
        bearers: Mutex<Vec<String>>,
        paths: Mutex<Vec<String>>,
        mode: TransportMode,
    }

    impl MockTransport {
        fn new(mode: TransportMode) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                bearers: Mutex::new(Vec::new()),
                paths: Mutex::new(Vec::new()),
                mode,
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn seen_bearers(&self) -> Vec<String> {
            self.bearers.lock().clone()
        }

        fn seen_paths(&self) -> Vec<String> {
            self.paths.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn execute(
            &self,
            request: &ApiRequest,
            bearer: &str,
        ) -> Result<ApiResponse, SdkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bearers.lock().push(bearer.to_string());
            self.paths.lock().push(request.path.clone());
            let reject = match &self.mode {
                TransportMode::Accept => false,
                TransportMode::RejectAll => true,
                TransportMode::RejectBearer(stale) => bearer == *stale,
            };
            if reject {
                Err(SdkError::AuthorizationRejected("expired token".into()))
            } else {
                Ok(ApiResponse {
                    status: 200,
                    body: serde_json::json!({"ok": true}),
                })
            }
        }
    }

    // ── Harness ─────────────────────────────────────────────────────────────

    fn user_token(bearer: &str, expires_at: DateTime<Utc>) -> AccessToken {
        AccessToken {
            access_token: bearer.into(),
            refresh_token: Some("refresh-1".into()),
            expires_at,
            user_id: Some("user-1".into()),
            is_client_token: false,
        }
    }

    fn expired_user_token(bearer: &str) -> AccessToken {
        user_token(bearer, Utc::now() - Duration::seconds(1))
    }

    fn manager_over(
        seed: Option<AccessToken>,
        tokens: Arc<MockTokens>,
        transport: Arc<MockTransport>,
    ) -> (TokenLifecycleManager, Arc<MemoryBackend>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let backend = Arc::new(MemoryBackend::default());
        if let Some(token) = seed {
            backend.put("access_token", &token).expect("seed");
        }
        let mut backends: HashMap<BackendKind, Arc<dyn TokenStorage>> = HashMap::new();
        backends.insert(BackendKind::SimpleStore, backend.clone());
        let store = TokenStore::with_backends(
            "access_token",
            vec![BackendKind::SimpleStore],
            vec![BackendKind::SimpleStore],
            backends,
        )
        .expect("valid registry");
        let config = ClientConfig::new("client-1", "secret", "https://id.example.test", "app://cb");
        (
            TokenLifecycleManager::new(config, store, tokens, transport),
            backend,
        )
    }

    fn api_request() -> ApiRequest {
        ApiRequest::get("/api/2/me")
    }

    // ── Tests ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn expired_token_refreshes_once_and_resends_with_the_new_token() {
        let tokens = MockTokens::new(RefreshBehavior::Succeed);
        let transport = MockTransport::new(TransportMode::Accept);
        let (manager, backend) =
            manager_over(Some(expired_user_token("stale")), tokens.clone(), transport.clone());

        let response = manager.send(api_request()).await.expect("request succeeds");
        assert_eq!(response.status, 200);
        assert_eq!(tokens.refresh_count(), 1);
        assert_eq!(transport.call_count(), 1);
        assert_eq!(transport.seen_bearers(), vec!["refreshed-token"]);
        // The refreshed token was persisted.
        assert_eq!(
            backend.held().map(|t| t.access_token),
            Some("refreshed-token".to_string())
        );
    }

    #[tokio::test]
    async fn expired_token_without_refresh_token_is_unrefreshable() {
        let mut seed = expired_user_token("stale");
        seed.refresh_token = None;
        let tokens = MockTokens::new(RefreshBehavior::Succeed);
        let transport = MockTransport::new(TransportMode::Accept);
        let (manager, backend) = manager_over(Some(seed), tokens.clone(), transport.clone());

        let err = manager.send(api_request()).await.unwrap_err();
        assert!(matches!(err, SdkError::Unrefreshable));
        // Zero resend attempts, zero refresh exchanges, credentials cleared.
        assert_eq!(transport.call_count(), 0);
        assert_eq!(tokens.refresh_count(), 0);
        assert!(!manager.is_authorized());
        assert_eq!(backend.held(), None);
    }

    #[tokio::test]
    async fn send_without_any_token_is_unrefreshable() {
        let tokens = MockTokens::new(RefreshBehavior::Succeed);
        let transport = MockTransport::new(TransportMode::Accept);
        let (manager, _backend) = manager_over(None, tokens, transport.clone());

        let err = manager.send(api_request()).await.unwrap_err();
        assert!(matches!(err, SdkError::Unrefreshable));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn retry_bound_is_enforced_after_one_refresh_cycle() {
        let tokens = MockTokens::new(RefreshBehavior::Succeed);
        let transport = MockTransport::new(TransportMode::RejectAll);
        let (manager, _backend) = manager_over(
            Some(user_token("stale", Utc::now() + Duration::hours(1))),
            tokens.clone(),
            transport.clone(),
        );

        let err = manager.send(api_request()).await.unwrap_err();
        assert!(matches!(err, SdkError::RetryExhausted));
        // max_retries = 1: the initial send plus exactly one refresh-retry.
        assert_eq!(transport.call_count(), 2);
        assert_eq!(tokens.refresh_count(), 1);
    }

    #[tokio::test]
    async fn server_side_rejection_of_an_unexpired_token_triggers_a_refresh() {
        let tokens = MockTokens::new(RefreshBehavior::Succeed);
        let transport = MockTransport::new(TransportMode::RejectBearer("revoked"));
        let (manager, _backend) = manager_over(
            Some(user_token("revoked", Utc::now() + Duration::hours(1))),
            tokens.clone(),
            transport.clone(),
        );

        let response = manager.send(api_request()).await.expect("retry succeeds");
        assert_eq!(response.status, 200);
        assert_eq!(tokens.refresh_count(), 1);
        assert_eq!(transport.seen_bearers(), vec!["revoked", "refreshed-token"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_requests_share_a_single_refresh_exchange() {
        let tokens = MockTokens::slow(RefreshBehavior::Succeed, StdDuration::from_millis(50));
        let transport = MockTransport::new(TransportMode::Accept);
        let (manager, _backend) =
            manager_over(Some(expired_user_token("stale")), tokens.clone(), transport.clone());

        let (first, second) = tokio::join!(manager.send(api_request()), manager.send(api_request()));
        assert_eq!(first.expect("first").status, 200);
        assert_eq!(second.expect("second").status, 200);
        // Exactly one refresh exchange; both requests rode the new token.
        assert_eq!(tokens.refresh_count(), 1);
        assert_eq!(transport.call_count(), 2);
        assert_eq!(
            transport.seen_bearers(),
            vec!["refreshed-token", "refreshed-token"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn parked_requests_replay_in_arrival_order() {
        let tokens = MockTokens::slow(RefreshBehavior::Succeed, StdDuration::from_millis(80));
        let transport = MockTransport::new(TransportMode::Accept);
        let (manager, _backend) =
            manager_over(Some(expired_user_token("stale")), tokens.clone(), transport.clone());

        // Park a batch of requests behind one slow refresh, in a known order.
        let mut sends = Vec::new();
        for i in 0..8 {
            let mgr = manager.clone();
            let path = format!("/api/2/item/{i:02}");
            sends.push(tokio::spawn(async move { mgr.send(ApiRequest::get(path)).await }));
            tokio::time::sleep(StdDuration::from_millis(3)).await;
        }
        for send in sends {
            send.await.expect("task").expect("response");
        }

        assert_eq!(tokens.refresh_count(), 1);
        let expected: Vec<String> = (0..8).map(|i| format!("/api/2/item/{i:02}")).collect();
        assert_eq!(transport.seen_paths(), expected);
    }

    #[tokio::test]
    async fn rejected_refresh_clears_state_and_fails_the_request() {
        let tokens = MockTokens::new(RefreshBehavior::Reject);
        let transport = MockTransport::new(TransportMode::Accept);
        let (manager, backend) =
            manager_over(Some(expired_user_token("stale")), tokens, transport.clone());

        let err = manager.send(api_request()).await.unwrap_err();
        assert!(err.is_authorization_rejected());
        assert_eq!(transport.call_count(), 0);
        assert!(!manager.is_authorized());
        assert_eq!(backend.held(), None);
    }

    #[tokio::test]
    async fn unreachable_refresh_keeps_the_token_for_a_later_attempt() {
        let tokens = MockTokens::new(RefreshBehavior::Unreachable);
        let transport = MockTransport::new(TransportMode::Accept);
        let (manager, backend) =
            manager_over(Some(expired_user_token("stale")), tokens.clone(), transport);

        let err = manager.send(api_request()).await.unwrap_err();
        assert!(matches!(err, SdkError::Transport(_)));
        // Still authorized: the next send may retry the exchange.
        assert!(manager.is_authorized());
        assert!(backend.held().is_some());
        assert_eq!(tokens.refresh_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn logout_during_a_refresh_fails_parked_requests_and_discards_the_result() {
        let tokens = MockTokens::slow(RefreshBehavior::Succeed, StdDuration::from_millis(50));
        let transport = MockTransport::new(TransportMode::Accept);
        let (manager, backend) =
            manager_over(Some(expired_user_token("stale")), tokens, transport.clone());

        let sender = manager.clone();
        let parked = tokio::spawn(async move { sender.send(api_request()).await });
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        manager.logout();

        let err = parked.await.expect("task").unwrap_err();
        assert!(err.is_authorization_rejected());
        assert_eq!(transport.call_count(), 0);

        // The refresh lands after the logout; its token must not resurface.
        tokio::time::sleep(StdDuration::from_millis(80)).await;
        assert!(!manager.is_authorized());
        assert_eq!(backend.held(), None);
    }

    #[tokio::test]
    async fn logout_clears_local_state_and_backends() {
        let tokens = MockTokens::new(RefreshBehavior::Succeed);
        let transport = MockTransport::new(TransportMode::Accept);
        let (manager, backend) = manager_over(
            Some(user_token("live", Utc::now() + Duration::hours(1))),
            tokens,
            transport,
        );

        assert!(manager.is_authorized());
        manager.logout();
        assert!(!manager.is_authorized());
        assert_eq!(backend.held(), None);
    }

    #[tokio::test]
    async fn authorize_with_code_installs_and_persists_the_token() {
        let tokens = MockTokens::new(RefreshBehavior::Succeed);
        let transport = MockTransport::new(TransportMode::Accept);
        let (manager, backend) = manager_over(None, tokens, transport);

        manager
            .authorize_with_code("code-from-redirect")
            .await
            .expect("exchange succeeds");
        assert!(manager.is_authorized());
        assert_eq!(manager.current_user_id().as_deref(), Some("user-1"));
        assert!(!manager.is_client_token());
        assert_eq!(
            backend.held().map(|t| t.access_token),
            Some("exchanged-token".to_string())
        );
    }

    #[tokio::test]
    async fn client_credentials_token_reports_as_client_token() {
        let tokens = MockTokens::new(RefreshBehavior::Succeed);
        let transport = MockTransport::new(TransportMode::Accept);
        let (manager, _backend) = manager_over(None, tokens, transport);

        manager
            .authorize_client_credentials()
            .await
            .expect("grant succeeds");
        assert!(manager.is_authorized());
        assert!(manager.is_client_token());
        assert_eq!(manager.current_user_id(), None);
    }

    #[tokio::test]
    async fn user_login_history_targets_the_versioned_user_path() {
        let tokens = MockTokens::new(RefreshBehavior::Succeed);
        let transport = MockTransport::new(TransportMode::Accept);
        let (manager, _backend) = manager_over(
            Some(user_token("live", Utc::now() + Duration::hours(1))),
            tokens,
            transport.clone(),
        );

        manager.get_user_logins("user-1").await.expect("response");
        assert_eq!(
            transport.seen_paths(),
            vec!["/api/2/user/user-1/logins".to_string()]
        );
    }

    #[tokio::test]
    async fn construction_restores_the_persisted_token() {
        let tokens = MockTokens::new(RefreshBehavior::Succeed);
        let transport = MockTransport::new(TransportMode::Accept);
        let expires_at = Utc::now() + Duration::hours(1);
        let (manager, _backend) =
            manager_over(Some(user_token("live", expires_at)), tokens, transport);

        assert!(manager.is_authorized());
        assert_eq!(manager.token_expires_at(), Some(expires_at));
        assert_eq!(manager.current_user_id().as_deref(), Some("user-1"));
    }
}

