//! Session lifecycle: startup hydration, login, registration and logout.
//!
//! `SessionManager` is the single source of truth for who is signed in and
//! which bearer token authorizes API calls. State changes are published on a
//! `watch` channel so a UI can follow them without polling.
//!
//! Storage layout:
//! - `auth_token`: access token, persistent store
//! - `refresh_token`: persistent store when "remember me" was requested,
//!   otherwise the session-scoped store only
//! - `cached_user`: `CachedData<UserProfile>`, persistent store

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ApiRequest, Transport};
use crate::cache::CachedData;
use crate::models::UserProfile;

use super::store::{
    KeyValueStore, MemoryStore, StoreError, AUTH_TOKEN_KEY, CACHED_USER_KEY, REFRESH_TOKEN_KEY,
    SESSION_KEYS,
};
use super::wire::{rejection_message, TokenPair};
use super::AuthError;

pub(crate) const TOKEN_PATH: &str = "/auth/token";
pub(crate) const REGISTER_PATH: &str = "/auth/register";
pub(crate) const PROFILE_PATH: &str = "/auth/profile";
pub(crate) const REFRESH_PATH: &str = "/auth/token/refresh";

/// A cached profile older than this is ignored at startup and re-fetched.
const CACHED_USER_MAX_AGE_DAYS: i64 = 30;

/// Shown when the server rejects a registration without saying why.
const REGISTRATION_FALLBACK_MESSAGE: &str = "Registration failed. Please check your details and try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    /// A stored token is being validated at startup
    Authenticating,
    Authenticated,
    Anonymous,
}

/// Token refresh state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Normal,
    Refreshing,
    /// The last refresh was rejected and the session torn down. Cleared by
    /// the next successful login.
    Failed,
}

/// What subscribers see. Tokens are deliberately not part of it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub user: Option<UserProfile>,
    pub last_error: Option<AuthError>,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }
}

/// Outcome of [`SessionManager::initialize`].
#[derive(Debug, Clone, PartialEq)]
pub enum Startup {
    /// No stored session.
    Anonymous,
    /// Restored from the cached profile without a network call. Confirm it
    /// with [`SessionManager::revalidate`].
    Provisional(UserProfile),
    /// The stored token was validated against the profile endpoint.
    Confirmed(UserProfile),
}

pub(super) struct SessionState {
    pub(super) status: SessionStatus,
    pub(super) user: Option<UserProfile>,
    pub(super) last_error: Option<AuthError>,
    pub(super) access_token: Option<String>,
    pub(super) refresh_token: Option<String>,
    /// Whether the refresh token belongs in the persistent store
    pub(super) remember_me: bool,
    pub(super) refresh: RefreshState,
    /// Bumped by logout and by every committed login. Async work compares
    /// the value it started with before committing anything.
    pub(super) generation: u64,
}

impl SessionState {
    fn new() -> Self {
        Self {
            status: SessionStatus::Uninitialized,
            user: None,
            last_error: None,
            access_token: None,
            refresh_token: None,
            remember_me: false,
            refresh: RefreshState::Normal,
            generation: 0,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            user: self.user.clone(),
            last_error: self.last_error.clone(),
        }
    }

    /// Signed out, with nothing in flight.
    pub(super) fn reset(&mut self) {
        self.status = SessionStatus::Anonymous;
        self.user = None;
        self.access_token = None;
        self.refresh_token = None;
        self.remember_me = false;
        self.refresh = RefreshState::Normal;
    }
}

pub struct SessionManager {
    pub(super) transport: Arc<dyn Transport>,
    persistent: Arc<dyn KeyValueStore>,
    session_store: Arc<dyn KeyValueStore>,
    state: Mutex<SessionState>,
    updates: watch::Sender<SessionSnapshot>,
    login_gate: tokio::sync::Mutex<()>,
    pub(super) refresh_gate: tokio::sync::Mutex<()>,
}

impl SessionManager {
    /// Create a session manager whose session-scoped store lives in memory
    /// for the lifetime of the process.
    pub fn new(transport: Arc<dyn Transport>, persistent: Arc<dyn KeyValueStore>) -> Self {
        Self::with_session_store(transport, persistent, Arc::new(MemoryStore::new()))
    }

    pub fn with_session_store(
        transport: Arc<dyn Transport>,
        persistent: Arc<dyn KeyValueStore>,
        session_store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let state = SessionState::new();
        let (updates, _) = watch::channel(state.snapshot());
        Self {
            transport,
            persistent,
            session_store,
            state: Mutex::new(state),
            updates,
            login_gate: tokio::sync::Mutex::new(()),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    // =========================================================================
    // State access
    // =========================================================================

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock_state().snapshot()
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.updates.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.lock_state().status
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.lock_state().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.status() == SessionStatus::Authenticated
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.lock_state().refresh
    }

    pub(super) fn access_token(&self) -> Option<String> {
        self.lock_state().access_token.clone()
    }

    pub(super) fn generation(&self) -> u64 {
        self.lock_state().generation
    }

    pub(super) fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mutate state and publish the resulting snapshot. Storage writes made
    /// inside `f` happen under the same lock, so they cannot interleave with
    /// a concurrent logout.
    pub(super) fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.lock_state();
        let result = f(&mut state);
        self.updates.send_replace(state.snapshot());
        result
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Restore the session from storage.
    ///
    /// With a fresh cached profile this returns [`Startup::Provisional`]
    /// immediately; without one the stored token is validated first.
    pub async fn initialize(&self) -> Result<Startup, AuthError> {
        let access_token = self.read(&*self.persistent, AUTH_TOKEN_KEY);
        let (refresh_token, remember_me) = match self.read(&*self.persistent, REFRESH_TOKEN_KEY) {
            Some(token) => (Some(token), true),
            None => (self.read(&*self.session_store, REFRESH_TOKEN_KEY), false),
        };
        let cached_user = self.read_cached_user();

        let Some(access_token) = access_token else {
            self.update(|state| {
                if refresh_token.is_some() || cached_user.is_some() {
                    warn!("Discarding session data stored without an access token");
                    self.erase_all();
                }
                state.reset();
            });
            debug!("No stored session");
            return Ok(Startup::Anonymous);
        };

        if let Some(user) = cached_user {
            info!(user_id = %user.id, "Restored cached session");
            self.update(|state| {
                state.access_token = Some(access_token);
                state.refresh_token = refresh_token;
                state.remember_me = remember_me;
                state.user = Some(user.clone());
                state.status = SessionStatus::Authenticated;
                state.refresh = RefreshState::Normal;
            });
            return Ok(Startup::Provisional(user));
        }

        debug!("Stored token without cached profile, validating");
        let generation = self.update(|state| {
            state.access_token = Some(access_token);
            state.refresh_token = refresh_token;
            state.remember_me = remember_me;
            state.user = None;
            state.status = SessionStatus::Authenticating;
            state.refresh = RefreshState::Normal;
            state.generation
        });

        match self.fetch_profile().await {
            Ok(user) => {
                if !self.commit_profile(generation, &user) {
                    return Err(AuthError::Superseded);
                }
                info!(user_id = %user.id, "Stored session validated");
                Ok(Startup::Confirmed(user))
            }
            Err(e) => Err(self.validation_failed(generation, e, false)),
        }
    }

    /// Second phase of a provisional startup: confirm the stored token by
    /// fetching the profile, or tear the session down if it was revoked.
    ///
    /// A transport failure keeps the provisional session.
    pub async fn revalidate(&self) -> Result<UserProfile, AuthError> {
        let generation = self.generation();
        if self.access_token().is_none() {
            return Err(AuthError::SessionExpired);
        }

        match self.fetch_profile().await {
            Ok(user) => {
                if !self.commit_profile(generation, &user) {
                    debug!("Revalidation result discarded");
                    return Err(AuthError::Superseded);
                }
                debug!(user_id = %user.id, "Session revalidated");
                Ok(user)
            }
            Err(e) => Err(self.validation_failed(generation, e, true)),
        }
    }

    /// Run [`revalidate`](Self::revalidate) as a background task.
    pub fn spawn_revalidation(self: &Arc<Self>) -> JoinHandle<Result<UserProfile, AuthError>> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.revalidate().await })
    }

    async fn fetch_profile(&self) -> Result<UserProfile, ApiError> {
        let response = self.execute(ApiRequest::get(PROFILE_PATH)).await?;
        if !response.is_success() {
            return Err(ApiError::from_status(response.status, &response.body));
        }
        response
            .json()
            .map_err(|e| ApiError::InvalidResponse(format!("profile: {}", e)))
    }

    fn commit_profile(&self, generation: u64, user: &UserProfile) -> bool {
        self.update(|state| {
            if state.generation != generation || state.access_token.is_none() {
                return false;
            }
            state.user = Some(user.clone());
            state.status = SessionStatus::Authenticated;
            state.last_error = None;
            self.write_cached_user(user);
            true
        })
    }

    /// Map a failed profile validation onto the session and the caller's error.
    fn validation_failed(&self, generation: u64, error: ApiError, provisional: bool) -> AuthError {
        let rejected = matches!(error, ApiError::Unauthorized | ApiError::AccessDenied(_));
        let reported = if rejected {
            AuthError::SessionExpired
        } else if error.is_network() {
            AuthError::NetworkUnavailable(error.to_string())
        } else {
            AuthError::Unexpected(error.to_string())
        };

        self.update(|state| {
            if state.generation != generation {
                // A failed refresh already ended the session; anything else
                // means a newer login or logout owns the state now.
                return if state.refresh == RefreshState::Failed {
                    AuthError::SessionExpired
                } else {
                    AuthError::Superseded
                };
            }

            if rejected {
                warn!(error = %error, "Stored session rejected by server");
                self.erase_all();
                state.reset();
                state.generation += 1;
            } else if provisional {
                warn!(error = %error, "Could not revalidate session, keeping cached profile");
            } else {
                // Leave storage alone so a later start can retry
                warn!(error = %error, "Could not validate stored session");
                state.reset();
            }
            state.last_error = Some(reported.clone());
            reported
        })
    }

    // =========================================================================
    // Login / registration / logout
    // =========================================================================

    /// Exchange credentials for a token pair and load the profile.
    ///
    /// Concurrent calls are serialized. On failure the status is left as it
    /// was and the error is recorded in `last_error`. If the tokens cannot be
    /// persisted the partial session is cleared and `AuthError::Storage` is
    /// returned.
    pub async fn login(&self, email: &str, password: &str, remember_me: bool) -> Result<UserProfile, AuthError> {
        let _gate = self.login_gate.lock().await;

        let generation = self.update(|state| {
            state.last_error = None;
            state.generation
        });

        let (tokens, user) = match self.exchange_credentials(email, password).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.record_error(generation, &e);
                return Err(e);
            }
        };

        let committed = self.update(|state| {
            if state.generation != generation {
                return Ok(false);
            }
            if let Err(e) = self.persist_tokens(&tokens, remember_me) {
                self.erase_all();
                state.reset();
                state.generation += 1;
                let error = AuthError::from(e);
                state.last_error = Some(error.clone());
                return Err(error);
            }
            self.write_cached_user(&user);

            state.access_token = Some(tokens.access_token);
            state.refresh_token = Some(tokens.refresh_token);
            state.remember_me = remember_me;
            state.user = Some(user.clone());
            state.status = SessionStatus::Authenticated;
            state.refresh = RefreshState::Normal;
            state.last_error = None;
            state.generation += 1;
            Ok(true)
        });

        let committed = match committed {
            Ok(committed) => committed,
            Err(e) => {
                warn!(error = %e, "Login succeeded but the session could not be saved");
                return Err(e);
            }
        };
        if !committed {
            info!("Login result discarded after logout");
            return Err(AuthError::Superseded);
        }

        info!(user_id = %user.id, remember_me, "Login successful");
        Ok(user)
    }

    async fn exchange_credentials(&self, email: &str, password: &str) -> Result<(TokenPair, UserProfile), AuthError> {
        let request = ApiRequest::post(TOKEN_PATH).with_body(json!({
            "email": email,
            "password": password,
        }));
        let response = self.transport.send(&request).await?;

        match response.status {
            status if status.is_success() => {}
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AuthError::InvalidCredentials);
            }
            status => {
                return Err(AuthError::Unexpected(format!("login returned {}", status)));
            }
        }

        let tokens: TokenPair = response
            .json()
            .map_err(|e| AuthError::Unexpected(format!("malformed token response: {}", e)))?;

        let request = ApiRequest::get(PROFILE_PATH).with_bearer(tokens.access_token.clone());
        let response = self.transport.send(&request).await?;

        match response.status {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(AuthError::ProfileFetchFailed),
            status => {
                return Err(AuthError::Unexpected(format!("profile returned {}", status)));
            }
        }

        let user: UserProfile = response.json().map_err(|e| {
            warn!(error = %e, "Malformed profile response");
            AuthError::ProfileFetchFailed
        })?;

        Ok((tokens, user))
    }

    /// Create an account. Does not sign in; call [`login`](Self::login) afterwards.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<(), AuthError> {
        let generation = self.update(|state| {
            state.last_error = None;
            state.generation
        });

        let request = ApiRequest::post(REGISTER_PATH).with_body(json!({
            "email": email,
            "password": password,
            "firstName": first_name,
            "lastName": last_name,
        }));

        let result = match self.transport.send(&request).await {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => match response.status {
                StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                    let message = rejection_message(&response.body)
                        .unwrap_or_else(|| REGISTRATION_FALLBACK_MESSAGE.to_string());
                    Err(AuthError::ValidationFailed(message))
                }
                status => Err(AuthError::Unexpected(format!("registration returned {}", status))),
            },
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => info!("Registration accepted"),
            Err(ref e) => {
                warn!(error = %e, "Registration failed");
                self.record_error(generation, e);
            }
        }
        result
    }

    /// Forget the session everywhere. Never fails; calling it twice is the
    /// same as calling it once.
    pub fn logout(&self) {
        self.update(|state| {
            self.erase_all();
            state.reset();
            state.last_error = None;
            state.generation += 1;
        });
        info!("Logged out");
    }

    /// Attach the current access token, if any, as a bearer credential.
    pub fn authorize_request(&self, request: ApiRequest) -> ApiRequest {
        match self.access_token() {
            Some(token) => request.with_bearer(token),
            None => request,
        }
    }

    fn record_error(&self, generation: u64, error: &AuthError) {
        self.update(|state| {
            if state.generation == generation {
                state.last_error = Some(error.clone());
            }
        });
    }

    // =========================================================================
    // Storage helpers
    // =========================================================================

    fn read(&self, store: &dyn KeyValueStore, key: &str) -> Option<String> {
        match store.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key, error = %e, "Failed to read session storage");
                None
            }
        }
    }

    fn write(&self, store: &dyn KeyValueStore, key: &str, value: &str) {
        if let Err(e) = store.set(key, value) {
            warn!(key, error = %e, "Failed to write session storage");
        }
    }

    fn erase(&self, store: &dyn KeyValueStore, key: &str) {
        if let Err(e) = store.remove(key) {
            warn!(key, error = %e, "Failed to clear session storage");
        }
    }

    pub(super) fn erase_all(&self) {
        for key in SESSION_KEYS {
            self.erase(&*self.persistent, key);
            self.erase(&*self.session_store, key);
        }
    }

    pub(super) fn persist_access_token(&self, token: &str) {
        self.write(&*self.persistent, AUTH_TOKEN_KEY, token);
    }

    fn persist_tokens(&self, tokens: &TokenPair, remember_me: bool) -> Result<(), StoreError> {
        self.persistent.set(AUTH_TOKEN_KEY, &tokens.access_token)?;
        self.store_refresh_token(&tokens.refresh_token, remember_me)
    }

    /// Remembered refresh tokens go to the persistent store, others only to
    /// the session-scoped one.
    pub(super) fn store_refresh_token(&self, token: &str, remember_me: bool) -> Result<(), StoreError> {
        if remember_me {
            self.persistent.set(REFRESH_TOKEN_KEY, token)?;
            self.erase(&*self.session_store, REFRESH_TOKEN_KEY);
        } else {
            self.session_store.set(REFRESH_TOKEN_KEY, token)?;
            self.erase(&*self.persistent, REFRESH_TOKEN_KEY);
        }
        Ok(())
    }

    fn write_cached_user(&self, user: &UserProfile) {
        match serde_json::to_string(&CachedData::new(user)) {
            Ok(serialized) => self.write(&*self.persistent, CACHED_USER_KEY, &serialized),
            Err(e) => warn!(error = %e, "Failed to serialize cached profile"),
        }
    }

    fn read_cached_user(&self) -> Option<UserProfile> {
        let raw = self.read(&*self.persistent, CACHED_USER_KEY)?;
        let cached: CachedData<UserProfile> = match serde_json::from_str(&raw) {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable cached profile");
                return None;
            }
        };
        if cached.is_older_than(Duration::days(CACHED_USER_MAX_AGE_DAYS)) {
            debug!(cached_at = %cached.cached_at, "Cached profile is stale");
            return None;
        }
        Some(cached.data)
    }
}
