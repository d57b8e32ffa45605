//! Refresh-on-401 interceptor.
//!
//! Every authorized call goes through [`SessionManager::execute`]. When the
//! server answers 401 the refresh token is exchanged for a new access token
//! and the request is replayed exactly once. A rejected (or unanswered)
//! refresh ends the session and the caller gets the original
//! `ApiError::Unauthorized`.
//!
//! Refreshes are serialized: a request that queued behind another refresh
//! and finds the access token already replaced just replays with the new one.

use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ApiRequest, ApiResponse};

use super::session::{RefreshState, SessionManager, REFRESH_PATH};
use super::wire::RenewedToken;
use super::AuthError;

impl SessionManager {
    /// Authorize, send, and recover from an expired access token.
    ///
    /// Any response other than 401 is returned as-is, whatever its status.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let request = self.authorize_request(request);
        let response = self.transport.send(&request).await?;
        if response.status == StatusCode::UNAUTHORIZED {
            debug!(path = %request.path, "Request unauthorized");
            return self.handle_unauthorized(request).await;
        }
        Ok(response)
    }

    /// Run the refresh protocol for a request that came back 401.
    pub async fn handle_unauthorized(&self, failed: ApiRequest) -> Result<ApiResponse, ApiError> {
        if failed.retried {
            warn!(path = %failed.path, "Replayed request still unauthorized");
            return Err(ApiError::Unauthorized);
        }

        let gate = self.refresh_gate.lock().await;

        let (current, refresh_token, generation) = {
            let state = self.lock_state();
            (state.access_token.clone(), state.refresh_token.clone(), state.generation)
        };

        let Some(current) = current else {
            debug!(path = %failed.path, "No session to refresh");
            return Err(ApiError::Unauthorized);
        };

        if failed.bearer.as_deref() != Some(current.as_str()) {
            drop(gate);
            debug!(path = %failed.path, "Access token already renewed, replaying");
            return self.replay(failed, current).await;
        }

        let Some(refresh_token) = refresh_token else {
            warn!("Access token rejected and no refresh token available");
            self.fail_refresh(generation);
            return Err(ApiError::Unauthorized);
        };

        self.update(|state| {
            if state.generation == generation {
                state.refresh = RefreshState::Refreshing;
            }
        });

        match self.request_new_token(&refresh_token).await {
            Ok(renewed) => {
                let access_token = renewed.access_token.clone();
                if !self.commit_refresh(generation, renewed) {
                    debug!("Refreshed token discarded after logout");
                    return Err(ApiError::Unauthorized);
                }
                drop(gate);
                info!("Access token refreshed");
                self.replay(failed, access_token).await
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                self.fail_refresh(generation);
                Err(ApiError::Unauthorized)
            }
        }
    }

    async fn request_new_token(&self, refresh_token: &str) -> Result<RenewedToken, ApiError> {
        let request = ApiRequest::post(REFRESH_PATH).with_body(json!({
            "refreshToken": refresh_token,
        }));
        let response = self.transport.send(&request).await?;
        if !response.is_success() {
            return Err(ApiError::from_status(response.status, &response.body));
        }
        response
            .json()
            .map_err(|e| ApiError::InvalidResponse(format!("refresh: {}", e)))
    }

    fn commit_refresh(&self, generation: u64, renewed: RenewedToken) -> bool {
        self.update(|state| {
            if state.generation != generation || state.access_token.is_none() {
                return false;
            }
            self.persist_access_token(&renewed.access_token);
            if let Some(rotated) = renewed.refresh_token {
                if let Err(e) = self.store_refresh_token(&rotated, state.remember_me) {
                    warn!(error = %e, "Failed to persist rotated refresh token");
                }
                state.refresh_token = Some(rotated);
            }
            state.access_token = Some(renewed.access_token);
            state.refresh = RefreshState::Normal;
            true
        })
    }

    /// Same teardown as logout, but remembered as a failed refresh.
    fn fail_refresh(&self, generation: u64) {
        self.update(|state| {
            if state.generation != generation {
                return;
            }
            self.erase_all();
            state.reset();
            state.generation += 1;
            state.refresh = RefreshState::Failed;
            state.last_error = Some(AuthError::SessionExpired);
        });
    }

    /// Send the request once more with `token`. A second 401 is final.
    async fn replay(&self, failed: ApiRequest, token: String) -> Result<ApiResponse, ApiError> {
        let mut request = failed;
        request.bearer = Some(token);
        request.retried = true;

        let response = self.transport.send(&request).await?;
        if response.status == StatusCode::UNAUTHORIZED {
            warn!(path = %request.path, "Replayed request still unauthorized");
            return Err(ApiError::Unauthorized);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;

    use crate::api::ApiError;
    use crate::auth::session::{PROFILE_PATH, TOKEN_PATH};
    use crate::auth::store::{KeyValueStore, AUTH_TOKEN_KEY, REFRESH_TOKEN_KEY};
    use crate::auth::{AuthError, RefreshState, SessionStatus};
    use crate::testing::{Harness, PROFILE_JSON};

    use super::*;

    const PROPERTIES: &str = "/properties";

    async fn signed_in(refresh_token: &str) -> Harness {
        let h = Harness::new();
        h.transport.reply(
            Method::POST,
            TOKEN_PATH,
            200,
            &format!(r#"{{"accessToken": "A1", "refreshToken": "{}"}}"#, refresh_token),
        );
        h.transport.reply(Method::GET, PROFILE_PATH, 200, PROFILE_JSON);
        h.manager.login("pat@example.com", "pw", true).await.unwrap();
        h
    }

    #[tokio::test]
    async fn test_refresh_success_replays_with_new_token() {
        let h = signed_in("R1").await;
        h.transport.reply(Method::GET, PROPERTIES, 401, "");
        h.transport.reply(Method::GET, PROPERTIES, 200, "[]");
        h.transport.reply(Method::POST, REFRESH_PATH, 200, r#"{"accessToken": "A2"}"#);

        let response = h.manager.execute(ApiRequest::get(PROPERTIES)).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, "[]");

        let refresh = h.transport.last(Method::POST, REFRESH_PATH).unwrap();
        assert_eq!(refresh.body.unwrap()["refreshToken"], "R1");

        let replayed = h.transport.last(Method::GET, PROPERTIES).unwrap();
        assert_eq!(replayed.bearer.as_deref(), Some("A2"));
        assert!(replayed.retried);

        assert_eq!(h.persistent.get(AUTH_TOKEN_KEY).unwrap().as_deref(), Some("A2"));
        assert_eq!(h.persistent.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R1"));
        assert_eq!(h.manager.refresh_state(), RefreshState::Normal);
        assert_eq!(h.manager.status(), SessionStatus::Authenticated);
    }

    #[tokio::test]
    async fn test_refresh_stores_rotated_refresh_token() {
        let h = signed_in("R1").await;
        h.transport.reply(Method::GET, PROPERTIES, 401, "");
        h.transport.reply(Method::GET, PROPERTIES, 200, "[]");
        h.transport.reply(
            Method::POST,
            REFRESH_PATH,
            200,
            r#"{"accessToken": "A2", "refreshToken": "R2"}"#,
        );

        h.manager.execute(ApiRequest::get(PROPERTIES)).await.unwrap();
        assert_eq!(h.persistent.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn test_refresh_rejected_ends_session() {
        let h = signed_in("R1").await;
        h.transport.reply(Method::GET, PROPERTIES, 401, "");
        h.transport.reply(Method::POST, REFRESH_PATH, 401, r#"{"detail": "token revoked"}"#);

        let err = h.manager.execute(ApiRequest::get(PROPERTIES)).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));

        let snapshot = h.manager.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Anonymous);
        assert!(snapshot.user.is_none());
        assert_eq!(snapshot.last_error, Some(AuthError::SessionExpired));
        assert_eq!(h.manager.refresh_state(), RefreshState::Failed);
        assert!(h.persistent.is_empty());
        assert!(h.session_store.is_empty());
        assert_eq!(h.transport.count(Method::GET, PROPERTIES), 1);
    }

    #[tokio::test]
    async fn test_refresh_unreachable_fails_closed() {
        let h = signed_in("R1").await;
        h.transport.reply(Method::GET, PROPERTIES, 401, "");
        h.transport.unreachable(Method::POST, REFRESH_PATH);

        let err = h.manager.execute(ApiRequest::get(PROPERTIES)).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(h.manager.status(), SessionStatus::Anonymous);
        assert!(h.persistent.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_refresh_response_fails_closed() {
        let h = signed_in("R1").await;
        h.transport.reply(Method::GET, PROPERTIES, 401, "");
        h.transport.reply(Method::POST, REFRESH_PATH, 200, r#"{"token": "A2"}"#);

        let err = h.manager.execute(ApiRequest::get(PROPERTIES)).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(h.manager.refresh_state(), RefreshState::Failed);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_ends_session() {
        let h = Harness::new();
        h.persistent.set(AUTH_TOKEN_KEY, "A1").unwrap();
        h.transport.reply(Method::GET, PROFILE_PATH, 200, PROFILE_JSON);
        h.manager.initialize().await.unwrap();

        h.transport.reply(Method::GET, PROPERTIES, 401, "");
        let err = h.manager.execute(ApiRequest::get(PROPERTIES)).await.unwrap_err();

        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(h.transport.count(Method::POST, REFRESH_PATH), 0);
        assert_eq!(h.manager.status(), SessionStatus::Anonymous);
        assert!(h.persistent.is_empty());
    }

    #[tokio::test]
    async fn test_replayed_401_does_not_refresh_again() {
        let h = signed_in("R1").await;
        h.transport.reply(Method::GET, PROPERTIES, 401, "");
        h.transport.reply(Method::POST, REFRESH_PATH, 200, r#"{"accessToken": "A2"}"#);

        let err = h.manager.execute(ApiRequest::get(PROPERTIES)).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(h.transport.count(Method::POST, REFRESH_PATH), 1);
        assert_eq!(h.transport.count(Method::GET, PROPERTIES), 2);
    }

    #[tokio::test]
    async fn test_retried_request_is_not_refreshed() {
        let h = signed_in("R1").await;
        let mut request = h.manager.authorize_request(ApiRequest::get(PROPERTIES));
        request.retried = true;

        let err = h.manager.handle_unauthorized(request).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert!(h.transport.requests().iter().all(|r| r.path != REFRESH_PATH));
        assert_eq!(h.manager.status(), SessionStatus::Authenticated);
    }

    #[tokio::test]
    async fn test_anonymous_401_leaves_state_alone() {
        let h = Harness::new();
        h.manager.initialize().await.unwrap();
        h.transport.reply(Method::GET, PROPERTIES, 401, "");

        let err = h.manager.execute(ApiRequest::get(PROPERTIES)).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert!(h.transport.last(Method::GET, PROPERTIES).unwrap().bearer.is_none());
        assert_eq!(h.manager.refresh_state(), RefreshState::Normal);
        assert_eq!(h.manager.snapshot().last_error, None);
    }

    #[tokio::test]
    async fn test_non_401_errors_pass_through() {
        let h = signed_in("R1").await;
        h.transport.reply(Method::GET, PROPERTIES, 500, "boom");

        let response = h.manager.execute(ApiRequest::get(PROPERTIES)).await.unwrap();
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(h.transport.count(Method::POST, REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let h = signed_in("R1").await;
        h.transport.reply(Method::GET, PROPERTIES, 401, "");
        h.transport.reply(Method::GET, PROPERTIES, 401, "");
        h.transport.reply(Method::GET, PROPERTIES, 200, "[]");
        h.transport.reply(Method::POST, REFRESH_PATH, 200, r#"{"accessToken": "A2"}"#);
        let release = h.transport.hold(Method::POST, REFRESH_PATH);

        let transport = h.transport.clone();
        let (first, second, _) = tokio::join!(
            h.manager.execute(ApiRequest::get(PROPERTIES)),
            h.manager.execute(ApiRequest::get(PROPERTIES)),
            async move {
                while transport.count(Method::POST, REFRESH_PATH) == 0
                    || transport.count(Method::GET, PROPERTIES) < 2
                {
                    tokio::task::yield_now().await;
                }
                release.notify_one();
            }
        );

        assert_eq!(first.unwrap().status, StatusCode::OK);
        assert_eq!(second.unwrap().status, StatusCode::OK);
        assert_eq!(h.transport.count(Method::POST, REFRESH_PATH), 1);
        assert!(h
            .transport
            .requests()
            .iter()
            .filter(|r| r.path == PROPERTIES && r.retried)
            .all(|r| r.bearer.as_deref() == Some("A2")));
    }

    #[tokio::test]
    async fn test_logout_during_refresh_discards_new_token() {
        let h = signed_in("R1").await;
        h.transport.reply(Method::GET, PROPERTIES, 401, "");
        h.transport.reply(Method::POST, REFRESH_PATH, 200, r#"{"accessToken": "A2"}"#);
        let release = h.transport.hold(Method::POST, REFRESH_PATH);

        let manager = h.manager.clone();
        let call = tokio::spawn(async move { manager.execute(ApiRequest::get(PROPERTIES)).await });

        while h.transport.count(Method::POST, REFRESH_PATH) == 0 {
            tokio::task::yield_now().await;
        }
        h.manager.logout();
        release.notify_one();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(h.manager.status(), SessionStatus::Anonymous);
        assert_eq!(h.manager.refresh_state(), RefreshState::Normal);
        assert!(h.persistent.get(AUTH_TOKEN_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_after_failed_refresh_resets_machine() {
        let h = signed_in("R1").await;
        h.transport.reply(Method::GET, PROPERTIES, 401, "");
        h.transport.reply(Method::POST, REFRESH_PATH, 401, "");
        h.manager.execute(ApiRequest::get(PROPERTIES)).await.unwrap_err();
        assert_eq!(h.manager.refresh_state(), RefreshState::Failed);

        h.transport.reply(Method::POST, TOKEN_PATH, 200, r#"{"accessToken": "A3", "refreshToken": "R3"}"#);
        h.manager.login("pat@example.com", "pw", true).await.unwrap();
        assert_eq!(h.manager.refresh_state(), RefreshState::Normal);
        assert_eq!(h.manager.snapshot().last_error, None);
    }
}
