use thiserror::Error;

use super::StoreError;
use crate::api::TransportError;

/// Failures reported by session operations.
///
/// `Display` is the message shown to the user; the last one is kept in
/// `SessionSnapshot::last_error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("{0}")]
    ValidationFailed(String),

    #[error("Unable to connect to server: {0}")]
    NetworkUnavailable(String),

    #[error("Your session has expired, please sign in again")]
    SessionExpired,

    #[error("Could not load your profile")]
    ProfileFetchFailed,

    #[error("Sign-in was cancelled by a newer sign-in or sign-out")]
    Superseded,

    #[error("Unexpected server response: {0}")]
    Unexpected(String),

    #[error("Session storage failed: {0}")]
    Storage(String),
}

impl AuthError {
    /// Whether the UI should send the user back to the sign-in screen
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            AuthError::SessionExpired | AuthError::ProfileFetchFailed
        )
    }
}

impl From<TransportError> for AuthError {
    fn from(e: TransportError) -> Self {
        AuthError::NetworkUnavailable(e.to_string())
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        AuthError::Storage(e.to_string())
    }
}
