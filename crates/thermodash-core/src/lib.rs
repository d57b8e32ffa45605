//! Thermodash core - session management and API client for the thermostat
//! dashboard service.
//!
//! The [`SessionManager`] owns the signed-in state and every token; the
//! [`ApiClient`] sends resource calls through it so expired access tokens are
//! refreshed without the caller noticing.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthError, SessionManager, SessionSnapshot, SessionStatus, Startup};
pub use config::{Config, StorageBackend};
