//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionManager`: token lifecycle, profile hydration and the
//!   refresh-on-401 interceptor every API call goes through
//! - `KeyValueStore` and its backends: where tokens and the cached profile live
//! - `AuthError`: the failures surfaced to whoever drives the session
//!
//! Sessions are restored from storage on startup; the session status itself
//! is never persisted.

pub mod error;
mod refresh;
pub mod session;
pub mod store;
mod wire;

pub use error::AuthError;
pub use session::{RefreshState, SessionManager, SessionSnapshot, SessionStatus, Startup};
pub use store::{FileStore, KeyValueStore, KeyringStore, MemoryStore, StoreError};
