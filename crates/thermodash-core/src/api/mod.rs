//! REST API client module for the thermostat dashboard service.
//!
//! This module provides:
//! - `Transport`: the HTTP seam every request goes through
//! - `ApiClient`: typed calls for properties, thermostats, schedules and calendars
//!
//! All resource calls are issued through the session manager, which attaches
//! the bearer token and transparently refreshes it on a 401.

pub mod client;
pub mod error;
pub mod transport;

pub use client::ApiClient;
pub use error::ApiError;
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport, TransportError};
