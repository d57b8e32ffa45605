//! API client for the thermostat dashboard REST API.
//!
//! `ApiClient` issues every call through [`SessionManager::execute`], so the
//! bearer token is attached and refreshed without the caller's involvement.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::SessionManager;
use crate::models::{
    thermostat_path, Brand, Calendar, CalendarEvent, Property, PropertyInput, Schedule,
    ScheduleInput, TargetUpdate, Thermostat, ThermostatMode,
};

use super::{ApiError, ApiRequest, ApiResponse};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// List endpoints answer either a bare array or a paged envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Items(Vec<T>),
    Page {
        #[serde(alias = "data", alias = "items")]
        results: Vec<T>,
    },
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Items(items) => items,
            Listing::Page { results } => results,
        }
    }
}

/// Clone is cheap - the session manager is shared.
#[derive(Clone)]
pub struct ApiClient {
    session: Arc<SessionManager>,
}

impl ApiClient {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Send through the session, backing off on 429 and mapping error statuses.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self.session.execute(request.clone()).await?;

            if response.status == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(path = %request.path, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2; // Exponential backoff
                continue;
            }

            return Self::check_response(response);
        }
    }

    fn check_response(response: ApiResponse) -> Result<ApiResponse, ApiError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_status(response.status, &response.body))
        }
    }

    fn parse<T: DeserializeOwned>(response: &ApiResponse, path: &str) -> Result<T, ApiError> {
        response
            .json()
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", path, e)))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(ApiRequest::get(path)).await?;
        Self::parse(&response, path)
    }

    async fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ApiError> {
        let listing: Listing<T> = self.get(path).await?;
        let items = listing.into_vec();
        debug!(path, count = items.len(), "Fetched list");
        Ok(items)
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let request = ApiRequest::post(path).with_body(serde_json::to_value(body)?);
        let response = self.send(request).await?;
        Self::parse(&response, path)
    }

    async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let request = ApiRequest::put(path).with_body(serde_json::to_value(body)?);
        let response = self.send(request).await?;
        Self::parse(&response, path)
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send(ApiRequest::delete(path)).await?;
        Ok(())
    }

    // ===== Properties =====

    pub async fn fetch_properties(&self) -> Result<Vec<Property>, ApiError> {
        self.list("/properties").await
    }

    pub async fn fetch_property(&self, property_id: &str) -> Result<Property, ApiError> {
        self.get(&format!("/properties/{}", property_id)).await
    }

    pub async fn create_property(&self, input: &PropertyInput) -> Result<Property, ApiError> {
        self.post("/properties", input).await
    }

    pub async fn update_property(&self, property_id: &str, input: &PropertyInput) -> Result<Property, ApiError> {
        self.put(&format!("/properties/{}", property_id), input).await
    }

    pub async fn delete_property(&self, property_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/properties/{}", property_id)).await
    }

    // ===== Thermostats =====

    pub async fn fetch_thermostats(&self, property_id: &str) -> Result<Vec<Thermostat>, ApiError> {
        self.list(&format!("/properties/{}/thermostats", property_id)).await
    }

    pub async fn fetch_thermostat(&self, brand: Brand, thermostat_id: &str) -> Result<Thermostat, ApiError> {
        self.get(&thermostat_path(brand, thermostat_id, None)).await
    }

    /// Set the target temperature, optionally switching mode
    pub async fn set_target_temperature(
        &self,
        brand: Brand,
        thermostat_id: &str,
        target_temperature: f64,
        mode: Option<ThermostatMode>,
    ) -> Result<Thermostat, ApiError> {
        let update = TargetUpdate {
            target_temperature,
            mode,
        };
        self.put(&thermostat_path(brand, thermostat_id, Some("target")), &update)
            .await
    }

    // ===== Schedules =====

    pub async fn fetch_schedules(&self, brand: Brand, thermostat_id: &str) -> Result<Vec<Schedule>, ApiError> {
        self.list(&thermostat_path(brand, thermostat_id, Some("schedules"))).await
    }

    pub async fn create_schedule(
        &self,
        brand: Brand,
        thermostat_id: &str,
        input: &ScheduleInput,
    ) -> Result<Schedule, ApiError> {
        self.post(&thermostat_path(brand, thermostat_id, Some("schedules")), input)
            .await
    }

    pub async fn delete_schedule(&self, schedule_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/schedules/{}", schedule_id)).await
    }

    // ===== Calendars =====

    pub async fn fetch_calendars(&self, property_id: &str) -> Result<Vec<Calendar>, ApiError> {
        self.list(&format!("/properties/{}/calendars", property_id)).await
    }

    pub async fn fetch_calendar_events(&self, calendar_id: &str) -> Result<Vec<CalendarEvent>, ApiError> {
        self.list(&format!("/calendars/{}/events", calendar_id)).await
    }
}
