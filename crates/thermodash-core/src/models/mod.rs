//! Data models for thermostat dashboard entities.
//!
//! This module contains the data structures exchanged with the API:
//!
//! - `UserProfile`: the signed-in account
//! - `Property`: a building that owns thermostats and calendars
//! - `Thermostat`, `Brand`: devices and the brand-to-path lookup table
//! - `Schedule`, `Calendar`, `CalendarEvent`: temperature programs

pub mod property;
pub mod schedule;
pub mod thermostat;
pub mod user;

pub use property::{Property, PropertyInput};
pub use schedule::{Calendar, CalendarEvent, Schedule, ScheduleEntry, ScheduleInput};
pub use thermostat::{thermostat_path, Brand, TargetUpdate, Thermostat, ThermostatMode};
pub use user::UserProfile;

use serde::{Deserialize, Deserializer};

/// Accept identifiers sent either as JSON strings or numbers.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Same as [`string_or_number`] for optional fields.
pub(crate) fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "string_or_number")] String);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
}
