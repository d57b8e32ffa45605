use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{opt_string_or_number, string_or_number};

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// A weekly temperature program attached to one thermostat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub entries: Vec<ScheduleEntry>,
}

fn default_enabled() -> bool {
    true
}

impl Schedule {
    /// Entries ordered by day, then start time
    pub fn sorted_entries(&self) -> Vec<&ScheduleEntry> {
        let mut entries: Vec<&ScheduleEntry> = self.entries.iter().collect();
        entries.sort_by(|a, b| {
            a.day_of_week
                .cmp(&b.day_of_week)
                .then_with(|| a.start_time.cmp(&b.start_time))
        });
        entries
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    /// 0 = Sunday
    pub day_of_week: u8,
    /// Local wall-clock time, "HH:MM"
    pub start_time: String,
    pub target_temperature: f64,
}

impl ScheduleEntry {
    pub fn day_name(&self) -> &'static str {
        DAY_NAMES.get(self.day_of_week as usize).copied().unwrap_or("?")
    }
}

/// Payload for `POST {prefix}/{id}/schedules`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleInput {
    pub name: String,
    pub enabled: bool,
    pub entries: Vec<ScheduleEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calendar {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub property_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub schedule_id: Option<String>,
}

impl CalendarEvent {
    /// Whether the event is running or still ahead at `now`
    pub fn is_current_or_upcoming(&self, now: DateTime<Utc>) -> bool {
        match self.end {
            Some(end) => end > now,
            None => self.start >= now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_schedule() {
        let json = r#"{
            "id": 5,
            "name": "Winter weekdays",
            "entries": [
                {"dayOfWeek": 2, "startTime": "07:00", "targetTemperature": 21.0},
                {"dayOfWeek": 1, "startTime": "22:00", "targetTemperature": 17.5},
                {"dayOfWeek": 1, "startTime": "06:30", "targetTemperature": 20.0}
            ]
        }"#;
        let schedule: Schedule = serde_json::from_str(json).unwrap();
        assert!(schedule.enabled);

        let sorted = schedule.sorted_entries();
        assert_eq!(sorted[0].start_time, "06:30");
        assert_eq!(sorted[1].start_time, "22:00");
        assert_eq!(sorted[2].day_name(), "Tue");
    }

    #[test]
    fn test_calendar_event_window() {
        let json = r#"{"id": "e1", "title": "Guests", "start": "2026-01-10T15:00:00Z", "end": "2026-01-12T10:00:00Z", "scheduleId": 5}"#;
        let event: CalendarEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.schedule_id.as_deref(), Some("5"));

        let during = Utc.with_ymd_and_hms(2026, 1, 11, 0, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 13, 0, 0, 0).unwrap();
        assert!(event.is_current_or_upcoming(during));
        assert!(!event.is_current_or_upcoming(after));
    }
}
