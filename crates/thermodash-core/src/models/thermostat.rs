use std::fmt;

use serde::{Deserialize, Serialize};

use super::{opt_string_or_number, string_or_number};

/// Thermostat manufacturer. Brands only differ in the API path their
/// devices live under, see [`Brand::path_prefix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Brand {
    Nest,
    Cielo,
    Pioneer,
    #[default]
    Generic,
}

/// Brand, wire name, path prefix.
const BRAND_PATHS: &[(Brand, &str, &str)] = &[
    (Brand::Nest, "nest", "/nest/thermostats"),
    (Brand::Cielo, "cielo", "/cielo/thermostats"),
    (Brand::Pioneer, "pioneer", "/pioneer/thermostats"),
    (Brand::Generic, "generic", "/thermostats"),
];

const GENERIC_PREFIX: &str = "/thermostats";

impl Brand {
    pub const ALL: [Brand; 4] = [Brand::Nest, Brand::Cielo, Brand::Pioneer, Brand::Generic];

    /// Case-insensitive lookup; unknown brands are served by the generic endpoints.
    pub fn parse(name: &str) -> Brand {
        let name = name.trim();
        BRAND_PATHS
            .iter()
            .find(|(_, wire, _)| wire.eq_ignore_ascii_case(name))
            .map(|(brand, _, _)| *brand)
            .unwrap_or(Brand::Generic)
    }

    pub fn as_str(self) -> &'static str {
        BRAND_PATHS
            .iter()
            .find(|(brand, _, _)| *brand == self)
            .map(|(_, wire, _)| *wire)
            .unwrap_or("generic")
    }

    pub fn path_prefix(self) -> &'static str {
        BRAND_PATHS
            .iter()
            .find(|(brand, _, _)| *brand == self)
            .map(|(_, _, prefix)| *prefix)
            .unwrap_or(GENERIC_PREFIX)
    }
}

impl From<String> for Brand {
    fn from(value: String) -> Self {
        Brand::parse(&value)
    }
}

impl From<Brand> for String {
    fn from(brand: Brand) -> Self {
        brand.as_str().to_string()
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Path to a brand-specific thermostat resource, e.g.
/// `thermostat_path(Brand::Nest, "7", Some("target"))` -> `/nest/thermostats/7/target`.
pub fn thermostat_path(brand: Brand, id: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) => format!("{}/{}/{}", brand.path_prefix(), id, suffix.trim_start_matches('/')),
        None => format!("{}/{}", brand.path_prefix(), id),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ThermostatMode {
    Heat,
    Cool,
    Auto,
    Off,
    Fan,
    Other(String),
}

impl From<String> for ThermostatMode {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "heat" => ThermostatMode::Heat,
            "cool" => ThermostatMode::Cool,
            "auto" | "heat_cool" | "heatcool" => ThermostatMode::Auto,
            "off" => ThermostatMode::Off,
            "fan" | "fan_only" => ThermostatMode::Fan,
            _ => ThermostatMode::Other(value),
        }
    }
}

impl From<ThermostatMode> for String {
    fn from(mode: ThermostatMode) -> Self {
        match mode {
            ThermostatMode::Heat => "heat".to_string(),
            ThermostatMode::Cool => "cool".to_string(),
            ThermostatMode::Auto => "auto".to_string(),
            ThermostatMode::Off => "off".to_string(),
            ThermostatMode::Fan => "fan".to_string(),
            ThermostatMode::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thermostat {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub brand: Brand,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub property_id: Option<String>,
    #[serde(default)]
    pub current_temperature: Option<f64>,
    #[serde(default)]
    pub target_temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub mode: Option<ThermostatMode>,
    #[serde(default)]
    pub online: Option<bool>,
}

impl Thermostat {
    pub fn current_display(&self) -> String {
        format_temperature(self.current_temperature)
    }

    pub fn target_display(&self) -> String {
        format_temperature(self.target_temperature)
    }

    /// API path for this device
    pub fn path(&self) -> String {
        thermostat_path(self.brand, &self.id, None)
    }
}

fn format_temperature(value: Option<f64>) -> String {
    match value {
        Some(t) => format!("{:.1}°", t),
        None => "--".to_string(),
    }
}

/// Body for `PUT {prefix}/{id}/target`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetUpdate {
    pub target_temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ThermostatMode>,
}
