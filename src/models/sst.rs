//! Wire models of the SST cloud API (`api.sst-cloud.com`).
//!
//! Only the fields the gateway reads are modelled; unknown fields are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HouseId(pub i64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub i64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceType(pub i64);

impl DeviceType {
    /// Floor heating thermostat (MCS300/MCS350 family).
    pub const THERMOSTAT: DeviceType = DeviceType(1);

    pub fn model_name(&self) -> String {
        match *self {
            DeviceType::THERMOSTAT => "Thermostat".to_string(),
            DeviceType(other) => format!("Type {}", other),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Ru,
    En,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub email: &'a str,
    pub language: Language,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct House {
    pub id: HouseId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub in_home: Option<bool>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub house: HouseId,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_connected: bool,
    #[serde(default)]
    pub mac_address: Option<String>,
    /// JSON document encoded as a string; decoded into `thermostat` for thermostats.
    #[serde(default)]
    pub parsed_configuration: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub thermostat: Option<ThermostatConfiguration>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerStatus {
    On,
    Off,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThermostatConfiguration {
    pub settings: ThermostatSettings,
    pub current_temperature: CurrentTemperature,
    #[serde(default)]
    pub signal_level: Option<i32>,
    #[serde(default)]
    pub open_window_minutes: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThermostatSettings {
    #[serde(default)]
    pub mode: Option<String>,
    pub status: PowerStatus,
    #[serde(default)]
    pub temperature_air: i32,
    #[serde(default)]
    pub temperature_manual: i32,
    #[serde(default)]
    pub temperature_vacation: i32,
    #[serde(default)]
    pub temperature_correction_air: i32,
}

#[derive(Debug, Copy, Clone, Deserialize)]
pub struct CurrentTemperature {
    #[serde(default)]
    pub temperature_air: i32,
    #[serde(default)]
    pub temperature_floor: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PowerStatusRequest {
    pub status: PowerStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemperatureRequest {
    pub temperature_manual: i32,
}
