//! Wire models of the Yandex Alice smart-home protocol, limited to what the
//! gateway produces: device descriptions, state callbacks and action results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum DeviceType {
    #[serde(rename = "devices.types.thermostat")]
    Thermostat,
    #[serde(rename = "devices.types.sensor")]
    Sensor,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum CapabilityType {
    #[serde(rename = "devices.capabilities.on_off")]
    OnOff,
    #[serde(rename = "devices.capabilities.range")]
    Range,
}

impl CapabilityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityType::OnOff => "devices.capabilities.on_off",
            CapabilityType::Range => "devices.capabilities.range",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [CapabilityType::OnOff, CapabilityType::Range]
            .into_iter()
            .find(|t| t.as_str() == s)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum PropertyType {
    #[serde(rename = "devices.properties.float")]
    Float,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum Unit {
    #[serde(rename = "unit.temperature.celsius")]
    Celsius,
}

/// Capability/property instance names.
pub mod instance {
    pub const ON: &str = "on";
    pub const TEMPERATURE: &str = "temperature";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeBounds {
    pub min: f32,
    pub max: f32,
    pub precision: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CapabilityParameters {
    OnOff {
        split: bool,
    },
    Range {
        instance: &'static str,
        unit: Unit,
        random_access: bool,
        range: RangeBounds,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Float(f32),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityState {
    pub instance: &'static str,
    pub value: StateValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capability {
    #[serde(rename = "type")]
    pub kind: CapabilityType,
    pub retrievable: bool,
    pub parameters: CapabilityParameters,
    pub state: CapabilityState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyParameters {
    pub instance: &'static str,
    pub unit: Unit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyState {
    pub instance: &'static str,
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    #[serde(rename = "type")]
    pub kind: PropertyType,
    pub retrievable: bool,
    pub reportable: bool,
    pub parameters: PropertyParameters,
    pub state: PropertyState,
    /// When the reading last changed value.
    pub state_changed_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(rename = "type")]
    pub kind: DeviceType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<Capability>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Property>,
    pub device_info: DeviceInfo,
}

/// Body of the state callback pushed to the assistant.
#[derive(Debug, Clone, Serialize)]
pub struct StateCallback {
    pub ts: i64,
    pub payload: StatePayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatePayload {
    pub user_id: String,
    pub devices: Vec<StateDevice>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateDevice {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<StateProperty>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<StateCapability>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateProperty {
    #[serde(rename = "type")]
    pub kind: PropertyType,
    pub state: PropertyState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateCapability {
    #[serde(rename = "type")]
    pub kind: CapabilityType,
    pub state: CapabilityState,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    DeviceNotFound,
    DeviceUnreachable,
    InvalidAction,
    InvalidValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionResult {
    Done,
    Error {
        error_code: ErrorCode,
        error_description: String,
    },
}

impl ActionResult {
    pub fn error(code: ErrorCode, description: impl Into<String>) -> Self {
        ActionResult::Error {
            error_code: code,
            error_description: description.into(),
        }
    }
}

/// One device of an action request.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequestDevice {
    pub id: String,
    #[serde(default)]
    pub capabilities: Vec<ActionCapability>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionCapability {
    #[serde(rename = "type")]
    pub kind: String,
    pub state: ActionState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionState {
    pub instance: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub relative: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResponseDevice {
    pub id: String,
    pub capabilities: Vec<ActionCapabilityResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionCapabilityResult {
    #[serde(rename = "type")]
    pub kind: String,
    pub state: ActionStateResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionStateResult {
    pub instance: String,
    pub action_result: ActionResult,
}
