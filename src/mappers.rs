//! Mapping of provider devices onto assistant devices.
//!
//! Every thermostat is exposed as three assistant devices: the thermostat
//! itself (power + floor set-point) and two temperature sensors, `<id>_air`
//! and `<id>_floor`.

use crate::models::alice::{
    self, Capability, CapabilityParameters, CapabilityState, CapabilityType, DeviceInfo, Property,
    PropertyParameters, PropertyState, PropertyType, RangeBounds, StateCapability, StateDevice, StateProperty,
    StateValue, Unit, instance,
};
use crate::provider::{Device, Reading};

pub const MIN_TEMP: i32 = 12;
pub const MAX_TEMP: i32 = 45;
pub const MANUFACTURER: &str = "SST";

const AIR_SUFFIX: &str = "_air";
const FLOOR_SUFFIX: &str = "_floor";
const AIR_NAME: &str = "температура воздуха";
const FLOOR_NAME: &str = "температура пола";

/// Split an assistant device id into the provider device id and, for
/// sensors, which reading it exposes.
pub fn split_sensor_id(id: &str) -> (&str, Option<Sensor>) {
    if let Some(parent) = id.strip_suffix(AIR_SUFFIX) {
        (parent, Some(Sensor::Air))
    } else if let Some(parent) = id.strip_suffix(FLOOR_SUFFIX) {
        (parent, Some(Sensor::Floor))
    } else {
        (id, None)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Sensor {
    Air,
    Floor,
}

fn on_off_state(device: &Device) -> CapabilityState {
    CapabilityState {
        instance: instance::ON,
        value: StateValue::Bool(device.enabled),
    }
}

fn set_point_state(device: &Device) -> CapabilityState {
    CapabilityState {
        instance: instance::TEMPERATURE,
        value: StateValue::Float(device.tempometer.set_degrees_floor.value as f32),
    }
}

fn temperature_state(reading: &Reading) -> PropertyState {
    PropertyState {
        instance: instance::TEMPERATURE,
        value: reading.value as f32,
    }
}

fn info(device: &Device) -> DeviceInfo {
    DeviceInfo {
        manufacturer: MANUFACTURER.to_string(),
        model: device.model.clone(),
    }
}

fn sensor(device: &Device, which: Sensor) -> alice::Device {
    let (suffix, name, reading) = match which {
        Sensor::Air => (AIR_SUFFIX, AIR_NAME, &device.tempometer.degrees_air),
        Sensor::Floor => (FLOOR_SUFFIX, FLOOR_NAME, &device.tempometer.degrees_floor),
    };
    alice::Device {
        id: format!("{}{}", device.external_id(), suffix),
        name: format!("{} {}", device.name, name),
        room: Some(device.house_name.clone()),
        kind: alice::DeviceType::Sensor,
        capabilities: Vec::new(),
        properties: vec![Property {
            kind: PropertyType::Float,
            retrievable: true,
            reportable: true,
            parameters: PropertyParameters {
                instance: instance::TEMPERATURE,
                unit: Unit::Celsius,
            },
            state: temperature_state(reading),
            state_changed_at: reading.changed_at,
            last_updated: device.updated_at,
        }],
        device_info: info(device),
    }
}

fn thermostat(device: &Device) -> alice::Device {
    alice::Device {
        id: device.external_id(),
        name: device.name.clone(),
        room: Some(device.house_name.clone()),
        kind: alice::DeviceType::Thermostat,
        capabilities: vec![
            Capability {
                kind: CapabilityType::OnOff,
                retrievable: true,
                parameters: CapabilityParameters::OnOff { split: false },
                state: on_off_state(device),
            },
            Capability {
                kind: CapabilityType::Range,
                retrievable: true,
                parameters: CapabilityParameters::Range {
                    instance: instance::TEMPERATURE,
                    unit: Unit::Celsius,
                    random_access: true,
                    range: RangeBounds {
                        min: MIN_TEMP as f32,
                        max: MAX_TEMP as f32,
                        precision: 1.0,
                    },
                },
                state: set_point_state(device),
            },
        ],
        properties: Vec::new(),
        device_info: info(device),
    }
}

/// The thermostat followed by its air and floor sensors.
pub fn device_to_alice(device: &Device) -> Vec<alice::Device> {
    vec![
        thermostat(device),
        sensor(device, Sensor::Air),
        sensor(device, Sensor::Floor),
    ]
}

/// State callback entries for a changed device.
pub fn device_to_state(device: &Device) -> Vec<StateDevice> {
    device_to_alice(device)
        .into_iter()
        .filter(|d| !d.capabilities.is_empty() || !d.properties.is_empty())
        .map(|d| StateDevice {
            id: d.id,
            properties: d
                .properties
                .into_iter()
                .map(|p| StateProperty {
                    kind: p.kind,
                    state: p.state,
                })
                .collect(),
            capabilities: d
                .capabilities
                .into_iter()
                .map(|c| StateCapability {
                    kind: c.kind,
                    state: c.state,
                })
                .collect(),
        })
        .collect()
}
