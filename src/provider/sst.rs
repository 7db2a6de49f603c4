//! [`DeviceProvider`] over the SST cloud client.

use chrono::{DateTime, Utc};
use log::warn;
use std::sync::Arc;

use super::{Device, DeviceFactory, DeviceHandle, DeviceProvider, House, ProviderError, Tempometer};
use crate::client::SstClient;
use crate::config::SstConfig;
use crate::models::sst::{self, DeviceId, DeviceType, HouseId, PowerStatus};

pub struct SstProvider {
    user_id: String,
    client: SstClient,
}

impl SstProvider {
    pub fn new(config: &SstConfig, user_id: &str, email: &str, password: &str) -> Self {
        SstProvider {
            user_id: user_id.to_string(),
            client: SstClient::new(config, email, password),
        }
    }
}

impl DeviceProvider for SstProvider {
    fn init(&self) -> Result<(), ProviderError> {
        Ok(self.client.login()?)
    }

    fn houses(&self) -> Result<Vec<House>, ProviderError> {
        let houses = self.client.houses()?;
        Ok(houses
            .into_iter()
            .map(|h| House {
                id: h.id.0,
                name: h.name,
                user_id: self.user_id.clone(),
            })
            .collect())
    }

    fn devices(&self, house: &House) -> Result<Vec<Device>, ProviderError> {
        let devices = self.client.devices(HouseId(house.id))?;
        let polled = Utc::now();
        Ok(devices
            .into_iter()
            .filter_map(|d| {
                let id = d.id.0;
                let converted = convert_device(house, d, polled);
                if converted.is_none() {
                    warn!(
                        "house {}: skipping device {} of {}, not a thermostat",
                        house.id, id, self.client.email()
                    );
                }
                converted
            })
            .collect())
    }

    fn set_temperature(&self, device: &Device, value: i32) -> Result<(), ProviderError> {
        self.power_status(device, true)?;
        let (house, id) = ids(device);
        Ok(self.client.set_temperature(house, id, value)?)
    }

    fn power_status(&self, device: &Device, on: bool) -> Result<(), ProviderError> {
        let (house, id) = ids(device);
        let status = if on { PowerStatus::On } else { PowerStatus::Off };
        Ok(self.client.set_power_status(house, id, status)?)
    }
}

fn ids(device: &Device) -> (HouseId, DeviceId) {
    (HouseId(device.handle.house_id()), DeviceId(device.handle.device_id()))
}

/// Thermostats with a decoded configuration only.
fn convert_device(house: &House, device: sst::Device, polled: DateTime<Utc>) -> Option<Device> {
    if device.device_type != DeviceType::THERMOSTAT {
        return None;
    }
    let cfg = device.thermostat?;
    Some(Device {
        id: device.id.0,
        handle: DeviceHandle::new(house.id, device.id.0),
        house_name: house.name.clone(),
        name: format!("{} {}", house.name, device.name),
        model: device.device_type.model_name(),
        enabled: cfg.settings.status == PowerStatus::On,
        connected: device.is_connected,
        tempometer: Tempometer::sampled(
            cfg.current_temperature.temperature_floor,
            cfg.current_temperature.temperature_air,
            cfg.settings.temperature_manual,
            polled,
        ),
        updated_at: polled,
    })
}

/// Builds undecorated providers for the background pollers.
pub struct SstProviderFactory {
    config: SstConfig,
}

impl SstProviderFactory {
    pub fn new(config: SstConfig) -> Self {
        SstProviderFactory { config }
    }
}

impl DeviceFactory for SstProviderFactory {
    fn create(&self, user_id: &str, _link_id: &str, email: &str, password: &str) -> Arc<dyn DeviceProvider> {
        Arc::new(SstProvider::new(&self.config, user_id, email, password))
    }
}
