//! Device provider capability and the device model shared by the pollers,
//! the notifier and the synchronous gateway.
//!
//! A provider speaks for exactly one upstream account. Houses and devices are
//! plain values: they carry the ids needed to route commands back to the
//! provider, never a reference to the provider itself.

pub mod cache;
pub mod caching;
pub mod sst;

use chrono::{DateTime, Utc};
use core::fmt;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::client::SstClientError;

/// Upstream grouping of devices under one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct House {
    pub id: i64,
    pub name: String,
    /// Owner of the link the house was listed through.
    pub user_id: String,
}

/// Provider-specific address of a device, used to route commands back upstream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    house_id: i64,
    device_id: i64,
}

impl DeviceHandle {
    pub fn new(house_id: i64, device_id: i64) -> Self {
        DeviceHandle { house_id, device_id }
    }

    pub fn house_id(&self) -> i64 {
        self.house_id
    }

    pub fn device_id(&self) -> i64 {
        self.device_id
    }

    /// Composite external key `houseID_deviceID`.
    pub fn external_id(&self) -> String {
        format!("{}_{}", self.house_id, self.device_id)
    }
}

/// One temperature quantity plus the moment its value last changed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Reading {
    pub value: i32,
    pub changed_at: DateTime<Utc>,
}

impl Reading {
    pub fn new(value: i32, changed_at: DateTime<Utc>) -> Self {
        Reading { value, changed_at }
    }

    /// Compare against the previous reading of the same quantity.
    /// Keeps the previous timestamp when the value is unchanged and reports
    /// whether the value differs.
    fn carry_forward(&mut self, previous: &Reading) -> bool {
        if self.value == previous.value {
            self.changed_at = previous.changed_at;
            false
        } else {
            true
        }
    }
}

/// Floor/air temperature and floor set-point of a thermostat.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Tempometer {
    pub degrees_floor: Reading,
    pub degrees_air: Reading,
    pub set_degrees_floor: Reading,
}

impl Tempometer {
    /// All three readings taken at `at`.
    pub fn sampled(degrees_floor: i32, degrees_air: i32, set_degrees_floor: i32, at: DateTime<Utc>) -> Self {
        Tempometer {
            degrees_floor: Reading::new(degrees_floor, at),
            degrees_air: Reading::new(degrees_air, at),
            set_degrees_floor: Reading::new(set_degrees_floor, at),
        }
    }

    fn carry_forward(&mut self, previous: &Tempometer) -> bool {
        // no short-circuit: every unchanged field must get its timestamp back
        let floor = self.degrees_floor.carry_forward(&previous.degrees_floor);
        let air = self.degrees_air.carry_forward(&previous.degrees_air);
        let set_point = self.set_degrees_floor.carry_forward(&previous.set_degrees_floor);
        floor || air || set_point
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    /// Device id, unique within its house.
    pub id: i64,
    pub handle: DeviceHandle,
    pub house_name: String,
    pub name: String,
    pub model: String,
    pub enabled: bool,
    pub connected: bool,
    pub tempometer: Tempometer,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    pub fn external_id(&self) -> String {
        self.handle.external_id()
    }

    /// Diff this freshly polled device against the previous snapshot of the
    /// same device. Timestamps of unchanged tempometer readings are copied
    /// from `previous`. Returns true if anything worth notifying changed.
    pub fn merge_previous(&mut self, previous: &Device) -> bool {
        let readings_changed = self.tempometer.carry_forward(&previous.tempometer);
        readings_changed
            || self.enabled != previous.enabled
            || self.connected != previous.connected
            || self.name != previous.name
            || self.house_name != previous.house_name
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {})", self.name, self.model, self.external_id())
    }
}

#[derive(Debug)]
pub enum ProviderError {
    /// The upstream API call failed.
    Upstream(SstClientError),
    /// The provider could not serve the request for another reason.
    Unavailable(String),
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Upstream(e) => write!(f, "upstream error: {}", e),
            ProviderError::Unavailable(s) => write!(f, "provider unavailable: {}", s),
        }
    }
}

impl Error for ProviderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProviderError::Upstream(e) => Some(e),
            ProviderError::Unavailable(_) => None,
        }
    }
}

impl From<SstClientError> for ProviderError {
    fn from(value: SstClientError) -> Self {
        ProviderError::Upstream(value)
    }
}

/// Houses, devices and commands for one upstream account.
///
/// Every call may fail transiently and may be retried by the caller.
pub trait DeviceProvider: Send + Sync {
    /// Log in to the upstream account.
    fn init(&self) -> Result<(), ProviderError>;
    fn houses(&self) -> Result<Vec<House>, ProviderError>;
    fn devices(&self, house: &House) -> Result<Vec<Device>, ProviderError>;
    fn set_temperature(&self, device: &Device, value: i32) -> Result<(), ProviderError>;
    fn power_status(&self, device: &Device, on: bool) -> Result<(), ProviderError>;
}

/// Builds a provider for a stored link.
pub trait DeviceFactory: Send + Sync {
    fn create(&self, user_id: &str, link_id: &str, email: &str, password: &str) -> Arc<dyn DeviceProvider>;
}

impl<F> DeviceFactory for F
where
    F: Fn(&str, &str, &str, &str) -> Arc<dyn DeviceProvider> + Send + Sync,
{
    fn create(&self, user_id: &str, link_id: &str, email: &str, password: &str) -> Arc<dyn DeviceProvider> {
        self(user_id, link_id, email, password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid timestamp")
    }

    fn device(floor: i32, air: i32, set_point: i32, polled: DateTime<Utc>) -> Device {
        Device {
            id: 7,
            handle: DeviceHandle::new(3, 7),
            house_name: "Dacha".into(),
            name: "Dacha Bathroom".into(),
            model: "MCS350".into(),
            enabled: true,
            connected: true,
            tempometer: Tempometer::sampled(floor, air, set_point, polled),
            updated_at: polled,
        }
    }

    #[test]
    fn unchanged_device_keeps_all_timestamps() {
        let previous = device(20, 22, 25, at(0));
        let mut current = device(20, 22, 25, at(60));
        assert!(!current.merge_previous(&previous));
        assert_eq!(current.tempometer, previous.tempometer);
    }

    #[test]
    fn only_changed_reading_gets_new_timestamp() {
        let previous = device(20, 22, 25, at(0));
        let mut current = device(21, 22, 25, at(60));
        assert!(current.merge_previous(&previous));
        assert_eq!(current.tempometer.degrees_floor, Reading::new(21, at(60)));
        assert_eq!(current.tempometer.degrees_air.changed_at, at(0));
        assert_eq!(current.tempometer.set_degrees_floor.changed_at, at(0));
    }

    #[rstest]
    #[case::enabled(|d: &mut Device| d.enabled = false)]
    #[case::connected(|d: &mut Device| d.connected = false)]
    #[case::name(|d: &mut Device| d.name = "Dacha Kitchen".into())]
    #[case::house_name(|d: &mut Device| d.house_name = "Flat".into())]
    #[case::air(|d: &mut Device| d.tempometer.degrees_air.value = 19)]
    #[case::set_point(|d: &mut Device| d.tempometer.set_degrees_floor.value = 30)]
    fn flags_and_readings_mark_device_changed(#[case] mutate: fn(&mut Device)) {
        let previous = device(20, 22, 25, at(0));
        let mut current = device(20, 22, 25, at(60));
        mutate(&mut current);
        assert!(current.merge_previous(&previous));
    }

    #[test]
    fn timestamp_advances_only_with_value() {
        let mut previous = device(20, 22, 25, at(0));
        for (step, floor) in [20, 20, 23, 23, 20].into_iter().enumerate() {
            let polled = at(0) + Duration::seconds(60 * (step as i64 + 1));
            let mut current = device(floor, 22, 25, polled);
            current.merge_previous(&previous);
            let advanced = current.tempometer.degrees_floor.changed_at > previous.tempometer.degrees_floor.changed_at;
            assert_eq!(advanced, floor != previous.tempometer.degrees_floor.value, "step {}", step);
            previous = current;
        }
    }

    #[test]
    fn external_id_joins_house_and_device() {
        let handle = DeviceHandle::new(12, 345);
        assert_eq!(handle.external_id(), "12_345");
        assert_eq!(handle.house_id(), 12);
        assert_eq!(handle.device_id(), 345);
    }
}
