//! In-memory collaborators for unit tests.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::db::{AuditLog, Link, LinkStorage, LogLevel, StorageError};
use crate::notifier::{NotifyError, Notifier};
use crate::provider::{Device, DeviceFactory, DeviceHandle, DeviceProvider, House, ProviderError, Tempometer};

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid timestamp")
}

pub fn house(id: i64, user_id: &str) -> House {
    House {
        id,
        name: format!("House {}", id),
        user_id: user_id.to_string(),
    }
}

pub fn thermostat(house_id: i64, device_id: i64, floor: i32, air: i32, set_point: i32) -> Device {
    thermostat_at(house_id, device_id, floor, air, set_point, at(0))
}

pub fn thermostat_at(
    house_id: i64,
    device_id: i64,
    floor: i32,
    air: i32,
    set_point: i32,
    polled: DateTime<Utc>,
) -> Device {
    Device {
        id: device_id,
        handle: DeviceHandle::new(house_id, device_id),
        house_name: format!("House {}", house_id),
        name: format!("House {} Device {}", house_id, device_id),
        model: "Thermostat".into(),
        enabled: true,
        connected: true,
        tempometer: Tempometer::sampled(floor, air, set_point, polled),
        updated_at: polled,
    }
}

pub fn link(id: &str, user_id: &str, email: &str, password: &str) -> Link {
    Link {
        id: id.into(),
        user_id: user_id.into(),
        sst_email: email.into(),
        sst_password: password.into(),
        created_at: at(0),
        updated_at: at(0),
    }
}

/// Poll `cond` for up to five seconds.
pub fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[derive(Default)]
struct Script {
    houses: Option<Result<Vec<House>, String>>,
    devices: HashMap<i64, Result<Vec<Device>, String>>,
    init_failures: usize,
    delay: Duration,
    commands: Vec<String>,
}

/// Provider answering from a script, counting upstream calls.
#[derive(Default)]
pub struct FakeProvider {
    script: Mutex<Script>,
    fail_commands: AtomicBool,
    init_calls: AtomicUsize,
    houses_calls: AtomicUsize,
    devices_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().expect("script lock")
    }

    pub fn set_houses(&self, houses: Vec<House>) {
        self.script().houses = Some(Ok(houses));
    }

    pub fn fail_houses(&self, message: &str) {
        self.script().houses = Some(Err(message.to_string()));
    }

    pub fn set_devices(&self, house_id: i64, devices: Vec<Device>) {
        self.script().devices.insert(house_id, Ok(devices));
    }

    pub fn fail_devices(&self, house_id: i64, message: &str) {
        self.script().devices.insert(house_id, Err(message.to_string()));
    }

    /// Fail the next `n` logins.
    pub fn fail_init(&self, n: usize) {
        self.script().init_failures = n;
    }

    /// Slow down house listings.
    pub fn set_delay(&self, delay: Duration) {
        self.script().delay = delay;
    }

    pub fn fail_commands(&self, fail: bool) {
        self.fail_commands.store(fail, Ordering::SeqCst);
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn houses_calls(&self) -> usize {
        self.houses_calls.load(Ordering::SeqCst)
    }

    pub fn devices_calls(&self) -> usize {
        self.devices_calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.script().commands.clone()
    }

    fn command(&self, entry: String) -> Result<(), ProviderError> {
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("command rejected".into()));
        }
        self.script().commands.push(entry);
        Ok(())
    }
}

impl DeviceProvider for FakeProvider {
    fn init(&self) -> Result<(), ProviderError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script();
        if script.init_failures > 0 {
            script.init_failures -= 1;
            return Err(ProviderError::Unavailable("login rejected".into()));
        }
        Ok(())
    }

    fn houses(&self) -> Result<Vec<House>, ProviderError> {
        self.houses_calls.fetch_add(1, Ordering::SeqCst);
        let (delay, result) = {
            let script = self.script();
            (script.delay, script.houses.clone().unwrap_or(Ok(Vec::new())))
        };
        thread::sleep(delay);
        result.map_err(ProviderError::Unavailable)
    }

    fn devices(&self, house: &House) -> Result<Vec<Device>, ProviderError> {
        self.devices_calls.fetch_add(1, Ordering::SeqCst);
        self.script()
            .devices
            .get(&house.id)
            .cloned()
            .unwrap_or(Ok(Vec::new()))
            .map_err(ProviderError::Unavailable)
    }

    fn set_temperature(&self, device: &Device, value: i32) -> Result<(), ProviderError> {
        self.command(format!("{} temperature {}", device.external_id(), value))
    }

    fn power_status(&self, device: &Device, on: bool) -> Result<(), ProviderError> {
        self.command(format!("{} power {}", device.external_id(), on))
    }
}

/// Records delivered batches as `(house id, devices)`.
#[derive(Default)]
pub struct RecordingNotifier {
    batches: Mutex<Vec<(i64, Vec<Device>)>>,
    failing: AtomicBool,
    attempts: AtomicUsize,
}

impl RecordingNotifier {
    pub fn batches(&self) -> Vec<(i64, Vec<Device>)> {
        self.batches.lock().expect("batches lock").clone()
    }

    /// External ids of every delivered device, in delivery order.
    pub fn notified_ids(&self) -> Vec<String> {
        self.batches()
            .iter()
            .flat_map(|(_, devices)| devices.iter().map(Device::external_id))
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn notify_devices_changed(&self, house: &House, devices: &[Device]) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Http {
                status: 500,
                message: "unavailable".into(),
            });
        }
        self.batches
            .lock()
            .expect("batches lock")
            .push((house.id, devices.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    links: Mutex<Vec<Link>>,
    failing: AtomicBool,
}

impl MemoryStorage {
    pub fn set_links(&self, links: Vec<Link>) {
        *self.links.lock().expect("links lock") = links;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("storage offline".into()));
        }
        Ok(())
    }
}

impl LinkStorage for MemoryStorage {
    fn links(&self) -> Result<Vec<Link>, StorageError> {
        self.check()?;
        Ok(self.links.lock().expect("links lock").clone())
    }

    fn links_for_user(&self, user_id: &str) -> Result<Vec<Link>, StorageError> {
        Ok(self.links()?.into_iter().filter(|l| l.user_id == user_id).collect())
    }
}

#[derive(Default)]
pub struct MemoryAudit {
    entries: Mutex<Vec<(String, LogLevel, String)>>,
}

impl MemoryAudit {
    pub fn messages(&self) -> Vec<(String, LogLevel, String)> {
        self.entries.lock().expect("audit lock").clone()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.messages().iter().filter(|(_, l, _)| *l == level).count()
    }
}

impl AuditLog for MemoryAudit {
    fn log(&self, link_id: &str, level: LogLevel, message: &str) {
        self.entries
            .lock()
            .expect("audit lock")
            .push((link_id.to_string(), level, message.to_string()));
    }
}

/// Builds a fresh [`FakeProvider`] per call, prepared by `setup`, and keeps
/// every provider it built.
pub struct RecordingFactory {
    setup: Mutex<fn(&FakeProvider)>,
    created: Mutex<Vec<(Link, Arc<FakeProvider>)>>,
}

impl RecordingFactory {
    pub fn new(setup: fn(&FakeProvider)) -> Self {
        RecordingFactory {
            setup: Mutex::new(setup),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn set_setup(&self, setup: fn(&FakeProvider)) {
        *self.setup.lock().expect("setup lock") = setup;
    }

    pub fn created_links(&self) -> Vec<String> {
        self.created.lock().expect("created lock").iter().map(|(l, _)| l.id.clone()).collect()
    }

    pub fn created_passwords(&self) -> Vec<String> {
        self.created
            .lock()
            .expect("created lock")
            .iter()
            .map(|(l, _)| l.sst_password.clone())
            .collect()
    }

    pub fn provider(&self, index: usize) -> Arc<FakeProvider> {
        self.created.lock().expect("created lock")[index].1.clone()
    }
}

impl DeviceFactory for RecordingFactory {
    fn create(&self, user_id: &str, link_id: &str, email: &str, password: &str) -> Arc<dyn DeviceProvider> {
        let provider = Arc::new(FakeProvider::new());
        let setup = *self.setup.lock().expect("setup lock");
        setup(&provider);
        self.created
            .lock()
            .expect("created lock")
            .push((link(link_id, user_id, email, password), provider.clone()));
        provider
    }
}
