//! Poller for one house: keeps the latest device snapshot and pushes only
//! the devices that changed since the previous poll.

use log::{debug, error, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::worker::{StopSignal, run_periodic};
use crate::notifier::Notifier;
use crate::provider::{Device, DeviceProvider, House};

pub struct HouseWorker {
    house: House,
    provider: Arc<dyn DeviceProvider>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<Vec<Device>>,
}

impl HouseWorker {
    pub fn new(house: House, provider: Arc<dyn DeviceProvider>, notifier: Arc<dyn Notifier>) -> Self {
        HouseWorker {
            house,
            provider,
            notifier,
            state: Mutex::new(Vec::new()),
        }
    }

    pub fn house(&self) -> &House {
        &self.house
    }

    /// Poll now, then every `period` until stopped.
    pub fn run(&self, stop: StopSignal, period: Duration) {
        debug!("house {}: worker started", self.house.id);
        run_periodic(&stop, period, || self.poll());
        debug!("house {}: worker stopped", self.house.id);
    }

    /// Fetch devices, diff them against the stored snapshot and notify the
    /// changed ones. Upstream failures leave the snapshot untouched.
    pub fn poll(&self) {
        let mut devices = match self.provider.devices(&self.house) {
            Ok(devices) => devices,
            Err(e) => {
                warn!("house {}: failed to poll devices: {}", self.house.id, e);
                return;
            }
        };

        let changed = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = state.iter().map(|d| (d.id, d)).collect::<HashMap<_, _>>();
            let mut changed = Vec::new();
            for device in devices.iter_mut() {
                // new devices show up through queries first, not notifications
                let Some(prev) = previous.get(&device.id) else {
                    continue;
                };
                if device.merge_previous(prev) {
                    changed.push(device.clone());
                }
            }
            *state = devices;
            changed
        };

        self.notify(changed);
    }

    /// Flip every connected device offline and notify those. Devices that are
    /// already offline are left out of the batch.
    pub fn mark_all_offline(&self) {
        let changed = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state
                .iter_mut()
                .filter(|d| d.connected)
                .map(|d| {
                    d.connected = false;
                    d.clone()
                })
                .collect::<Vec<_>>()
        };
        if !changed.is_empty() {
            debug!("house {}: marked {} device(s) offline", self.house.id, changed.len());
        }
        self.notify(changed);
    }

    pub fn state(&self) -> Vec<Device> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn notify(&self, changed: Vec<Device>) {
        if changed.is_empty() {
            return;
        }
        if let Err(e) = self.notifier.notify_devices_changed(&self.house, &changed) {
            error!("house {}: failed to notify {} device(s): {}", self.house.id, changed.len(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProvider, RecordingNotifier, at, house, thermostat, thermostat_at};

    fn setup() -> (Arc<FakeProvider>, Arc<RecordingNotifier>, HouseWorker) {
        let provider = Arc::new(FakeProvider::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let worker = HouseWorker::new(house(1, "user-1"), provider.clone(), notifier.clone());
        (provider, notifier, worker)
    }

    #[test]
    fn first_poll_stores_without_notifying() {
        let (provider, notifier, worker) = setup();
        provider.set_devices(1, vec![thermostat(1, 10, 20, 22, 25), thermostat(1, 11, 20, 22, 25)]);
        worker.poll();
        assert_eq!(worker.state().len(), 2);
        assert!(notifier.batches().is_empty());
    }

    #[test]
    fn unchanged_polls_never_notify() {
        let (provider, notifier, worker) = setup();
        for step in 0..5 {
            provider.set_devices(1, vec![thermostat_at(1, 10, 20, 22, 25, at(60 * step))]);
            worker.poll();
        }
        assert!(notifier.batches().is_empty());
        assert_eq!(worker.state()[0].tempometer.degrees_floor.changed_at, at(0));
    }

    #[test]
    fn changed_floor_reading_notifies_one_device() {
        let (provider, notifier, worker) = setup();
        provider.set_devices(
            1,
            vec![thermostat_at(1, 1, 20, 22, 25, at(0)), thermostat_at(1, 2, 20, 22, 25, at(0))],
        );
        worker.poll();
        provider.set_devices(
            1,
            vec![thermostat_at(1, 1, 21, 22, 25, at(60)), thermostat_at(1, 2, 20, 22, 25, at(60))],
        );
        worker.poll();

        let batches = notifier.batches();
        assert_eq!(batches.len(), 1);
        let (house_id, devices) = &batches[0];
        assert_eq!(*house_id, 1);
        assert_eq!(devices.len(), 1);
        let device = &devices[0];
        assert_eq!(device.id, 1);
        assert_eq!(device.tempometer.degrees_floor.value, 21);
        assert_eq!(device.tempometer.degrees_floor.changed_at, at(60));
        assert_eq!(device.tempometer.degrees_air.changed_at, at(0));
        assert_eq!(device.tempometer.set_degrees_floor.changed_at, at(0));
    }

    #[test]
    fn new_device_is_not_notified_until_it_changes() {
        let (provider, notifier, worker) = setup();
        provider.set_devices(1, vec![thermostat(1, 1, 20, 22, 25)]);
        worker.poll();
        provider.set_devices(1, vec![thermostat(1, 1, 20, 22, 25), thermostat(1, 2, 18, 19, 25)]);
        worker.poll();
        assert!(notifier.batches().is_empty());
        assert_eq!(worker.state().len(), 2);
    }

    #[test]
    fn failed_poll_keeps_state_and_stays_silent() {
        let (provider, notifier, worker) = setup();
        provider.set_devices(1, vec![thermostat(1, 1, 20, 22, 25)]);
        worker.poll();
        provider.fail_devices(1, "timeout");
        worker.poll();
        let state = worker.state();
        assert_eq!(state.len(), 1);
        assert!(state[0].connected);
        assert!(notifier.batches().is_empty());
    }

    #[test]
    fn mark_all_offline_is_idempotent() {
        let (provider, notifier, worker) = setup();
        let mut offline = thermostat(1, 2, 20, 22, 25);
        offline.connected = false;
        provider.set_devices(1, vec![thermostat(1, 1, 20, 22, 25), offline]);
        worker.poll();

        worker.mark_all_offline();
        worker.mark_all_offline();

        let batches = notifier.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1.iter().map(|d| d.id).collect::<Vec<_>>(), vec![1]);
        assert!(batches[0].1.iter().all(|d| !d.connected));
        assert!(worker.state().iter().all(|d| !d.connected));
    }

    #[test]
    fn notifier_failure_does_not_roll_back_state() {
        let (provider, notifier, worker) = setup();
        provider.set_devices(1, vec![thermostat_at(1, 1, 20, 22, 25, at(0))]);
        worker.poll();
        notifier.set_failing(true);
        provider.set_devices(1, vec![thermostat_at(1, 1, 23, 22, 25, at(60))]);
        worker.poll();
        assert_eq!(worker.state()[0].tempometer.degrees_floor.value, 23);
        assert_eq!(notifier.attempts(), 1);

        // the same state is not re-sent on the next poll
        notifier.set_failing(false);
        provider.set_devices(1, vec![thermostat_at(1, 1, 23, 22, 25, at(120))]);
        worker.poll();
        assert!(notifier.batches().is_empty());
    }
}
