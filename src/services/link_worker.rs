//! Poller for one linked account: tracks the account's houses and runs a
//! [`HouseWorker`] thread per house.

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::house_worker::HouseWorker;
use super::worker::{StopSignal, WorkerHandle, run_periodic};
use crate::db::Link;
use crate::notifier::Notifier;
use crate::provider::{Device, DeviceProvider, House};

struct HouseEntry {
    worker: Arc<HouseWorker>,
    handle: WorkerHandle,
}

pub struct LinkWorker {
    link: Link,
    provider: Arc<dyn DeviceProvider>,
    notifier: Arc<dyn Notifier>,
    period: Duration,
    houses: Mutex<HashMap<i64, HouseEntry>>,
}

impl LinkWorker {
    pub fn new(link: Link, provider: Arc<dyn DeviceProvider>, notifier: Arc<dyn Notifier>, period: Duration) -> Self {
        LinkWorker {
            link,
            provider,
            notifier,
            period,
            houses: Mutex::new(HashMap::new()),
        }
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Poll now and every period; on stop, tear down every house.
    pub fn run(&self, stop: StopSignal) {
        info!("link {}: worker started for user {}", self.link.id, self.link.user_id);
        run_periodic(&stop, self.period, || self.poll());
        self.shutdown();
        info!("link {}: worker stopped", self.link.id);
    }

    /// List houses and align the set of house workers with it.
    ///
    /// A failed listing is treated as an outage of the whole account: every
    /// tracked house is marked offline, and the set is kept as is.
    pub fn poll(&self) {
        let houses = match self.provider.houses() {
            Ok(houses) => houses,
            Err(e) => {
                warn!("link {}: failed to list houses, marking all offline: {}", self.link.id, e);
                for worker in self.workers() {
                    worker.mark_all_offline();
                }
                return;
            }
        };

        let removed = {
            let mut tracked = self.houses.lock().unwrap_or_else(PoisonError::into_inner);
            for house in houses.iter() {
                if tracked.contains_key(&house.id) {
                    continue;
                }
                match self.spawn_house(house.clone()) {
                    Ok(entry) => {
                        debug!("link {}: tracking house {} ({})", self.link.id, house.id, house.name);
                        tracked.insert(house.id, entry);
                    }
                    Err(e) => error!("link {}: failed to start house {}: {}", self.link.id, house.id, e),
                }
            }

            let gone = tracked
                .keys()
                .filter(|id| !houses.iter().any(|h| h.id == **id))
                .copied()
                .collect::<Vec<_>>();
            gone.into_iter().filter_map(|id| tracked.remove(&id)).collect::<Vec<_>>()
        };

        for HouseEntry { worker, handle } in removed {
            debug!("link {}: house {} disappeared", self.link.id, worker.house().id);
            handle.join();
            worker.mark_all_offline();
        }
    }

    fn spawn_house(&self, house: House) -> std::io::Result<HouseEntry> {
        let name = format!("house-{}", house.id);
        let worker = Arc::new(HouseWorker::new(house, self.provider.clone(), self.notifier.clone()));
        let runner = worker.clone();
        let period = self.period;
        let handle = WorkerHandle::spawn(name, move |stop| runner.run(stop, period))?;
        Ok(HouseEntry { worker, handle })
    }

    fn workers(&self) -> Vec<Arc<HouseWorker>> {
        self.houses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|e| e.worker.clone())
            .collect()
    }

    /// Stop every house worker, wait for all of them to exit, then mark
    /// their devices offline.
    pub fn shutdown(&self) {
        let entries = self
            .houses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, e)| e)
            .collect::<Vec<_>>();

        let mut workers = Vec::with_capacity(entries.len());
        let mut handles = Vec::with_capacity(entries.len());
        for HouseEntry { worker, mut handle } in entries {
            handle.signal();
            workers.push(worker);
            handles.push(handle);
        }
        for handle in handles {
            handle.join();
        }
        for worker in workers {
            worker.mark_all_offline();
        }
    }

    /// Union of every house's last known devices.
    pub fn state(&self) -> Vec<Device> {
        self.workers().iter().flat_map(|w| w.state()).collect()
    }
}
