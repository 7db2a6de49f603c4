//! Top-level orchestrator: keeps one [`LinkWorker`] per stored link and
//! restarts a link's worker when its credentials change.

use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::link_worker::LinkWorker;
use super::worker::{StopSignal, WorkerHandle};
use crate::db::{Link, LinkStorage, StorageError};
use crate::notifier::Notifier;
use crate::provider::{Device, DeviceFactory};

#[derive(Debug)]
pub enum CheckerError {
    Storage(StorageError),
    Spawn(std::io::Error),
}

impl core::fmt::Display for CheckerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CheckerError::Storage(e) => write!(f, "failed to load links: {}", e),
            CheckerError::Spawn(e) => write!(f, "failed to start worker: {}", e),
        }
    }
}

impl std::error::Error for CheckerError {}

impl From<StorageError> for CheckerError {
    fn from(value: StorageError) -> Self {
        CheckerError::Storage(value)
    }
}

struct LinkEntry {
    worker: Arc<LinkWorker>,
    handle: WorkerHandle,
}

pub struct CheckerService {
    period: Duration,
    storage: Arc<dyn LinkStorage>,
    factory: Arc<dyn DeviceFactory>,
    notifier: Arc<dyn Notifier>,
    reconcile_lock: Mutex<()>,
    workers: Mutex<HashMap<String, LinkEntry>>,
}

impl CheckerService {
    pub fn new(
        period: Duration,
        storage: Arc<dyn LinkStorage>,
        factory: Arc<dyn DeviceFactory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        CheckerService {
            period,
            storage,
            factory,
            notifier,
            reconcile_lock: Mutex::new(()),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Reconcile now and every period until stopped, then stop every link.
    /// Only a failure of the first reconciliation is returned.
    pub fn run(&self, stop: StopSignal) -> Result<(), CheckerError> {
        self.reconcile()?;
        info!("Checker started, reconciling every {}s", self.period.as_secs());
        while !stop.wait(self.period) {
            if let Err(e) = self.reconcile() {
                error!("Reconciliation failed: {}", e);
            }
        }
        self.shutdown();
        info!("Checker stopped");
        Ok(())
    }

    /// Align the running link workers with the stored links.
    ///
    /// Workers whose link is unchanged keep running with their state; new or
    /// re-credentialed links get a fresh provider and worker; links gone from
    /// storage are stopped.
    pub fn reconcile(&self) -> Result<(), CheckerError> {
        let _reconciling = self.reconcile_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let links = self.storage.links()?;

        let stale = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            let mut current = std::mem::take(&mut *workers);
            let mut next = HashMap::with_capacity(links.len());
            let mut stale = Vec::new();

            for link in links {
                match current.remove(&link.id) {
                    Some(entry) if entry.worker.link().credentials_match(&link) => {
                        next.insert(link.id.clone(), entry);
                        continue;
                    }
                    Some(previous) => {
                        info!("link {}: credentials changed, restarting", link.id);
                        // replacement starts below; the old worker is stopped
                        // after the map lock is released
                        stale.push(previous);
                    }
                    None => {}
                }
                match self.spawn_link(link.clone()) {
                    Ok(entry) => {
                        next.insert(link.id.clone(), entry);
                    }
                    Err(e) => error!("link {}: {}", link.id, e),
                }
            }

            for (id, entry) in current {
                info!("link {}: removed from storage, stopping", id);
                stale.push(entry);
            }
            *workers = next;
            stale
        };

        stop_all(stale);
        Ok(())
    }

    fn spawn_link(&self, link: Link) -> Result<LinkEntry, CheckerError> {
        let provider = self.factory.create(&link.user_id, &link.id, &link.sst_email, &link.sst_password);
        let name = format!("link-{}", link.id);
        debug!("link {}: starting worker", link.id);
        let worker = Arc::new(LinkWorker::new(link, provider, self.notifier.clone(), self.period));
        let runner = worker.clone();
        let handle = WorkerHandle::spawn(name, move |stop| runner.run(stop)).map_err(CheckerError::Spawn)?;
        Ok(LinkEntry { worker, handle })
    }

    /// Last known devices of every link owned by `user_id`. No upstream calls.
    pub fn devices(&self, user_id: &str) -> Vec<Device> {
        let workers = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| e.worker.link().user_id == user_id)
            .map(|e| e.worker.clone())
            .collect::<Vec<_>>();
        workers.iter().flat_map(|w| w.state()).collect()
    }

    pub fn link_ids(&self) -> Vec<String> {
        let mut ids = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }

    /// Stop every link worker and wait for their houses to drain.
    pub fn shutdown(&self) {
        let _reconciling = self.reconcile_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, e)| e)
            .collect::<Vec<_>>();
        stop_all(entries);
    }
}

/// Signal every worker first so they wind down in parallel, then join.
fn stop_all(entries: Vec<LinkEntry>) {
    let handles = entries
        .into_iter()
        .map(|LinkEntry { mut handle, .. }| {
            handle.signal();
            handle
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        FakeProvider, MemoryStorage, RecordingFactory, RecordingNotifier, house, link, thermostat, wait_until,
    };

    const PERIOD: Duration = Duration::from_secs(3600);

    fn populated(provider: &FakeProvider) {
        provider.set_houses(vec![house(1, "user-1")]);
        provider.set_devices(1, vec![thermostat(1, 10, 20, 22, 25)]);
    }

    fn setup() -> (Arc<MemoryStorage>, Arc<RecordingFactory>, Arc<RecordingNotifier>, CheckerService) {
        let storage = Arc::new(MemoryStorage::default());
        let factory = Arc::new(RecordingFactory::new(populated));
        let notifier = Arc::new(RecordingNotifier::default());
        let checker = CheckerService::new(PERIOD, storage.clone(), factory.clone(), notifier.clone());
        (storage, factory, notifier, checker)
    }

    fn worker_ptr(checker: &CheckerService, id: &str) -> *const LinkWorker {
        let workers = checker.workers.lock().expect("lock");
        Arc::as_ptr(&workers.get(id).expect("worker present").worker)
    }

    #[test]
    fn reconcile_keeps_unchanged_starts_new_stops_missing() {
        let (storage, factory, notifier, checker) = setup();
        storage.set_links(vec![link("A", "user-1", "a@x", "p"), link("B", "user-1", "b@x", "p")]);
        checker.reconcile().expect("reconcile");
        assert!(wait_until(|| checker.devices("user-1").len() == 2));
        let b_before = worker_ptr(&checker, "B");

        storage.set_links(vec![link("B", "user-1", "b@x", "p"), link("C", "user-1", "c@x", "p")]);
        checker.reconcile().expect("reconcile");

        assert_eq!(checker.link_ids(), vec!["B", "C"]);
        assert_eq!(worker_ptr(&checker, "B"), b_before);
        assert_eq!(factory.created_links(), vec!["A", "B", "C"]);
        // A's device went offline when A stopped
        assert_eq!(notifier.notified_ids().len(), 1);
        checker.shutdown();
    }

    #[test]
    fn credential_change_restarts_with_fresh_provider() {
        let (storage, factory, notifier, checker) = setup();
        storage.set_links(vec![link("L", "user-1", "a@x", "p1")]);
        checker.reconcile().expect("reconcile");
        assert!(wait_until(|| checker.devices("user-1").len() == 1));
        let before = worker_ptr(&checker, "L");

        storage.set_links(vec![link("L", "user-1", "a@x", "p2")]);
        checker.reconcile().expect("reconcile");

        assert_ne!(worker_ptr(&checker, "L"), before);
        assert_eq!(factory.created_passwords(), vec!["p1", "p2"]);
        assert_eq!(checker.link_ids(), vec!["L"]);
        // the old worker was joined and its device marked offline
        assert_eq!(notifier.notified_ids(), vec!["1_10".to_string()]);
        checker.shutdown();
    }

    #[test]
    fn unchanged_reconcile_creates_nothing() {
        let (storage, factory, _notifier, checker) = setup();
        storage.set_links(vec![link("L", "user-1", "a@x", "p1")]);
        checker.reconcile().expect("reconcile");
        checker.reconcile().expect("reconcile");
        assert_eq!(factory.created_links().len(), 1);
        checker.shutdown();
    }

    #[test]
    fn devices_are_scoped_to_user() {
        let (storage, _factory, _notifier, checker) = setup();
        storage.set_links(vec![link("A", "user-1", "a@x", "p"), link("B", "user-2", "b@x", "p")]);
        checker.reconcile().expect("reconcile");
        assert!(wait_until(|| checker.devices("user-1").len() == 1 && checker.devices("user-2").len() == 1));
        assert!(checker.devices("nobody").is_empty());
        checker.shutdown();
    }

    #[test]
    fn storage_failure_is_reported_and_keeps_workers() {
        let (storage, _factory, _notifier, checker) = setup();
        storage.set_links(vec![link("A", "user-1", "a@x", "p")]);
        checker.reconcile().expect("reconcile");
        storage.set_failing(true);
        assert!(matches!(checker.reconcile(), Err(CheckerError::Storage(_))));
        assert_eq!(checker.link_ids(), vec!["A"]);
        checker.shutdown();
    }

    #[test]
    fn run_fails_fast_when_first_reconcile_fails() {
        let (storage, _factory, _notifier, checker) = setup();
        storage.set_failing(true);
        let (_tx, stop) = StopSignal::pair();
        assert!(checker.run(stop).is_err());
    }

    #[test]
    fn run_drains_every_worker_on_stop() {
        let (storage, _factory, notifier, checker) = setup();
        storage.set_links(vec![link("A", "user-1", "a@x", "p"), link("B", "user-2", "b@x", "p")]);
        let checker = Arc::new(checker);
        let runner = checker.clone();
        let handle = WorkerHandle::spawn("checker-test".into(), move |stop| {
            runner.run(stop).expect("run");
        })
        .expect("spawn");
        assert!(wait_until(|| checker.devices("user-1").len() == 1 && checker.devices("user-2").len() == 1));

        handle.join();
        assert!(checker.link_ids().is_empty());
        assert_eq!(notifier.notified_ids().len(), 2);
    }
}
