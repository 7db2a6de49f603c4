//! Thread-per-worker plumbing: a stop signal that doubles as the poll
//! timer, and a handle that stops and joins the worker thread.

use log::{debug, error};
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Receiving side of a worker's stop channel. Fires when the handle signals
/// or is dropped.
pub struct StopSignal(Receiver<()>);

impl StopSignal {
    pub fn pair() -> (Sender<()>, StopSignal) {
        let (tx, rx) = mpsc::channel();
        (tx, StopSignal(rx))
    }

    /// Sleep for `period`. Returns true as soon as a stop is requested.
    pub fn wait(&self, period: Duration) -> bool {
        match self.0.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => false,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

/// Tick immediately, then every `period` until stopped.
pub fn run_periodic(stop: &StopSignal, period: Duration, mut tick: impl FnMut()) {
    loop {
        tick();
        if stop.wait(period) {
            return;
        }
    }
}

/// Owner side of a worker thread.
pub struct WorkerHandle {
    name: String,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn spawn<F>(name: String, body: F) -> io::Result<Self>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let (tx, stop) = StopSignal::pair();
        let thread = thread::Builder::new().name(name.clone()).spawn(move || body(stop))?;
        Ok(WorkerHandle {
            name,
            stop: Some(tx),
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request a stop without waiting for it.
    pub fn signal(&mut self) {
        self.stop.take();
    }

    /// Request a stop and wait for the thread to exit.
    pub fn join(mut self) {
        self.signal();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("worker {} panicked", self.name);
            } else {
                debug!("worker {} stopped", self.name);
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // detached: the thread sees the closed channel on its next wait
        self.signal();
    }
}
