//! Long-running background workers: one thread each, stoppable through a
//! [`WorkerHandle`].

pub mod consumer_worker;
pub mod outbox_relay;

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use ledgerflow_events::BusError;

pub use consumer_worker::{ConsumerStats, ConsumerWorker};
pub use outbox_relay::{OutboxRelay, RelayReport, RelayStats};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to subscribe: {0}")]
    Subscribe(#[from] BusError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Handle to control and join a background worker.
///
/// Dropping the handle without calling [`WorkerHandle::shutdown`] also stops
/// the worker, but does not wait for it.
#[derive(Debug)]
pub struct WorkerHandle<S> {
    name: String,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<S>>,
}

impl<S: Clone + Default> WorkerHandle<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the worker's counters.
    pub fn stats(&self) -> S {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Request graceful shutdown, wait for the worker to stop and return its
    /// final counters.
    pub fn shutdown(mut self) -> S {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
        self.stats()
    }
}

pub(crate) fn spawn_worker<S, F>(name: &str, stats: Arc<Mutex<S>>, body: F) -> Result<WorkerHandle<S>, WorkerError>
where
    F: FnOnce(Receiver<()>) + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    let join = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || body(shutdown_rx))?;

    Ok(WorkerHandle {
        name: name.to_string(),
        shutdown: shutdown_tx,
        join: Some(join),
        stats,
    })
}

/// Non-blocking shutdown check. A dropped handle counts as a request.
pub(crate) fn shutdown_requested(rx: &Receiver<()>) -> bool {
    !matches!(rx.try_recv(), Err(TryRecvError::Empty))
}

/// Sleep for `delay` unless shutdown is requested first; `true` means stop.
pub(crate) fn wait_or_shutdown(rx: &Receiver<()>, delay: Duration) -> bool {
    !matches!(rx.recv_timeout(delay), Err(RecvTimeoutError::Timeout))
}

pub(crate) fn update<S>(stats: &Mutex<S>, f: impl FnOnce(&mut S)) {
    if let Ok(mut s) = stats.lock() {
        f(&mut s);
    }
}
