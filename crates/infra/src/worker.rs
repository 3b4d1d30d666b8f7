//! Background worker lifecycle.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Handle to control and join a background worker task.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn new(name: &'static str, shutdown: watch::Sender<bool>, join: JoinHandle<()>) -> Self {
        Self {
            name,
            shutdown,
            join,
        }
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }

    /// Request graceful shutdown, waiting at most `drain` before aborting
    /// the task.
    pub async fn shutdown_within(self, drain: Duration) {
        let _ = self.shutdown.send(true);
        let abort = self.join.abort_handle();
        if tokio::time::timeout(drain, self.join).await.is_err() {
            warn!(worker = self.name, "worker did not drain in time, aborting");
            abort.abort();
        }
    }
}
