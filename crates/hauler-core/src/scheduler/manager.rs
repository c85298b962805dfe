//! Public entry point: `TransferManager` runs one batch at a time.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::batch::Orchestrator;
use super::events::EventSink;
use super::stats::{BatchResult, BatchStats};
use crate::config::{ConfigError, EngineConfig};
use crate::control::{ManagerState, TransferControl};
use crate::request::TransferRequest;

/// Caller misuse detected before a batch starts. Transfer failures never
/// surface here; they are reported per request.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("destination {} appears more than once in the batch", .0.display())]
    DuplicateDestination(PathBuf),
    #[error("a batch is already running")]
    AlreadyRunning,
}

pub struct TransferManager {
    config: Arc<EngineConfig>,
    control: TransferControl,
    stats: watch::Sender<BatchStats>,
}

/// Cloneable remote for a manager: cancel, pause, resume, observe.
#[derive(Clone)]
pub struct ManagerHandle {
    control: TransferControl,
    stats: watch::Receiver<BatchStats>,
}

impl TransferManager {
    /// Validates `config`; a zero ceiling or an out-of-range factor is refused.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        tracing::info!(
            network = config.network_concurrency,
            io = config.io_concurrency,
            min = config.min_concurrency,
            "transfer manager initialized"
        );
        let (stats, _) = watch::channel(BatchStats::default());
        Ok(Self {
            config: Arc::new(config),
            control: TransferControl::new(),
            stats,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            control: self.control.clone(),
            stats: self.stats.subscribe(),
        }
    }

    /// Run `requests` to completion. Every request gets exactly one
    /// `Completed` event on `sink`; the returned result aggregates them.
    pub async fn submit_batch(
        &self,
        requests: Vec<TransferRequest>,
        sink: EventSink,
    ) -> Result<BatchResult, SubmitError> {
        let mut seen = HashSet::with_capacity(requests.len());
        for r in &requests {
            if !seen.insert(r.destination.as_path()) {
                return Err(SubmitError::DuplicateDestination(r.destination.clone()));
            }
        }
        drop(seen);

        let token = self.control.begin_batch().ok_or(SubmitError::AlreadyRunning)?;
        let mut guard = BatchGuard {
            control: &self.control,
            token: token.clone(),
            finished: false,
        };
        let orchestrator = Orchestrator::new(
            self.config.clone(),
            self.control.clone(),
            token,
            requests,
            sink,
            self.stats.clone(),
        );
        let result = orchestrator.run().await;
        guard.finished = true;
        self.control.finish_batch(result.cancelled);
        Ok(result)
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn state(&self) -> ManagerState {
        self.control.state()
    }

    /// Latest counters of the running or last batch.
    pub fn stats(&self) -> BatchStats {
        self.stats.borrow().clone()
    }
}

impl ManagerHandle {
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn state(&self) -> ManagerState {
        self.control.state()
    }

    pub fn stats(&self) -> BatchStats {
        self.stats.borrow().clone()
    }

    /// Resolves when the manager enters `state`.
    pub async fn wait_for_state(&self, state: ManagerState) {
        let mut rx = self.control.watch_state();
        let _ = rx.wait_for(|s| *s == state).await;
    }
}

/// Cancels and closes the batch if `submit_batch` is dropped mid-flight.
struct BatchGuard<'a> {
    control: &'a TransferControl,
    token: CancellationToken,
    finished: bool,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.token.cancel();
            self.control.finish_batch(true);
        }
    }
}
