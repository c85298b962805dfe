//! Batch orchestration: ordering, waves, adaptive checkpoints, final pass.
//!
//! One `Orchestrator` runs per batch and is the only writer of the batch
//! counters, the progress window and the adaptive controller. Requests are
//! admitted in dispatch order, one network slot at a time, and a pause holds
//! admission at that point. Admitted requests run as tokio tasks; they report
//! byte progress over an unbounded channel and return their result through
//! the `JoinSet`. Before a completion is
//! published, any progress still queued for that request is flushed, which
//! keeps "progress*, then exactly one completion" per request.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::adaptive::AdaptiveController;
use super::events::{EventSink, TransferEvent};
use super::limiter::{ConcurrencyLimiter, LimiterPermit};
use super::stats::{BatchResult, BatchStats};
use crate::config::EngineConfig;
use crate::control::TransferControl;
use crate::downloader::{self, ProgressReporter, TransferContext, WorkerProgress};
use crate::progress::{format_eta, format_rate, ProgressTracker, TransferProgress};
use crate::request::{TransferOutcome, TransferRequest};
use crate::retry::{run_with_retry, RetryPolicy, TransferError};
use crate::storage;

/// Result of one request's pass through the retry loop.
struct TaskResult {
    index: usize,
    result: Result<u64, TransferError>,
    attempts: u32,
}

/// Pending network slot for the next request in dispatch order.
type Admission = Pin<Box<dyn Future<Output = Result<LimiterPermit, TransferError>> + Send>>;

/// A main-pass failure waiting for the final pass.
struct Deferred {
    index: usize,
    error: TransferError,
    attempts: u32,
}

pub(crate) struct Orchestrator {
    config: Arc<EngineConfig>,
    control: TransferControl,
    cancel: CancellationToken,
    sink: EventSink,
    stats_tx: watch::Sender<BatchStats>,
    requests: Vec<Arc<TransferRequest>>,
    resolved: Vec<bool>,
    stats: BatchStats,
    tracker: ProgressTracker,
    in_flight: HashMap<usize, (u64, Option<u64>)>,
    progress_tx: mpsc::UnboundedSender<WorkerProgress>,
    progress_rx: mpsc::UnboundedReceiver<WorkerProgress>,
    last_logged_decile: usize,
}

impl Orchestrator {
    pub(crate) fn new(
        config: Arc<EngineConfig>,
        control: TransferControl,
        cancel: CancellationToken,
        requests: Vec<TransferRequest>,
        sink: EventSink,
        stats_tx: watch::Sender<BatchStats>,
    ) -> Self {
        let now = Instant::now();
        let expected: u64 = requests.iter().filter_map(|r| r.expected_size).sum();
        let stats = BatchStats::start(requests.len(), expected, now);
        stats_tx.send_replace(stats.clone());
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        Self {
            config,
            control,
            cancel,
            sink,
            stats_tx,
            resolved: vec![false; requests.len()],
            requests: requests.into_iter().map(Arc::new).collect(),
            stats,
            tracker: ProgressTracker::new(now),
            in_flight: HashMap::new(),
            progress_tx,
            progress_rx,
            last_logged_decile: 0,
        }
    }

    pub(crate) async fn run(mut self) -> BatchResult {
        let started = Instant::now();
        info!(
            files = self.requests.len(),
            mib = self.stats.total_bytes_expected as f64 / 1024.0 / 1024.0,
            network = self.config.network_concurrency,
            io = self.config.io_concurrency,
            "starting batch"
        );

        self.prepare_directories().await;
        let order = self.dispatch_order();

        let network = ConcurrencyLimiter::new("network", self.config.network_concurrency);
        let io = ConcurrencyLimiter::new("io", self.config.io_concurrency);
        let mut controller = AdaptiveController::new(
            self.config.adaptive.clone(),
            network.clone(),
            io.clone(),
            self.config.min_concurrency,
        );
        let ctx = TransferContext {
            config: self.config.clone(),
            network,
            io,
            cancel: self.cancel.clone(),
        };
        let policy = RetryPolicy::from_config(&self.config.retry);

        let mut deferred = Vec::new();
        let wave_size = self.config.adaptive.checkpoint_interval.max(1);
        for wave in order.chunks(wave_size) {
            if self.cancel.is_cancelled() {
                warn!("batch cancelled, not starting further waves");
                break;
            }
            controller.checkpoint(Instant::now());
            let results = self
                .run_wave(wave, &ctx, policy, Some(&mut controller))
                .await;
            for r in results {
                match r.result {
                    Ok(bytes) => self.finish_success(r.index, bytes, r.attempts),
                    Err(e) if e.is_cancelled() => self.finish_failure(r.index, e, r.attempts),
                    Err(e) => deferred.push(Deferred {
                        index: r.index,
                        error: e,
                        attempts: r.attempts,
                    }),
                }
            }
            if controller.needs_pause() && !self.cancel.is_cancelled() {
                let pause = controller.pause_duration();
                warn!(
                    consecutive_errors = controller.consecutive_errors(),
                    pause_ms = pause.as_millis() as u64,
                    "high error rate, pausing admission"
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(pause) => {}
                }
                controller.after_pause();
            }
        }

        if !deferred.is_empty() {
            self.final_pass(deferred).await;
        }
        for index in 0..self.requests.len() {
            if !self.resolved[index] {
                self.finish_failure(index, TransferError::Cancelled, 0);
            }
        }

        let cancelled = self.cancel.is_cancelled();
        let result = BatchResult {
            total_requested: self.stats.total_requested,
            completed: self.stats.completed,
            failed: self.stats.failed,
            cancelled_requests: self.stats.cancelled_requests,
            cancelled,
            duration: started.elapsed(),
        };
        info!(
            completed = result.completed,
            failed = result.failed,
            cancelled = result.cancelled,
            secs = result.duration_secs(),
            "batch finished"
        );
        result
    }

    /// Create every destination directory up front, then let the file system
    /// settle before the first write.
    async fn prepare_directories(&self) {
        let failures = storage::ensure_dirs(self.requests.iter().map(|r| r.destination())).await;
        if !failures.is_empty() {
            warn!(count = failures.len(), "some destination directories could not be created");
        }
        let settle = self.config.settle_delay();
        if !settle.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(settle) => {}
            }
        }
    }

    /// Largest first; priority breaks ties; submission order after that.
    fn dispatch_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.requests.len()).collect();
        order.sort_by(|&a, &b| {
            let (ra, rb) = (&self.requests[a], &self.requests[b]);
            rb.expected_size
                .unwrap_or(0)
                .cmp(&ra.expected_size.unwrap_or(0))
                .then(rb.priority.cmp(&ra.priority))
        });
        order
    }

    /// Main-pass failures get one more round at low concurrency. If the batch
    /// was cancelled meanwhile they keep their main-pass error.
    async fn final_pass(&mut self, deferred: Vec<Deferred>) {
        if self.cancel.is_cancelled() {
            for d in deferred {
                self.finish_failure(d.index, d.error, d.attempts);
            }
            return;
        }
        info!(
            files = deferred.len(),
            network = self.config.final_pass_network,
            io = self.config.final_pass_io,
            "retrying failed files at reduced concurrency"
        );
        let ctx = TransferContext {
            config: self.config.clone(),
            network: ConcurrencyLimiter::new("network-final", self.config.final_pass_network),
            io: ConcurrencyLimiter::new("io-final", self.config.final_pass_io),
            cancel: self.cancel.clone(),
        };
        let policy =
            RetryPolicy::from_config(&self.config.retry).with_max_attempts(self.config.final_pass_attempts);
        let indices: Vec<usize> = deferred.iter().map(|d| d.index).collect();
        let mut earlier: HashMap<usize, Deferred> =
            deferred.into_iter().map(|d| (d.index, d)).collect();

        for r in self.run_wave(&indices, &ctx, policy, None).await {
            let prior = earlier.remove(&r.index);
            let attempts = r.attempts + prior.as_ref().map_or(0, |d| d.attempts);
            match r.result {
                Ok(bytes) => self.finish_success(r.index, bytes, attempts),
                // A cancelled retry still failed on its own merits first.
                Err(e) if e.is_cancelled() => match prior {
                    Some(d) => self.finish_failure(r.index, d.error, attempts),
                    None => self.finish_failure(r.index, e, attempts),
                },
                Err(e) => self.finish_failure(r.index, e, attempts),
            }
        }
    }

    /// Admit `indices` one at a time, in order, through the network limiter
    /// (honouring pause), run each admitted request as a task, and collect
    /// their results while forwarding progress. Completions are not
    /// published here so the caller can defer failures.
    async fn run_wave(
        &mut self,
        indices: &[usize],
        ctx: &TransferContext,
        policy: RetryPolicy,
        mut controller: Option<&mut AdaptiveController>,
    ) -> Vec<TaskResult> {
        let mut set = JoinSet::new();
        let mut task_index = HashMap::new();
        let mut queue = indices.iter().copied();
        let mut admitting: Option<(usize, Admission)> = None;
        let mut results = Vec::with_capacity(indices.len());

        loop {
            if admitting.is_none() {
                admitting = queue.next().map(|index| {
                    let control = self.control.clone();
                    let network = ctx.network.clone();
                    let cancel = ctx.cancel.clone();
                    let fut: Admission =
                        Box::pin(async move { control.admit(&network, &cancel).await });
                    (index, fut)
                });
            }
            if admitting.is_none() && set.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                Some(p) = self.progress_rx.recv() => self.on_progress(p),
                joined = set.join_next_with_id(), if !set.is_empty() => {
                    let Some(joined) = joined else { continue };
                    self.drain_progress();
                    let r = match joined {
                        Ok((_, r)) => r,
                        Err(e) => {
                            let index = task_index.get(&e.id()).copied().unwrap_or(usize::MAX);
                            error!(index, error = %e, "transfer task failed");
                            TaskResult {
                                index,
                                result: Err(TransferError::Protocol(format!("transfer task failed: {e}"))),
                                attempts: 1,
                            }
                        }
                    };
                    if r.index >= self.requests.len() {
                        continue;
                    }
                    self.in_flight.remove(&r.index);
                    if let Some(c) = controller.as_deref_mut() {
                        match &r.result {
                            Ok(_) => c.record_success(),
                            Err(e) => c.record_failure(e.kind()),
                        }
                    }
                    results.push(r);
                }
                admitted = async {
                    match admitting.as_mut() {
                        Some((_, fut)) => fut.await,
                        None => std::future::pending().await,
                    }
                }, if admitting.is_some() => {
                    let Some((index, _)) = admitting.take() else { continue };
                    match admitted {
                        Ok(permit) => {
                            let handle = set.spawn(self.request_task(index, ctx, policy, permit));
                            task_index.insert(handle.id(), index);
                        }
                        Err(e) => results.push(TaskResult {
                            index,
                            result: Err(e),
                            attempts: 0,
                        }),
                    }
                }
            }
        }
        results
    }

    /// Retry loop for one admitted request. The first attempt runs on the
    /// admission slot; retries are admitted again.
    fn request_task(
        &self,
        index: usize,
        ctx: &TransferContext,
        policy: RetryPolicy,
        permit: LimiterPermit,
    ) -> impl Future<Output = TaskResult> + Send + 'static {
        let ctx = ctx.clone();
        let control = self.control.clone();
        let request = self.requests[index].clone();
        let reporter = ProgressReporter::new(index, self.progress_tx.clone());
        async move {
            let mut admitted = Some(permit);
            let (result, attempts) = run_with_retry(&policy, &ctx.cancel, "file", |_| {
                attempt(&ctx, &control, &request, &reporter, admitted.take())
            })
            .await;
            TaskResult {
                index,
                result,
                attempts,
            }
        }
    }

    fn drain_progress(&mut self) {
        while let Ok(p) = self.progress_rx.try_recv() {
            self.on_progress(p);
        }
    }

    fn on_progress(&mut self, p: WorkerProgress) {
        if p.index >= self.requests.len() || self.resolved[p.index] {
            return;
        }
        self.in_flight.insert(p.index, (p.file_bytes, p.file_total));
        let progress = self.snapshot(p.file_bytes, p.file_total);
        self.sink.emit(TransferEvent::Progress {
            index: p.index,
            request: self.requests[p.index].clone(),
            progress,
        });
    }

    fn snapshot(&mut self, file_bytes: u64, file_total: Option<u64>) -> TransferProgress {
        let now = Instant::now();
        let in_flight: u64 = self.in_flight.values().map(|(b, _)| *b).sum();
        let cumulative = self.stats.total_bytes_transferred + in_flight;
        let cumulative_total = self.stats.total_bytes_expected.max(cumulative);
        self.tracker.record(now, cumulative);
        let rate = self.tracker.throughput(now, cumulative);
        let file_percent = match file_total {
            Some(0) => 100.0,
            Some(total) => (file_bytes as f64 / total as f64 * 100.0).min(100.0),
            None => 0.0,
        };
        TransferProgress {
            file_percent,
            file_bytes,
            file_total,
            cumulative_bytes: cumulative,
            cumulative_total,
            bytes_per_sec: rate,
            eta_secs: ProgressTracker::eta(cumulative_total - cumulative, rate),
        }
    }

    fn finish_success(&mut self, index: usize, bytes: u64, attempts: u32) {
        if self.resolved[index] {
            return;
        }
        self.in_flight.remove(&index);
        self.stats.completed += 1;
        self.stats.total_bytes_transferred += bytes;
        let progress = self.snapshot(bytes, Some(bytes));
        self.sink.emit(TransferEvent::Progress {
            index,
            request: self.requests[index].clone(),
            progress: progress.clone(),
        });
        self.publish(
            index,
            TransferOutcome {
                request: self.requests[index].clone(),
                bytes_transferred: bytes,
                error: None,
                attempts,
            },
        );
        self.log_batch_progress(&progress);
    }

    fn finish_failure(&mut self, index: usize, error: TransferError, attempts: u32) {
        if self.resolved[index] {
            return;
        }
        self.in_flight.remove(&index);
        if error.is_cancelled() {
            self.stats.cancelled_requests += 1;
        } else {
            self.stats.failed += 1;
            error!(
                index,
                path = %self.requests[index].destination.display(),
                attempts,
                error = %error,
                "transfer failed"
            );
        }
        self.publish(
            index,
            TransferOutcome {
                request: self.requests[index].clone(),
                bytes_transferred: 0,
                error: Some(error),
                attempts,
            },
        );
    }

    fn publish(&mut self, index: usize, outcome: TransferOutcome) {
        self.resolved[index] = true;
        self.stats_tx.send_replace(self.stats.clone());
        self.sink.emit(TransferEvent::Completed { index, outcome });
    }

    /// "Progress: N% (done/total) - rate - ETA" at each 10% step of files.
    fn log_batch_progress(&mut self, progress: &TransferProgress) {
        let total = self.stats.total_requested.max(1);
        let done = self.stats.resolved();
        let decile = done * 10 / total;
        if decile > self.last_logged_decile {
            self.last_logged_decile = decile;
            info!(
                "Progress: {:.1}% ({}/{}) - {} - ETA: {}",
                progress.batch_percent(),
                self.stats.completed,
                self.stats.total_requested,
                format_rate(progress.bytes_per_sec),
                format_eta(progress.eta_secs),
            );
        }
    }
}

/// One attempt for one request, on its admission slot or a fresh one.
async fn attempt(
    ctx: &TransferContext,
    control: &TransferControl,
    request: &TransferRequest,
    reporter: &ProgressReporter,
    admitted: Option<LimiterPermit>,
) -> Result<u64, TransferError> {
    let permit = match admitted {
        Some(permit) => permit,
        None => control.admit(&ctx.network, &ctx.cancel).await?,
    };
    downloader::transfer(ctx, request, reporter, permit).await
}
