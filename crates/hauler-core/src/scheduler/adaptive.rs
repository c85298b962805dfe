//! Adaptive concurrency: shrink the network and I/O ceilings when a batch
//! runs into repeated failures, pause admission when errors pile up.
//!
//! Counters are fed from the orchestrator's completion handling (single
//! writer); decisions are only taken at wave checkpoints, never per file.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::limiter::ConcurrencyLimiter;
use crate::config::AdaptiveConfig;
use crate::retry::ErrorKind;

/// Growth step used by the optional recovery path.
const RECOVERY_FACTOR: f64 = 1.25;

/// A pair of ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ceilings {
    pub network: usize,
    pub io: usize,
}

/// Why a checkpoint changed the ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    /// Too many lock/permission failures.
    PermissionShrink { from: Ceilings, to: Ceilings },
    /// Long run of consecutive failures.
    ErrorShrink { from: Ceilings, to: Ceilings },
    /// Enough clean checkpoints to grow back toward the initial ceilings.
    Recovery { from: Ceilings, to: Ceilings },
}

/// Owns the two limiters for one batch and resizes them.
#[derive(Debug)]
pub struct AdaptiveController {
    cfg: AdaptiveConfig,
    network: ConcurrencyLimiter,
    io: ConcurrencyLimiter,
    initial: Ceilings,
    floor: Ceilings,
    current: Ceilings,
    consecutive_errors: u32,
    permission_errors: u32,
    failures_since_checkpoint: u32,
    clean_checkpoints: u32,
    last_adjustment: Option<Instant>,
}

impl AdaptiveController {
    /// Take control of `network` and `io`; their current ceilings become the
    /// initial (maximum) values. `min_concurrency` is the floor.
    pub fn new(
        cfg: AdaptiveConfig,
        network: ConcurrencyLimiter,
        io: ConcurrencyLimiter,
        min_concurrency: usize,
    ) -> Self {
        let initial = Ceilings {
            network: network.ceiling(),
            io: io.ceiling(),
        };
        let min = min_concurrency.max(1);
        let floor = Ceilings {
            network: min.min(initial.network),
            io: min.min(initial.io),
        };
        Self {
            cfg,
            network,
            io,
            initial,
            floor,
            current: initial,
            consecutive_errors: 0,
            permission_errors: 0,
            failures_since_checkpoint: 0,
            clean_checkpoints: 0,
            last_adjustment: None,
        }
    }

    pub fn current(&self) -> Ceilings {
        self.current
    }

    pub fn initial(&self) -> Ceilings {
        self.initial
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn permission_errors(&self) -> u32 {
        self.permission_errors
    }

    pub fn network(&self) -> &ConcurrencyLimiter {
        &self.network
    }

    pub fn io(&self) -> &ConcurrencyLimiter {
        &self.io
    }

    /// A request finished successfully: the error streak decays by one.
    pub fn record_success(&mut self) {
        self.consecutive_errors = self.consecutive_errors.saturating_sub(1);
    }

    /// A request failed with `kind`. Cancellations are not failures.
    pub fn record_failure(&mut self, kind: ErrorKind) {
        if kind == ErrorKind::Cancelled {
            return;
        }
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.failures_since_checkpoint = self.failures_since_checkpoint.saturating_add(1);
        if kind == ErrorKind::Lock {
            self.permission_errors = self.permission_errors.saturating_add(1);
        }
    }

    /// Evaluate the policy before a wave. Applies any change to the limiters
    /// and returns it.
    pub fn checkpoint(&mut self, now: Instant) -> Option<Adjustment> {
        let clean = self.failures_since_checkpoint == 0;
        self.failures_since_checkpoint = 0;

        if self.permission_errors > self.cfg.permission_error_threshold {
            let from = self.current;
            let to = Ceilings {
                network: scale(from.network, self.cfg.network_shrink_factor, self.floor.network),
                io: scale(from.io, self.cfg.io_shrink_factor, self.floor.io),
            };
            warn!(
                permission_errors = self.permission_errors,
                network = to.network,
                io = to.io,
                "permission errors detected, reducing concurrency"
            );
            self.permission_errors = 0;
            self.clean_checkpoints = 0;
            if to != from {
                self.apply(to, now);
                return Some(Adjustment::PermissionShrink { from, to });
            }
            return None;
        }

        let cooled_down = self.last_adjustment.map_or(true, |at| {
            now.saturating_duration_since(at) >= secs(self.cfg.cooldown_secs)
        });
        if self.consecutive_errors > self.cfg.consecutive_error_threshold
            && self.current.network > self.floor.network
            && cooled_down
        {
            let from = self.current;
            let to = Ceilings {
                network: scale(self.initial.network, 0.5, self.floor.network).min(from.network),
                io: scale(self.initial.io, 0.5, self.floor.io).min(from.io),
            };
            self.clean_checkpoints = 0;
            if to != from {
                info!(
                    consecutive_errors = self.consecutive_errors,
                    network = to.network,
                    io = to.io,
                    "reducing concurrency"
                );
                self.apply(to, now);
                return Some(Adjustment::ErrorShrink { from, to });
            }
            return None;
        }

        let Some(needed) = self.cfg.recovery_checkpoints else {
            return None;
        };
        if !clean {
            self.clean_checkpoints = 0;
            return None;
        }
        self.clean_checkpoints += 1;
        if self.clean_checkpoints < needed.max(1) || self.current == self.initial {
            return None;
        }
        self.clean_checkpoints = 0;
        let from = self.current;
        let to = Ceilings {
            network: grow(from.network, self.initial.network),
            io: grow(from.io, self.initial.io),
        };
        info!(network = to.network, io = to.io, "error rate subsided, growing concurrency");
        self.apply(to, now);
        Some(Adjustment::Recovery { from, to })
    }

    /// True when the error streak warrants pausing admission after a wave.
    pub fn needs_pause(&self) -> bool {
        self.consecutive_errors > self.cfg.pause_error_threshold
    }

    pub fn pause_duration(&self) -> Duration {
        secs(self.cfg.pause_secs)
    }

    /// Clear the streak once the pause has elapsed.
    pub fn after_pause(&mut self) {
        self.consecutive_errors = 0;
    }

    fn apply(&mut self, to: Ceilings, now: Instant) {
        self.network.resize(to.network);
        self.io.resize(to.io);
        self.current = to;
        self.last_adjustment = Some(now);
    }
}

fn scale(value: usize, factor: f64, floor: usize) -> usize {
    ((value as f64 * factor).floor() as usize).max(floor).max(1)
}

fn grow(value: usize, cap: usize) -> usize {
    let grown = (value as f64 * RECOVERY_FACTOR).ceil() as usize;
    grown.max(value + 1).min(cap)
}

fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s.max(0.0))
}
