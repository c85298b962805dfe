//! Resizable FIFO admission gate.
//!
//! Two instances exist per batch: one for network fetches and one for disk
//! writes. The adaptive controller resizes them between waves; shrinking
//! never preempts running holders, it only delays future admissions.
//!
//! A queued waiter receives its permit through a oneshot channel. If the
//! waiter gave up (cancellation) the permit is dropped with the receiver and
//! its slot goes straight back to the gate, so abandoned waits never leak.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::retry::TransferError;

#[derive(Debug)]
struct State {
    ceiling: usize,
    in_flight: usize,
    peak: usize,
    waiters: VecDeque<oneshot::Sender<LimiterPermit>>,
}

#[derive(Debug)]
struct Shared {
    name: &'static str,
    state: Mutex<State>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Cloneable handle to one gate.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    shared: Arc<Shared>,
}

/// Held while an admitted operation runs; dropping it frees the slot.
#[derive(Debug)]
pub struct LimiterPermit {
    shared: Arc<Shared>,
    defused: bool,
}

impl ConcurrencyLimiter {
    /// New gate with `ceiling` slots (at least one).
    pub fn new(name: &'static str, ceiling: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                state: Mutex::new(State {
                    ceiling: ceiling.max(1),
                    in_flight: 0,
                    peak: 0,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    pub fn ceiling(&self) -> usize {
        self.shared.lock().ceiling
    }

    pub fn in_flight(&self) -> usize {
        self.shared.lock().in_flight
    }

    /// Waiters still queued (including ones that gave up but were not yet reaped).
    pub fn queued(&self) -> usize {
        self.shared.lock().waiters.len()
    }

    /// Highest `in_flight` observed since creation.
    pub fn peak_in_flight(&self) -> usize {
        self.shared.lock().peak
    }

    /// Wait for a slot in FIFO order. Returns `Cancelled` if `cancel` fires
    /// first; a permit that raced with the cancellation is released again.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<LimiterPermit, TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let rx = {
            let mut st = self.shared.lock();
            st.waiters.retain(|w| !w.is_closed());
            if st.waiters.is_empty() && st.in_flight < st.ceiling {
                st.in_flight += 1;
                st.peak = st.peak.max(st.in_flight);
                return Ok(LimiterPermit::new(self.shared.clone()));
            }
            let (tx, rx) = oneshot::channel();
            st.waiters.push_back(tx);
            rx
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            res = rx => res.map_err(|_| TransferError::Cancelled),
        }
    }

    /// Run `fut` while holding a slot.
    pub async fn admit<F, T>(&self, cancel: &CancellationToken, fut: F) -> Result<T, TransferError>
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire(cancel).await?;
        Ok(fut.await)
    }

    /// Change the ceiling (floor 1). Growing admits queued waiters at once;
    /// shrinking lets running holders finish.
    pub fn resize(&self, ceiling: usize) {
        let mut st = self.shared.lock();
        st.ceiling = ceiling.max(1);
        while st.in_flight < st.ceiling {
            let Some(tx) = st.waiters.pop_front() else {
                break;
            };
            st.in_flight += 1;
            match tx.send(LimiterPermit::new(self.shared.clone())) {
                Ok(()) => st.peak = st.peak.max(st.in_flight),
                Err(mut orphan) => {
                    orphan.defused = true;
                    st.in_flight -= 1;
                }
            }
        }
        tracing::debug!(limiter = self.shared.name, ceiling = st.ceiling, "limiter resized");
    }
}

impl LimiterPermit {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            defused: false,
        }
    }
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        if self.defused {
            return;
        }
        let mut st = self.shared.lock();
        // Hand the slot to the next live waiter if the ceiling still allows it.
        while st.in_flight <= st.ceiling {
            let Some(tx) = st.waiters.pop_front() else {
                break;
            };
            match tx.send(LimiterPermit::new(self.shared.clone())) {
                Ok(()) => return,
                Err(mut orphan) => orphan.defused = true,
            }
        }
        st.in_flight = st.in_flight.saturating_sub(1);
    }
}
