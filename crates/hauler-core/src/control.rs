//! Batch control: cancellation token, pause gate and manager state.
//!
//! One `TransferControl` lives inside each `TransferManager`; clones are
//! handed to callers (through `ManagerHandle`) so they can cancel or pause a
//! running batch from another task. Every batch gets a fresh cancellation
//! token, so cancelling one batch never poisons the next.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::retry::TransferError;
use crate::scheduler::{ConcurrencyLimiter, LimiterPermit};

/// Lifecycle of the transfer manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Idle,
    Running,
    /// Paused: in-flight transfers continue, nothing new is admitted.
    Draining,
    Completed,
    Cancelled,
}

impl ManagerState {
    pub fn is_active(self) -> bool {
        matches!(self, ManagerState::Running | ManagerState::Draining)
    }
}

struct Inner {
    token: Mutex<CancellationToken>,
    paused: watch::Sender<bool>,
    state: watch::Sender<ManagerState>,
}

/// Cloneable control handle shared by the manager and its callers.
#[derive(Clone)]
pub struct TransferControl {
    inner: Arc<Inner>,
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        let (state, _) = watch::channel(ManagerState::Idle);
        Self {
            inner: Arc::new(Inner {
                token: Mutex::new(CancellationToken::new()),
                paused,
                state,
            }),
        }
    }

    /// Start a batch: installs a fresh token and moves to `Running`.
    /// Returns `None` when a batch is already active.
    pub(crate) fn begin_batch(&self) -> Option<CancellationToken> {
        let mut started = false;
        self.inner.state.send_if_modified(|s| {
            if s.is_active() {
                return false;
            }
            *s = ManagerState::Running;
            started = true;
            true
        });
        if !started {
            return None;
        }
        self.inner.paused.send_replace(false);
        let token = CancellationToken::new();
        *self.lock_token() = token.clone();
        Some(token)
    }

    /// Freeze the state once the batch resolves.
    pub(crate) fn finish_batch(&self, cancelled: bool) {
        self.inner.paused.send_replace(false);
        self.inner.state.send_replace(if cancelled {
            ManagerState::Cancelled
        } else {
            ManagerState::Completed
        });
    }

    /// Cancel the running batch. No-op when idle.
    pub fn cancel(&self) {
        if self.state().is_active() {
            self.lock_token().cancel();
        }
    }

    /// Stop admitting new transfers. In-flight ones keep running.
    pub fn pause(&self) {
        self.inner.state.send_if_modified(|s| {
            if *s == ManagerState::Running {
                *s = ManagerState::Draining;
                true
            } else {
                false
            }
        });
        if self.state() == ManagerState::Draining {
            self.inner.paused.send_replace(true);
        }
    }

    pub fn resume(&self) {
        self.inner.paused.send_replace(false);
        self.inner.state.send_if_modified(|s| {
            if *s == ManagerState::Draining {
                *s = ManagerState::Running;
                true
            } else {
                false
            }
        });
    }

    pub fn state(&self) -> ManagerState {
        *self.inner.state.borrow()
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<ManagerState> {
        self.inner.state.subscribe()
    }

    /// Wait while paused. Returns `Cancelled` if `token` fires first.
    pub async fn wait_until_resumed(&self, token: &CancellationToken) -> Result<(), TransferError> {
        if token.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let mut rx = self.inner.paused.subscribe();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(TransferError::Cancelled),
            res = rx.wait_for(|paused| !*paused) => match res {
                Ok(_) => Ok(()),
                Err(_) => Err(TransferError::Cancelled),
            },
        }
    }

    /// Take a slot on `limiter` for a new request. A slot granted after a
    /// pause was requested goes straight back to the queue and admission
    /// waits for `resume`.
    pub(crate) async fn admit(
        &self,
        limiter: &ConcurrencyLimiter,
        token: &CancellationToken,
    ) -> Result<LimiterPermit, TransferError> {
        loop {
            self.wait_until_resumed(token).await?;
            let permit = limiter.acquire(token).await?;
            if !self.is_paused() {
                return Ok(permit);
            }
            drop(permit);
        }
    }

    fn lock_token(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.inner
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn lifecycle_transitions() {
        let c = TransferControl::new();
        assert_eq!(c.state(), ManagerState::Idle);
        let token = c.begin_batch().unwrap();
        assert_eq!(c.state(), ManagerState::Running);
        assert!(c.begin_batch().is_none());

        c.pause();
        assert_eq!(c.state(), ManagerState::Draining);
        assert!(c.is_paused());
        c.resume();
        assert_eq!(c.state(), ManagerState::Running);

        c.cancel();
        assert!(token.is_cancelled());
        c.finish_batch(true);
        assert_eq!(c.state(), ManagerState::Cancelled);

        let next = c.begin_batch().unwrap();
        assert!(!next.is_cancelled());
    }

    #[test]
    fn pause_when_idle_is_ignored() {
        let c = TransferControl::new();
        c.pause();
        assert_eq!(c.state(), ManagerState::Idle);
        assert!(!c.is_paused());
    }

    #[tokio::test]
    async fn wait_until_resumed_unblocks_on_resume_and_cancel() {
        let c = TransferControl::new();
        let token = c.begin_batch().unwrap();
        c.pause();

        let waiter = {
            let c = c.clone();
            let token = token.clone();
            tokio::spawn(async move { c.wait_until_resumed(&token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        c.resume();
        assert!(waiter.await.unwrap().is_ok());

        c.pause();
        let waiter = {
            let c = c.clone();
            let token = token.clone();
            tokio::spawn(async move { c.wait_until_resumed(&token).await })
        };
        c.cancel();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(TransferError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn queued_admission_is_held_back_by_pause() {
        let c = TransferControl::new();
        let token = c.begin_batch().unwrap();
        let limiter = ConcurrencyLimiter::new("network", 1);
        let holder = limiter.acquire(&token).await.unwrap();

        let admission = {
            let c = c.clone();
            let limiter = limiter.clone();
            let token = token.clone();
            tokio::spawn(async move { c.admit(&limiter, &token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(limiter.queued(), 1);

        c.pause();
        drop(holder);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!admission.is_finished());
        assert_eq!(limiter.in_flight(), 0);

        c.resume();
        let permit = tokio::time::timeout(Duration::from_secs(1), admission)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(limiter.in_flight(), 1);
        drop(permit);
        assert_eq!(limiter.in_flight(), 0);
    }
}
