//! Typed events published by the orchestrator.
//!
//! Per request the caller sees zero or more `Progress` events followed by
//! exactly one `Completed`. Events for one request never interleave out of
//! that order; events of different requests may interleave freely.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::progress::TransferProgress;
use crate::request::{TransferOutcome, TransferRequest};

#[derive(Debug)]
pub enum TransferEvent {
    Progress {
        /// Position of the request in the submitted list.
        index: usize,
        request: Arc<TransferRequest>,
        progress: TransferProgress,
    },
    Completed {
        index: usize,
        outcome: TransferOutcome,
    },
}

impl TransferEvent {
    pub fn index(&self) -> usize {
        match self {
            TransferEvent::Progress { index, .. } | TransferEvent::Completed { index, .. } => *index,
        }
    }
}

/// Where a batch publishes its events. A sink without a receiver drops them.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<TransferEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<TransferEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that discards every event.
    pub fn none() -> Self {
        Self::default()
    }

    /// Sink plus the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub(crate) fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.tx {
            // A caller that stopped listening does not stop the batch.
            let _ = tx.send(event);
        }
    }
}
