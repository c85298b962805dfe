//! Batch scheduler.
//!
//! `TransferManager` accepts a batch, orders it largest-first and runs it in
//! waves through two resizable limiters (network and disk). Between waves the
//! adaptive controller may shrink the ceilings; failures get one more
//! low-concurrency pass before the batch resolves.

mod adaptive;
mod batch;
mod events;
mod limiter;
mod manager;
mod stats;

pub use adaptive::{AdaptiveController, Adjustment, Ceilings};
pub use events::{EventSink, TransferEvent};
pub use limiter::{ConcurrencyLimiter, LimiterPermit};
pub use manager::{ManagerHandle, SubmitError, TransferManager};
pub use stats::{BatchResult, BatchStats};
