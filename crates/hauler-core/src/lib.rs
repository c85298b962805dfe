//! hauler-core: adaptive, concurrent bulk file-transfer engine.
//!
//! A caller hands [`TransferManager::submit_batch`] a list of
//! [`TransferRequest`]s and receives per-request [`TransferEvent`]s plus an
//! aggregate [`BatchResult`]. Network fetches and disk writes are admitted
//! through separate resizable limiters; destinations are only ever replaced
//! by an atomic rename of a fully written `.part` sibling.

pub mod config;
pub mod logging;

pub mod checksum;
pub mod control;
pub mod downloader;
pub mod fetch_head;
pub mod progress;
pub mod request;
pub mod retry;
pub mod scheduler;
pub mod segmenter;
pub mod storage;

pub use config::{ConfigError, EngineConfig};
pub use control::{ManagerState, TransferControl};
pub use progress::TransferProgress;
pub use request::{TransferOutcome, TransferRequest};
pub use retry::{ErrorKind, TransferError};
pub use scheduler::{
    BatchResult, BatchStats, EventSink, ManagerHandle, SubmitError, TransferEvent, TransferManager,
};
