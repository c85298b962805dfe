//! Retry and backoff policy.
//!
//! This module encapsulates error classification (network, lock, integrity,
//! protocol, cancelled) and backoff decisions so that the strategies and the
//! batch orchestrator share a consistent policy.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{classify, classify_curl_error, classify_http_status, classify_io_error};
pub use error::TransferError;
pub use policy::{Backoff, ErrorKind, RetryDecision, RetryPolicy};
pub use run::run_with_retry;
