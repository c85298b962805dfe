//! Streaming HTTP GET: libcurl runs on a blocking thread and hands the
//! response head, then body chunks, to the async side through a bounded
//! channel.
//!
//! The async side owns every disk write and reacts to cancellation at once;
//! the curl thread notices the closed channel (or the token) at its next
//! callback and aborts the transfer.

use std::cell::Cell;

use curl::easy::Easy;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::HttpConfig;
use crate::fetch_head::{configure_easy, HeadResult, HeaderCollector};
use crate::retry::TransferError;
use crate::segmenter::ChunkDescriptor;

/// Body chunks buffered between the curl thread and the writer.
const CHANNEL_DEPTH: usize = 32;

enum BodyEvent {
    Head(HeadResult),
    Data(Vec<u8>),
}

/// An open response whose status has been checked.
pub struct BodyStream {
    rx: mpsc::Receiver<BodyEvent>,
    worker: Option<JoinHandle<Result<(), TransferError>>>,
    cancel: CancellationToken,
    expected_len: Option<u64>,
    received: u64,
}

/// Start a GET for `url` (optionally restricted to `range`) and wait for the
/// response head. Non-2xx statuses fail with `TransferError::Http`; a range
/// request answered without `206` fails with `TransferError::Protocol`.
pub async fn open(
    url: &str,
    range: Option<&ChunkDescriptor>,
    http: &HttpConfig,
    cancel: &CancellationToken,
) -> Result<BodyStream, TransferError> {
    if cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }
    let (tx, mut rx) = mpsc::channel(CHANNEL_DEPTH);
    let url_owned = url.to_string();
    let curl_range = range.map(ChunkDescriptor::curl_range);
    let http_owned = http.clone();
    let thread_cancel = cancel.clone();
    let worker = tokio::task::spawn_blocking(move || {
        run_curl(&url_owned, curl_range.as_deref(), &http_owned, &tx, &thread_cancel)
    });

    let first = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        ev = rx.recv() => ev,
    };
    let head = match first {
        Some(BodyEvent::Head(head)) => head,
        Some(BodyEvent::Data(_)) => {
            return Err(TransferError::Protocol("body arrived before headers".into()))
        }
        None => {
            join_worker(worker).await?;
            return Err(TransferError::Protocol("response ended without headers".into()));
        }
    };

    if !head.is_success() {
        return Err(TransferError::Http(head.status));
    }
    let expected_len = match range {
        Some(chunk) => {
            if head.status != 206 {
                return Err(TransferError::Protocol(format!(
                    "range {} answered with HTTP {}",
                    chunk.range_header_value(),
                    head.status
                )));
            }
            if let Some(len) = head.content_length.filter(|len| *len != chunk.len()) {
                return Err(TransferError::Protocol(format!(
                    "range {} answered with {len} bytes",
                    chunk.range_header_value()
                )));
            }
            Some(chunk.len())
        }
        None => head.content_length,
    };

    Ok(BodyStream {
        rx,
        worker: Some(worker),
        cancel: cancel.clone(),
        expected_len,
        received: 0,
    })
}

impl BodyStream {
    /// Length the body must have, when known.
    pub fn expected_len(&self) -> Option<u64> {
        self.expected_len
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Next body chunk, `None` at a complete end of body.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransferError> {
        let ev = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            ev = self.rx.recv() => ev,
        };
        match ev {
            Some(BodyEvent::Data(data)) => {
                self.received += data.len() as u64;
                if let Some(expected) = self.expected_len {
                    if self.received > expected {
                        return Err(TransferError::Protocol(format!(
                            "body exceeds advertised length {expected}"
                        )));
                    }
                }
                Ok(Some(data))
            }
            Some(BodyEvent::Head(_)) => {
                Err(TransferError::Protocol("unexpected second response head".into()))
            }
            None => {
                if let Some(worker) = self.worker.take() {
                    join_worker(worker).await?;
                }
                if let Some(expected) = self.expected_len {
                    if self.received != expected {
                        return Err(TransferError::PartialTransfer {
                            expected,
                            received: self.received,
                        });
                    }
                }
                Ok(None)
            }
        }
    }

    /// Collect the whole body in memory, calling `on_bytes` with the running
    /// total after every chunk.
    pub async fn read_to_end<F>(mut self, mut on_bytes: F) -> Result<Vec<u8>, TransferError>
    where
        F: FnMut(u64),
    {
        let capacity = self.expected_len.unwrap_or(0).min(64 * 1024 * 1024) as usize;
        let mut buf = Vec::with_capacity(capacity);
        while let Some(data) = self.next_chunk().await? {
            buf.extend_from_slice(&data);
            on_bytes(self.received);
        }
        Ok(buf)
    }
}

async fn join_worker(worker: JoinHandle<Result<(), TransferError>>) -> Result<(), TransferError> {
    match worker.await {
        Ok(res) => res,
        Err(e) => Err(TransferError::Protocol(format!("transfer worker failed: {e}"))),
    }
}

fn run_curl(
    url: &str,
    range: Option<&str>,
    http: &HttpConfig,
    tx: &mpsc::Sender<BodyEvent>,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    let mut easy = Easy::new();
    configure_easy(&mut easy, url, http)?;
    if let Some(r) = range {
        easy.range(r)?;
    }

    let mut collector = HeaderCollector::new(http.max_redirects > 0);
    let head_sent = Cell::new(false);
    let stop = || cancel.is_cancelled() || tx.is_closed();
    let performed = {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Some(head) = collector.push(data) {
                head_sent.set(true);
                return tx.blocking_send(BodyEvent::Head(head)).is_ok();
            }
            true
        })?;
        transfer.write_function(|data| {
            if !head_sent.get() {
                return Ok(data.len());
            }
            match tx.blocking_send(BodyEvent::Data(data.to_vec())) {
                Ok(()) => Ok(data.len()),
                Err(_) => Ok(0),
            }
        })?;
        transfer.progress_function(|_, _, _, _| !stop())?;
        transfer.perform()
    };

    if let Err(e) = performed {
        if stop() {
            return Err(TransferError::Cancelled);
        }
        return Err(e.into());
    }
    if !head_sent.get() {
        let head = HeadResult {
            status: easy.response_code()?,
            ..HeadResult::default()
        };
        let _ = tx.blocking_send(BodyEvent::Head(head));
    }
    Ok(())
}
