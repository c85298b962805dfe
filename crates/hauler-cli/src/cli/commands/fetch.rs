//! `hauler fetch` – run one batch from a transfer list.

use anyhow::{bail, Context, Result};
use hauler_core::checksum;
use hauler_core::progress::{format_eta, format_rate};
use hauler_core::{EngineConfig, EventSink, TransferEvent, TransferManager};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::cli::list::{load_list, ListEntry};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    pub network: Option<usize>,
    pub io: Option<usize>,
    pub verify: bool,
}

/// Apply command-line ceiling overrides, keeping the minimum reachable.
pub fn apply_overrides(mut cfg: EngineConfig, opts: &FetchOptions) -> EngineConfig {
    if let Some(n) = opts.network {
        cfg.network_concurrency = n;
    }
    if let Some(n) = opts.io {
        cfg.io_concurrency = n;
    }
    cfg.min_concurrency = cfg.min_concurrency.min(cfg.network_concurrency).max(1);
    cfg
}

/// Split entries into those that still need fetching and those already current.
async fn skip_current(entries: Vec<ListEntry>) -> Result<(Vec<ListEntry>, usize)> {
    tokio::task::spawn_blocking(move || {
        let mut pending = Vec::with_capacity(entries.len());
        let mut current = 0;
        for entry in entries {
            let up_to_date = match &entry.sha256 {
                Some(expected) => checksum::matches_sha256(&entry.path, expected)?,
                None => false,
            };
            if up_to_date {
                tracing::info!(path = %entry.path.display(), "already up to date");
                current += 1;
            } else {
                pending.push(entry);
            }
        }
        Ok::<_, anyhow::Error>((pending, current))
    })
    .await
    .context("checksum scan task")?
}

pub async fn run_fetch(cfg: EngineConfig, list: &Path, opts: FetchOptions) -> Result<()> {
    let entries = load_list(list)?;
    let listed = entries.len();
    let (pending, current) = skip_current(entries).await?;
    if current > 0 {
        println!("{current} of {listed} file(s) already up to date");
    }
    if pending.is_empty() {
        println!("Nothing to fetch.");
        return Ok(());
    }

    let manager = TransferManager::new(apply_overrides(cfg, &opts))?;
    let handle = manager.handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ncancelling...");
            handle.cancel();
        }
    });

    let requests: Vec<_> = pending.iter().map(ListEntry::to_request).collect();
    let (sink, mut events) = EventSink::channel();
    let labels: Vec<String> = pending.iter().map(ListEntry::label).collect();
    let printer = tokio::spawn(async move {
        let mut last_print: Option<Instant> = None;
        let mut succeeded = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                TransferEvent::Progress {
                    index, progress, ..
                } => {
                    let now = Instant::now();
                    if last_print.is_some_and(|t| now.duration_since(t) < PROGRESS_INTERVAL) {
                        continue;
                    }
                    println!(
                        "  {:.1}%  {}  ETA {}  {}",
                        progress.batch_percent(),
                        format_rate(progress.bytes_per_sec),
                        format_eta(progress.eta_secs),
                        labels[index],
                    );
                    last_print = Some(now);
                }
                TransferEvent::Completed { index, outcome } => match &outcome.error {
                    None => succeeded.push(index),
                    Some(err) if outcome.is_cancelled() => {
                        tracing::debug!(index, "cancelled: {}", err);
                    }
                    Some(err) => eprintln!("  failed: {}: {}", labels[index], err),
                },
            }
        }
        succeeded
    });

    let result = manager.submit_batch(requests, sink).await;
    ctrl_c.abort();
    let result = result?;
    let succeeded = printer.await.context("progress printer task")?;

    println!(
        "{} completed, {} failed, {} cancelled in {:.2}s",
        result.completed,
        result.failed,
        result.cancelled_requests,
        result.duration_secs()
    );

    let mut mismatched = 0usize;
    if opts.verify {
        for index in succeeded {
            let entry = &pending[index];
            let Some(expected) = &entry.sha256 else {
                continue;
            };
            if !checksum::matches_sha256(&entry.path, expected)? {
                eprintln!("  checksum mismatch: {}", entry.path.display());
                mismatched += 1;
            }
        }
    }

    if result.cancelled {
        bail!("cancelled");
    }
    if result.failed > 0 || mismatched > 0 {
        bail!(
            "{} file(s) failed, {} checksum mismatch(es)",
            result.failed,
            mismatched
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_ceilings_and_clamp_minimum() {
        let cfg = EngineConfig {
            network_concurrency: 80,
            io_concurrency: 30,
            min_concurrency: 15,
            ..EngineConfig::default()
        };
        let opts = FetchOptions {
            network: Some(4),
            io: Some(2),
            verify: false,
        };
        let cfg = apply_overrides(cfg, &opts);
        assert_eq!(cfg.network_concurrency, 4);
        assert_eq!(cfg.io_concurrency, 2);
        assert_eq!(cfg.min_concurrency, 4);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn no_overrides_keep_config() {
        let cfg = apply_overrides(EngineConfig::default(), &FetchOptions::default());
        let default = EngineConfig::default();
        assert_eq!(cfg.network_concurrency, default.network_concurrency);
        assert_eq!(cfg.io_concurrency, default.io_concurrency);
        assert_eq!(cfg.min_concurrency, default.min_concurrency);
    }
}
