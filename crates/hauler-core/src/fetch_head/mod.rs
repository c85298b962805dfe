//! HTTP HEAD / metadata probing.
//!
//! Uses the curl crate (libcurl) to fetch response headers and confirm
//! `Content-Length` and `Accept-Ranges: bytes` before a chunked transfer.
//! Also owns the shared curl handle setup used by body fetches.

mod parse;

pub(crate) use parse::HeaderCollector;

use std::time::Duration;

use curl::easy::Easy;
use tokio_util::sync::CancellationToken;

use crate::config::HttpConfig;
use crate::retry::TransferError;

/// Result of a HEAD request: key headers needed for chunked download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadResult {
    /// Final HTTP status after redirects.
    pub status: u32,
    /// Total size in bytes, if `Content-Length` is present.
    pub content_length: Option<u64>,
    /// True if server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
    pub location: Option<String>,
}

impl HeadResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Ranges are usable only with a known length.
    pub fn supports_ranges(&self) -> bool {
        self.accept_ranges && self.content_length.is_some()
    }
}

/// Reject anything that is not an absolute http(s) URL before handing it to curl.
pub(crate) fn validate_url(raw: &str) -> Result<url::Url, TransferError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| TransferError::Protocol(format!("invalid URL {raw:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(TransferError::Protocol(format!(
            "unsupported URL scheme {other:?}"
        ))),
    }
}

/// Apply URL, redirect, timeout and low-speed settings to a curl handle.
pub(crate) fn configure_easy(
    easy: &mut Easy,
    url: &str,
    http: &HttpConfig,
) -> Result<(), TransferError> {
    let parsed = validate_url(url)?;
    easy.url(parsed.as_str())?;
    easy.follow_location(http.max_redirects > 0)?;
    easy.max_redirections(http.max_redirects)?;
    easy.connect_timeout(Duration::from_secs(http.connect_timeout_secs.max(1)))?;
    if http.low_speed_limit_bytes > 0 && http.low_speed_time_secs > 0 {
        easy.low_speed_limit(http.low_speed_limit_bytes)?;
        easy.low_speed_time(Duration::from_secs(http.low_speed_time_secs))?;
    }
    let agent = http
        .user_agent
        .clone()
        .unwrap_or_else(|| format!("hauler/{}", env!("CARGO_PKG_VERSION")));
    easy.useragent(&agent)?;
    // Progress callbacks are how cancellation reaches the curl thread.
    easy.progress(true)?;
    Ok(())
}

/// Performs a HEAD request and returns the final response head.
///
/// Runs in the current thread; use [`probe`] from async code. Non-2xx
/// statuses are returned as `TransferError::Http`.
pub fn probe_blocking(
    url: &str,
    http: &HttpConfig,
    cancel: &CancellationToken,
) -> Result<HeadResult, TransferError> {
    let mut easy = Easy::new();
    configure_easy(&mut easy, url, http)?;
    easy.nobody(true)?;

    let mut collector = HeaderCollector::new(http.max_redirects > 0);
    let mut head = None;
    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Some(h) = collector.push(data) {
                head = Some(h);
            }
            true
        })?;
        transfer.progress_function(|_, _, _, _| !cancel.is_cancelled())?;
        if let Err(e) = transfer.perform() {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            return Err(e.into());
        }
    }

    let mut head = match head {
        Some(h) => h,
        None => HeadResult {
            status: easy.response_code()?,
            ..HeadResult::default()
        },
    };
    if head.status == 0 {
        head.status = easy.response_code()?;
    }
    if !head.is_success() {
        return Err(TransferError::Http(head.status));
    }
    Ok(head)
}

/// Async HEAD probe: runs curl on the blocking pool and returns as soon as
/// `cancel` fires (the curl thread exits at its next progress callback).
pub async fn probe(
    url: &str,
    http: &HttpConfig,
    cancel: &CancellationToken,
) -> Result<HeadResult, TransferError> {
    let url_owned = url.to_string();
    let http = http.clone();
    let thread_cancel = cancel.clone();
    let join = tokio::task::spawn_blocking(move || probe_blocking(&url_owned, &http, &thread_cancel));
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
        res = join => match res {
            Ok(r) => r,
            Err(e) => Err(TransferError::Protocol(format!("HEAD worker failed: {e}"))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_url_rejects_bad_input() {
        assert!(validate_url("http://example.com/a.bin").is_ok());
        assert!(validate_url("https://example.com/a.bin").is_ok());
        assert!(matches!(
            validate_url("not a url"),
            Err(TransferError::Protocol(_))
        ));
        assert!(matches!(
            validate_url("ftp://example.com/a"),
            Err(TransferError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn probe_returns_immediately_when_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = probe("http://127.0.0.1:9/never", &HttpConfig::default(), &cancel).await;
        assert!(matches!(res, Err(TransferError::Cancelled)));
    }
}
