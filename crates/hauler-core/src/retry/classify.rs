//! Classify HTTP status, curl and I/O errors into retry policy error kinds.

use super::error::TransferError;
use super::policy::ErrorKind;
use std::io;

/// Classify an HTTP status code. Throttling, timeouts and server errors are
/// transient; everything else (404, 403, ...) will not fix itself on retry.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        408 | 429 | 500..=599 => ErrorKind::Network,
        _ => ErrorKind::Protocol,
    }
}

/// Classify a curl error.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout()
        || e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
        || e.is_ssl_connect_error()
        || e.is_http2_error()
        || e.is_http2_stream_error()
    {
        return ErrorKind::Network;
    }
    if e.is_aborted_by_callback() {
        return ErrorKind::Cancelled;
    }
    ErrorKind::Protocol
}

/// Classify an I/O error. Access-denied and busy/locked files are lock-class:
/// they typically come from antivirus scanners or indexers holding the file.
pub fn classify_io_error(e: &io::Error) -> ErrorKind {
    if e.kind() == io::ErrorKind::PermissionDenied {
        return ErrorKind::Lock;
    }
    match e.raw_os_error() {
        #[cfg(unix)]
        Some(code) if code == libc::EBUSY || code == libc::ETXTBSY || code == libc::EPERM => {
            ErrorKind::Lock
        }
        // ERROR_ACCESS_DENIED, ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
        #[cfg(windows)]
        Some(5) | Some(32) | Some(33) => ErrorKind::Lock,
        _ => ErrorKind::Integrity,
    }
}

/// Classify a transfer error into an ErrorKind.
pub fn classify(e: &TransferError) -> ErrorKind {
    match e {
        TransferError::Curl(ce) => classify_curl_error(ce),
        TransferError::Http(code) => classify_http_status(*code),
        TransferError::PartialTransfer { .. } => ErrorKind::Network,
        TransferError::Storage { source, .. } => classify_io_error(source),
        TransferError::Integrity(_) => ErrorKind::Integrity,
        TransferError::Protocol(_) => ErrorKind::Protocol,
        TransferError::Cancelled => ErrorKind::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn http_throttle_and_5xx_are_network() {
        assert_eq!(classify_http_status(429), ErrorKind::Network);
        assert_eq!(classify_http_status(503), ErrorKind::Network);
        assert_eq!(classify_http_status(500), ErrorKind::Network);
        assert_eq!(classify_http_status(408), ErrorKind::Network);
    }

    #[test]
    fn http_4xx_protocol() {
        assert_eq!(classify_http_status(404), ErrorKind::Protocol);
        assert_eq!(classify_http_status(403), ErrorKind::Protocol);
    }

    #[test]
    fn permission_denied_is_lock() {
        let e = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(classify_io_error(&e), ErrorKind::Lock);
        let te = TransferError::storage("rename", Path::new("a"), e);
        assert_eq!(te.kind(), ErrorKind::Lock);
    }

    #[cfg(unix)]
    #[test]
    fn ebusy_is_lock() {
        let e = io::Error::from_raw_os_error(libc::EBUSY);
        assert_eq!(classify_io_error(&e), ErrorKind::Lock);
    }

    #[test]
    fn other_io_is_integrity() {
        let e = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(classify_io_error(&e), ErrorKind::Integrity);
    }

    #[test]
    fn partial_and_cancelled() {
        let partial = TransferError::PartialTransfer {
            expected: 10,
            received: 4,
        };
        assert_eq!(partial.kind(), ErrorKind::Network);
        assert_eq!(TransferError::Cancelled.kind(), ErrorKind::Cancelled);
        assert!(TransferError::Cancelled.is_cancelled());
    }
}
