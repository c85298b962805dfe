//! Parse HTTP response header lines into HeadResult.
//!
//! libcurl hands every header line of every response block to the header
//! callback, including interim `100 Continue` blocks and followed redirects.
//! `HeaderCollector` keeps only the final block.

use super::HeadResult;

/// Status code from a line like `HTTP/1.1 206 Partial Content`.
pub(crate) fn parse_status_line(line: &str) -> Option<u32> {
    let line = line.trim();
    if !line.starts_with("HTTP/") {
        return None;
    }
    line.split_whitespace().nth(1)?.parse().ok()
}

/// Parse collected header lines (status line first) into HeadResult.
pub(crate) fn parse_headers(lines: &[String]) -> HeadResult {
    let mut head = HeadResult::default();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(code) = parse_status_line(line) {
            head.status = code;
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                head.content_length = value.parse::<u64>().ok();
            } else if name.eq_ignore_ascii_case("accept-ranges") {
                head.accept_ranges = value.eq_ignore_ascii_case("bytes");
            } else if name.eq_ignore_ascii_case("location") {
                head.location = Some(value.to_string());
            }
        }
    }
    head
}

/// Accumulates raw header lines and yields the final response head once its
/// terminating blank line arrives.
#[derive(Debug, Default)]
pub(crate) struct HeaderCollector {
    lines: Vec<String>,
    follow_redirects: bool,
}

impl HeaderCollector {
    pub(crate) fn new(follow_redirects: bool) -> Self {
        Self {
            lines: Vec::new(),
            follow_redirects,
        }
    }

    /// Feed one raw header line. Returns the parsed head when a block that is
    /// neither informational nor a followed redirect completes.
    pub(crate) fn push(&mut self, raw: &[u8]) -> Option<HeadResult> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end();
        if parse_status_line(line).is_some() {
            self.lines.clear();
        }
        if !line.is_empty() {
            self.lines.push(line.to_string());
            return None;
        }
        if self.lines.is_empty() {
            return None;
        }
        let head = parse_headers(&self.lines);
        self.lines.clear();
        if (100..200).contains(&head.status) {
            return None;
        }
        if self.follow_redirects && (300..400).contains(&head.status) && head.location.is_some() {
            return None;
        }
        Some(head)
    }
}
