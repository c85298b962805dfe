//! Transfer list file: a JSON array of entries to fetch.

use anyhow::{bail, Context, Result};
use hauler_core::TransferRequest;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListEntry {
    pub url: String,
    pub path: PathBuf,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    /// Free-form note shown in progress lines.
    #[serde(default)]
    pub reason: Option<String>,
}

impl ListEntry {
    pub fn to_request(&self) -> TransferRequest {
        let req = TransferRequest::new(self.url.clone(), self.path.clone());
        match self.size {
            Some(size) => req.with_expected_size(size),
            None => req,
        }
    }

    pub fn label(&self) -> String {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());
        match &self.reason {
            Some(reason) => format!("{name} ({reason})"),
            None => name,
        }
    }
}

/// Parse list text. Relative paths are resolved against `base`.
pub fn parse_list(text: &str, base: &Path) -> Result<Vec<ListEntry>> {
    let mut entries: Vec<ListEntry> = serde_json::from_str(text).context("parse transfer list")?;
    let mut seen = HashSet::new();
    for entry in &mut entries {
        if entry.path.is_relative() {
            entry.path = base.join(&entry.path);
        }
        if !seen.insert(entry.path.clone()) {
            bail!("duplicate destination in list: {}", entry.path.display());
        }
    }
    Ok(entries)
}

pub fn load_list(path: &Path) -> Result<Vec<ListEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read transfer list {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse_list(&text, base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_optional_fields_and_resolves_relative_paths() {
        let text = r#"[
            {"url": "https://example.com/a.bin", "path": "data/a.bin", "sha256": "ab12", "size": 10},
            {"url": "https://example.com/b.bin", "path": "/abs/b.bin", "reason": "update"}
        ]"#;
        let entries = parse_list(text, Path::new("/lists")).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, PathBuf::from("/lists/data/a.bin"));
        assert_eq!(entries[0].sha256.as_deref(), Some("ab12"));
        assert_eq!(entries[0].to_request().expected_size, Some(10));
        assert_eq!(entries[1].path, PathBuf::from("/abs/b.bin"));
        assert_eq!(entries[1].label(), "b.bin (update)");
        assert_eq!(entries[1].to_request().expected_size, None);
    }

    #[test]
    fn rejects_duplicate_destinations() {
        let text = r#"[
            {"url": "https://example.com/1", "path": "x.bin"},
            {"url": "https://example.com/2", "path": "x.bin"}
        ]"#;
        let err = parse_list(text, Path::new("/d")).unwrap_err();
        assert!(err.to_string().contains("duplicate destination"));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_list("{\"url\": 1}", Path::new(".")).is_err());
    }

    #[test]
    fn load_list_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("list.json");
        std::fs::write(&list, r#"[{"url": "http://h/f", "path": "f"}]"#).unwrap();
        let entries = load_list(&list).unwrap();
        assert_eq!(entries[0].path, dir.path().join("f"));
    }
}
