//! Retention for the archive and quarantine trees
//!
//! Both trees are keyed by dated folders: `archive/YYYYMMDD/...` and
//! `quarantine/YYYYMMDD-HHMMSS-xxxxxx/...` (the run id). Pruning removes dated
//! top-level folders older than the retention window and leaves anything
//! else alone.

use crate::domain::context::ResultExt;
use crate::domain::Result;
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

/// Folders removed by a prune
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
    pub kept: usize,
}

/// Date a folder name starts with, if it is `YYYYMMDD` or `YYYYMMDD-...`
pub fn folder_date(name: &str) -> Option<NaiveDate> {
    let day = name.get(..8)?;
    match name.as_bytes().get(8) {
        None | Some(b'-') => {}
        Some(_) => return None,
    }
    if !day.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(day, "%Y%m%d").ok()
}

/// Deletes dated folders under `root` older than `retention_days`
///
/// A retention of 0 keeps everything. A missing root is not an error.
pub fn prune_expired(root: &Path, retention_days: u32, today: NaiveDate) -> Result<PruneReport> {
    let mut report = PruneReport::default();
    if retention_days == 0 || !root.exists() {
        return Ok(report);
    }

    let cutoff = today - chrono::Duration::days(i64::from(retention_days));

    let entries = fs::read_dir(root).with_context(|| format!("Failed to read {}", root.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read {}", root.display()))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        match folder_date(&name) {
            Some(date) if date < cutoff => {
                fs::remove_dir_all(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                tracing::info!(path = %path.display(), "Pruned expired folder");
                report.removed.push(path);
            }
            _ => report.kept += 1,
        }
    }

    report.removed.sort();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    #[test_case("20250314", Some((2025, 3, 14)) ; "day folder")]
    #[test_case("20250314-101500-abcdef", Some((2025, 3, 14)) ; "run id")]
    #[test_case("20251399", None ; "invalid date")]
    #[test_case("202503140", None ; "nine digits")]
    #[test_case("latest", None ; "not dated")]
    #[test_case("2025", None ; "short")]
    fn test_folder_date(name: &str, expected: Option<(i32, u32, u32)>) {
        assert_eq!(
            folder_date(name),
            expected.map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
        );
    }

    #[test]
    fn test_prune_removes_only_old_dated_folders() {
        let dir = TempDir::new().unwrap();
        for name in ["20250101", "20250301-080000-aaaaaa", "20250310", "manual"] {
            fs::create_dir_all(dir.path().join(name).join("1")).unwrap();
        }
        fs::write(dir.path().join("20240101"), b"file, not folder").unwrap();

        let today = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let report = prune_expired(dir.path(), 7, today).unwrap();

        assert_eq!(
            report.removed,
            vec![
                dir.path().join("20250101"),
                dir.path().join("20250301-080000-aaaaaa")
            ]
        );
        assert_eq!(report.kept, 2);
        assert!(dir.path().join("20250310").exists());
        assert!(dir.path().join("manual").exists());
        assert!(dir.path().join("20240101").exists());
    }

    #[test]
    fn test_zero_retention_keeps_everything() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("20000101")).unwrap();

        let today = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let report = prune_expired(dir.path(), 0, today).unwrap();

        assert!(report.removed.is_empty());
        assert!(dir.path().join("20000101").exists());
    }

    #[test]
    fn test_missing_root_is_ok() {
        let dir = TempDir::new().unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert!(prune_expired(&dir.path().join("nope"), 30, today).is_ok());
    }
}
