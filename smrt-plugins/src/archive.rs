//! JSON file dedup archive
//!
//! Remembers indicator fingerprints between runs. Records created since
//! `begin` are staged in memory and written on `commit`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use smrt_core::{Indicator, SmrtError, ARCHIVE_RETENTION_DAYS};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::Archive;

/// One remembered indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub fingerprint: String,
    pub indicator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ArchiveRecord {
    fn from_indicator(indicator: &Indicator) -> Self {
        Self {
            fingerprint: indicator.fingerprint(),
            indicator: indicator.indicator.clone(),
            provider: indicator.provider.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Archive backed by a single JSON file
#[derive(Debug)]
pub struct JsonArchive {
    path: PathBuf,
    retention_days: i64,
    records: BTreeMap<String, ArchiveRecord>,
    staged: BTreeMap<String, ArchiveRecord>,
    loaded: bool,
}

impl JsonArchive {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            retention_days: ARCHIVE_RETENTION_DAYS,
            records: BTreeMap::new(),
            staged: BTreeMap::new(),
            loaded: false,
        }
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Committed plus staged records
    pub fn len(&self) -> usize {
        self.records.len() + self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(&mut self) -> Result<(), SmrtError> {
        self.records.clear();

        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => {}
            Ok(raw) => {
                let records: Vec<ArchiveRecord> = serde_json::from_str(&raw).map_err(|e| {
                    SmrtError::Archive(format!("corrupt archive {}: {e}", self.path.display()))
                })?;
                self.records = records
                    .into_iter()
                    .map(|r| (r.fingerprint.clone(), r))
                    .collect();
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.loaded = true;
        debug!("Loaded {} archive records from {}", self.records.len(), self.path.display());
        Ok(())
    }

    fn ensure_loaded(&mut self) -> Result<(), SmrtError> {
        if self.loaded {
            Ok(())
        } else {
            self.load()
        }
    }

    fn persist(&self) -> Result<(), SmrtError> {
        let records: Vec<&ArchiveRecord> = self.records.values().collect();
        let raw = serde_json::to_string(&records)?;
        write_atomic(&self.path, &raw)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), SmrtError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let tmp = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl Archive for JsonArchive {
    fn begin(&mut self) -> Result<(), SmrtError> {
        self.staged.clear();
        self.load()
    }

    fn commit(&mut self) -> Result<(), SmrtError> {
        self.ensure_loaded()?;
        if self.staged.is_empty() {
            return Ok(());
        }

        let staged = std::mem::take(&mut self.staged);
        let count = staged.len();
        self.records.extend(staged);
        self.persist()?;
        debug!("Committed {} archive records", count);
        Ok(())
    }

    fn search(&self, indicator: &Indicator) -> Result<bool, SmrtError> {
        let fingerprint = indicator.fingerprint();
        Ok(self.records.contains_key(&fingerprint) || self.staged.contains_key(&fingerprint))
    }

    fn create(&mut self, indicator: &Indicator) -> Result<bool, SmrtError> {
        let record = ArchiveRecord::from_indicator(indicator);
        if self.records.contains_key(&record.fingerprint) || self.staged.contains_key(&record.fingerprint) {
            return Ok(false);
        }
        self.staged.insert(record.fingerprint.clone(), record);
        Ok(true)
    }

    fn cleanup(&mut self) -> Result<usize, SmrtError> {
        self.ensure_loaded()?;

        let cutoff = Utc::now() - Duration::days(self.retention_days);
        let before = self.records.len();
        self.records.retain(|_, r| r.created_at >= cutoff);
        let removed = before - self.records.len();

        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indicator(value: &str) -> Indicator {
        let mut i = Indicator::new(value).with_provider("example.org");
        i.normalize();
        i
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = JsonArchive::new(dir.path().join("none.json"));
        archive.begin().unwrap();
        assert!(archive.is_empty());
        assert!(!archive.search(&indicator("192.0.2.1")).unwrap());
    }

    #[test]
    fn test_commit_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("smrt.db.json");

        let mut archive = JsonArchive::new(&path);
        archive.begin().unwrap();
        assert!(archive.create(&indicator("192.0.2.1")).unwrap());
        assert!(!archive.create(&indicator("192.0.2.1")).unwrap());
        assert!(archive.search(&indicator("192.0.2.1")).unwrap());
        archive.commit().unwrap();

        let mut reopened = JsonArchive::new(&path);
        reopened.begin().unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.search(&indicator("192.0.2.1")).unwrap());
        assert!(!reopened.search(&indicator("192.0.2.2")).unwrap());
    }

    #[test]
    fn test_uncommitted_records_are_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smrt.db.json");

        let mut archive = JsonArchive::new(&path);
        archive.begin().unwrap();
        archive.create(&indicator("192.0.2.1")).unwrap();

        let mut other = JsonArchive::new(&path);
        other.begin().unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn test_cleanup_prunes_expired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smrt.db.json");

        let old = ArchiveRecord {
            fingerprint: "old".to_string(),
            indicator: "192.0.2.9".to_string(),
            provider: None,
            created_at: Utc::now() - Duration::days(400),
        };
        let fresh = ArchiveRecord::from_indicator(&indicator("192.0.2.1"));
        fs::write(&path, serde_json::to_string(&vec![old, fresh]).unwrap()).unwrap();

        let mut archive = JsonArchive::new(&path);
        assert_eq!(archive.cleanup().unwrap(), 1);
        assert_eq!(archive.cleanup().unwrap(), 0);

        let mut reopened = JsonArchive::new(&path).with_retention_days(1);
        reopened.begin().unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smrt.db.json");
        fs::write(&path, "{oops").unwrap();

        let err = JsonArchive::new(&path).begin().unwrap_err();
        assert!(matches!(err, SmrtError::Archive(_)));
    }
}
