//! The deferral spool (`spec.md §4.5` deferral policy, `§6.1` file format).
//!
//! One spool directory is shared across Storages by filename convention
//! (`<storageName>-<fetchStartTime>-<id>.deferred`, `spec.md §5` shared-
//! resource policy); each `DeferralSpool` only ever touches files matching
//! its own storage name prefix.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::error;
use serde::{Deserialize, Serialize};
use statcollector_types::ParsedData;

const SPOOL_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SpoolFile {
    version: u32,
    record: ParsedData,
}

#[derive(Debug, thiserror::Error)]
pub enum DeferralError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt spool file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub struct DeferralSpool {
    storage_name: String,
    dir: PathBuf,
    #[cfg_attr(not(unix), allow(dead_code))]
    file_mode: u32,
}

impl DeferralSpool {
    pub fn new(storage_name: impl Into<String>, dir: impl Into<PathBuf>, file_mode: u32) -> Self {
        Self {
            storage_name: storage_name.into(),
            dir: dir.into(),
            file_mode,
        }
    }

    fn file_name(&self, record: &ParsedData) -> String {
        let epoch = record
            .fetch_start_time
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        format!(
            "{}-{}-{}.deferred",
            self.storage_name,
            epoch.as_millis(),
            record.id
        )
    }

    /// Serializes `record` (with `defer_count` already incremented by the
    /// caller) to a new spool file, per `spec.md §6.1`.
    pub fn write(&self, record: &ParsedData) -> Result<PathBuf, DeferralError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(self.file_name(record));
        let payload = SpoolFile {
            version: SPOOL_FORMAT_VERSION,
            record: record.clone(),
        };
        let json = serde_json::to_vec_pretty(&payload).map_err(DeferralError::Corrupt)?;
        std::fs::write(&path, json)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(self.file_mode))?;
        }
        Ok(path)
    }

    /// Globs this storage's files in the spool directory, sorted for
    /// deterministic rescans.
    pub fn list(&self) -> Vec<PathBuf> {
        let pattern = self.dir.join(format!("{}-*.deferred", self.storage_name));
        let mut paths: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
            .into_iter()
            .flatten()
            .filter_map(Result::ok)
            .collect();
        paths.sort();
        paths
    }

    /// Reads and deserializes a spool file. A corrupt file is deleted and
    /// the error returned — fail closed, per `spec.md §6.1`/§7.7.
    pub fn read(&self, path: &Path) -> Result<ParsedData, DeferralError> {
        let read = std::fs::read(path).map_err(DeferralError::Io).and_then(|bytes| {
            serde_json::from_slice::<SpoolFile>(&bytes).map_err(DeferralError::Corrupt)
        });
        match read {
            Ok(payload) => Ok(payload.record),
            Err(err) => {
                error!("deferral spool file {} is corrupt, deleting: {err}", path.display());
                let _ = std::fs::remove_file(path);
                Err(err)
            }
        }
    }

    pub fn delete(&self, path: &Path) {
        let _ = std::fs::remove_file(path);
    }
}

/// Derives a record's defer file's embedded fetch timestamp back to a
/// `SystemTime`, exposed for tests asserting on filename shape.
pub fn epoch_millis(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use statcollector_types::RawData;
    use tempfile::tempdir;

    fn sample_record() -> ParsedData {
        RawData::new("dummy", "u", None, None, SystemTime::now(), SystemTime::now(), vec![])
            .into_parsed(vec![("k".into(), statcollector_types::Scalar::Number(1.0))])
    }

    #[test]
    fn write_then_read_round_trips_except_defer_count_is_caller_managed() {
        let dir = tempdir().unwrap();
        let spool = DeferralSpool::new("mystore", dir.path(), 0o600);
        let mut record = sample_record();
        record.defer_count += 1;
        let path = spool.write(&record).unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("mystore-"));
        let read_back = spool.read(&path).unwrap();
        assert_eq!(read_back.id, record.id);
        assert_eq!(read_back.defer_count, record.defer_count);
        assert_eq!(read_back.body, record.body);
    }

    #[test]
    fn list_only_matches_this_storages_prefix() {
        let dir = tempdir().unwrap();
        let spool_a = DeferralSpool::new("storeA", dir.path(), 0o600);
        let spool_b = DeferralSpool::new("storeB", dir.path(), 0o600);
        spool_a.write(&sample_record()).unwrap();
        spool_b.write(&sample_record()).unwrap();
        assert_eq!(spool_a.list().len(), 1);
        assert_eq!(spool_b.list().len(), 1);
    }

    #[test]
    fn corrupt_file_is_deleted_on_read() {
        let dir = tempdir().unwrap();
        let spool = DeferralSpool::new("mystore", dir.path(), 0o600);
        let path = dir.path().join("mystore-1-xyz.deferred");
        std::fs::write(&path, b"not json").unwrap();
        assert!(spool.read(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn list_is_sorted_deterministically() {
        let dir = tempdir().unwrap();
        let spool = DeferralSpool::new("mystore", dir.path(), 0o600);
        for _ in 0..5 {
            spool.write(&sample_record()).unwrap();
        }
        let first = spool.list();
        let second = spool.list();
        assert_eq!(first, second);
    }
}
