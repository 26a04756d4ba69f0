//! Per-run resumable cursor.
//!
//! The pipeline writes a progress record every N processed products; a run
//! that crashes mid-batch resumes by skipping every CCOD lexically at or
//! below `last_processed_ccod` of the newest surviving record. Records are
//! deleted on clean completion and garbage-collected after 7 days.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rsb_schemas::ProgressCheckpoint;
use tracing::{debug, warn};
use uuid::Uuid;

pub const GC_AGE_DAYS: i64 = 7;

pub struct ProgressCheckpointStore {
    dir: PathBuf,
}

impl ProgressCheckpointStore {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            dir: base_dir.join("progress"),
        }
    }

    fn path_for(&self, sync_id: Uuid) -> PathBuf {
        self.dir.join(format!("{sync_id}.json"))
    }

    pub fn save(&self, cp: &ProgressCheckpoint) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(cp).context("serialize progress checkpoint")?;
        crate::write_atomic(&self.path_for(cp.sync_id), &bytes)?;
        debug!(sync_id = %cp.sync_id, ccod = %cp.last_processed_ccod, "progress checkpoint saved");
        Ok(())
    }

    /// Delete the record for a cleanly finished run. Missing file is fine.
    pub fn delete(&self, sync_id: Uuid) -> Result<()> {
        match fs::remove_file(self.path_for(sync_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("delete progress {sync_id}")),
        }
    }

    /// The newest non-expired record left behind by an earlier run, if any.
    /// Unreadable records are skipped with a warning, never fatal.
    pub fn load_resumable(&self, now: DateTime<Utc>) -> Option<ProgressCheckpoint> {
        let mut newest: Option<ProgressCheckpoint> = None;
        for cp in self.read_all() {
            if now - cp.timestamp > Duration::days(GC_AGE_DAYS) {
                continue;
            }
            match &newest {
                Some(best) if best.timestamp >= cp.timestamp => {}
                _ => newest = Some(cp),
            }
        }
        newest
    }

    /// Remove records older than [`GC_AGE_DAYS`]. Returns how many were
    /// deleted.
    pub fn gc(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for cp in self.read_all() {
            if now - cp.timestamp > Duration::days(GC_AGE_DAYS) {
                self.delete(cp.sync_id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn read_all(&self) -> Vec<ProgressCheckpoint> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).ok().and_then(|b| serde_json::from_slice(&b).ok()) {
                Some(cp) => out.push(cp),
                None => {
                    warn!(path = %path.display(), "skipping unreadable progress checkpoint");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rsb_schemas::SyncStats;

    fn cp(sync_id: Uuid, ccod: &str, ts: DateTime<Utc>) -> ProgressCheckpoint {
        ProgressCheckpoint {
            sync_id,
            timestamp: ts,
            last_processed_ccod: ccod.into(),
            processed_count: 10,
            total_count: 100,
            batch_number: 1,
            stats: SyncStats::default(),
        }
    }

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn save_load_delete_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressCheckpointStore::new(dir.path());
        let id = Uuid::new_v4();

        store.save(&cp(id, "B100", ts(10))).unwrap();
        let loaded = store.load_resumable(ts(11)).unwrap();
        assert_eq!(loaded.last_processed_ccod, "B100");

        store.delete(id).unwrap();
        assert!(store.load_resumable(ts(11)).is_none());
    }

    #[test]
    fn newest_record_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressCheckpointStore::new(dir.path());
        store.save(&cp(Uuid::new_v4(), "A100", ts(9))).unwrap();
        store.save(&cp(Uuid::new_v4(), "C300", ts(10))).unwrap();
        assert_eq!(store.load_resumable(ts(11)).unwrap().last_processed_ccod, "C300");
    }

    #[test]
    fn expired_records_are_not_resumable_and_gc_removes_them() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressCheckpointStore::new(dir.path());
        store.save(&cp(Uuid::new_v4(), "A100", ts(1))).unwrap();
        store.save(&cp(Uuid::new_v4(), "B200", ts(20))).unwrap();

        // Day 28: the day-1 record is past the 7-day window.
        assert_eq!(store.load_resumable(ts(28)).unwrap().last_processed_ccod, "B200");
        assert_eq!(store.gc(ts(28)).unwrap(), 1);
    }

    #[test]
    fn delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressCheckpointStore::new(dir.path());
        store.delete(Uuid::new_v4()).unwrap();
    }

    #[test]
    fn rewriting_same_sync_id_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressCheckpointStore::new(dir.path());
        let id = Uuid::new_v4();
        store.save(&cp(id, "A100", ts(10))).unwrap();
        store.save(&cp(id, "A200", ts(10))).unwrap();
        assert_eq!(store.load_resumable(ts(11)).unwrap().last_processed_ccod, "A200");
    }
}
