//! The update high-watermark: last RMS `lastUpdated` covered by a
//! successful run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rsb_schemas::UpdateCheckpoint;
use tracing::{info, warn};

pub struct UpdateCheckpointStore {
    path: PathBuf,
    /// Watermark advances only when the run's success ratio reaches this.
    success_threshold: f64,
    /// Fallback window when no checkpoint exists: `now − default_days`.
    default_days: i64,
}

impl UpdateCheckpointStore {
    pub fn new(dir: &Path, success_threshold: f64, default_days: i64) -> Self {
        Self {
            path: dir.join("checkpoint.json"),
            success_threshold,
            default_days,
        }
    }

    /// The `since` bound for change detection. Absent or unreadable
    /// checkpoints fall back to `now − default_days` (unreadable ones are
    /// logged; re-syncing a window is safe, losing changes is not).
    pub fn read_watermark(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.read() {
            Ok(Some(cp)) => cp.last_run_timestamp,
            Ok(None) => now - Duration::days(self.default_days),
            Err(err) => {
                warn!(error = %err, path = %self.path.display(), "unreadable update checkpoint, using default window");
                now - Duration::days(self.default_days)
            }
        }
    }

    pub fn read(&self) -> Result<Option<UpdateCheckpoint>> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", self.path.display()));
            }
        };
        let cp = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse {}", self.path.display()))?;
        Ok(Some(cp))
    }

    /// Advance the watermark to `candidate` if the run was successful enough.
    ///
    /// Returns `true` when written. The watermark never moves backwards,
    /// even if a caller offers an older candidate.
    pub fn advance(
        &self,
        candidate: DateTime<Utc>,
        success_ratio: f64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if success_ratio < self.success_threshold {
            info!(
                success_ratio,
                threshold = self.success_threshold,
                "watermark not advanced: success ratio below threshold"
            );
            return Ok(false);
        }

        if let Some(existing) = self.read()? {
            if candidate <= existing.last_run_timestamp {
                return Ok(false);
            }
        }

        let cp = UpdateCheckpoint::new(candidate, now);
        let bytes = serde_json::to_vec_pretty(&cp).context("serialize update checkpoint")?;
        crate::write_atomic(&self.path, &bytes)?;
        info!(watermark = %candidate, "update checkpoint advanced");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).unwrap()
    }

    fn store(dir: &Path) -> UpdateCheckpointStore {
        UpdateCheckpointStore::new(dir, 0.95, 30)
    }

    #[test]
    fn absent_checkpoint_defaults_to_thirty_days_back() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let now = ts(30, 12);
        assert_eq!(s.read_watermark(now), now - Duration::days(30));
    }

    #[test]
    fn advance_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(s.advance(ts(10, 0), 1.0, ts(10, 1)).unwrap());
        assert_eq!(s.read_watermark(ts(30, 0)), ts(10, 0));
    }

    #[test]
    fn below_threshold_leaves_watermark_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(s.advance(ts(10, 0), 1.0, ts(10, 1)).unwrap());
        assert!(!s.advance(ts(12, 0), 0.5, ts(12, 1)).unwrap());
        assert_eq!(s.read_watermark(ts(30, 0)), ts(10, 0));
    }

    #[test]
    fn watermark_never_decreases() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(s.advance(ts(10, 0), 1.0, ts(10, 1)).unwrap());
        assert!(!s.advance(ts(9, 0), 1.0, ts(12, 1)).unwrap());
        assert_eq!(s.read_watermark(ts(30, 0)), ts(10, 0));
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(s.advance(ts(10, 0), 0.95, ts(10, 1)).unwrap());
    }

    #[test]
    fn corrupt_checkpoint_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(dir.path().join("checkpoint.json"), b"{not json").unwrap();
        let now = ts(30, 12);
        assert_eq!(s.read_watermark(now), now - Duration::days(30));
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.advance(ts(10, 0), 1.0, ts(10, 1)).unwrap();
        assert!(!dir.path().join("checkpoint.json.tmp").exists());
        assert!(dir.path().join("checkpoint.json").exists());
    }
}
