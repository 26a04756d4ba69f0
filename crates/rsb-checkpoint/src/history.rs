//! Append-only run summary history (`runs.jsonl`), one JSON object per line.
//!
//! Operator forensics only; the engine never reads it back except to trim.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rsb_schemas::RunSummary;

/// Maintenance keeps at most this many lines.
pub const MAX_HISTORY_LINES: usize = 1000;

pub struct RunHistoryStore {
    path: PathBuf,
}

impl RunHistoryStore {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            path: base_dir.join("runs.jsonl"),
        }
    }

    pub fn append(&self, summary: &RunSummary) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
        }
        let mut line = serde_json::to_string(summary).context("serialize run summary")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", self.path.display()))?;
        Ok(())
    }

    /// Keep only the newest [`MAX_HISTORY_LINES`] lines. Returns how many
    /// lines were dropped.
    pub fn trim(&self) -> Result<usize> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).with_context(|| format!("read {}", self.path.display())),
        };
        let lines: Vec<&str> = content.lines().collect();
        if lines.len() <= MAX_HISTORY_LINES {
            return Ok(0);
        }
        let dropped = lines.len() - MAX_HISTORY_LINES;
        let mut kept = lines[dropped..].join("\n");
        kept.push('\n');
        crate::write_atomic(&self.path, kept.as_bytes())?;
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rsb_schemas::SyncStats;
    use uuid::Uuid;

    fn summary() -> RunSummary {
        RunSummary {
            sync_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            stats: SyncStats::default(),
            success_rate: 1.0,
            duration_ms: 5,
            max_last_updated: None,
            error_samples: vec![],
            cancelled: false,
        }
    }

    #[test]
    fn append_accumulates_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunHistoryStore::new(dir.path());
        store.append(&summary()).unwrap();
        store.append(&summary()).unwrap();
        let content = fs::read_to_string(dir.path().join("runs.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 2);
        // Every line parses on its own.
        for line in content.lines() {
            let _: RunSummary = serde_json::from_str(line).unwrap();
        }
    }

    #[test]
    fn trim_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunHistoryStore::new(dir.path());
        for _ in 0..(MAX_HISTORY_LINES + 5) {
            store.append(&summary()).unwrap();
        }
        let dropped = store.trim().unwrap();
        assert_eq!(dropped, 5);
        let content = fs::read_to_string(dir.path().join("runs.jsonl")).unwrap();
        assert_eq!(content.lines().count(), MAX_HISTORY_LINES);
    }

    #[test]
    fn trim_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunHistoryStore::new(dir.path());
        assert_eq!(store.trim().unwrap(), 0);
    }
}
