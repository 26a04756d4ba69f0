//! Durable sync cursors on the local filesystem.
//!
//! Layout under the configured checkpoint directory:
//! ```text
//! checkpoint.json          — the update high-watermark (single record)
//! progress/{sync_id}.json  — per-run resumable cursor
//! runs.jsonl               — append-only run summary history
//! ```
//!
//! All writes are temp-file + atomic rename; a crash mid-write leaves the
//! previous record intact. Each store is single-writer.

pub mod history;
pub mod progress;
pub mod update;

pub use history::RunHistoryStore;
pub use progress::ProgressCheckpointStore;
pub use update::UpdateCheckpointStore;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Write `bytes` to `path` atomically via a sibling temp file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("checkpoint path has no parent: {}", path.display()))?;
    fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);

    fs::write(tmp, bytes).with_context(|| format!("write temp {}", tmp.display()))?;
    fs::rename(tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}
