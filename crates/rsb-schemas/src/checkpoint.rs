//! Persisted checkpoint records.
//!
//! Two cursors with different lifetimes:
//! - [`UpdateCheckpoint`]: the durable high-watermark of the last successful
//!   run, advanced only when the run's success ratio clears the threshold.
//! - [`ProgressCheckpoint`]: a per-run resumable cursor, rewritten every N
//!   products and deleted on clean completion.
//!
//! Serialized field names match the on-disk JSON contract exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::summary::SyncStats;

/// Bumped when the on-disk shape changes.
pub const UPDATE_CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCheckpoint {
    /// Maximum `last_updated` observed during the run — NOT the wall clock,
    /// so rows modified while the run was in flight are re-detected.
    pub last_run_timestamp: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u32,
}

impl UpdateCheckpoint {
    pub fn new(last_run_timestamp: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        Self {
            last_run_timestamp,
            updated_at,
            version: UPDATE_CHECKPOINT_VERSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressCheckpoint {
    pub sync_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Products with CCOD lexically <= this are skipped on resume.
    pub last_processed_ccod: String,
    pub processed_count: u64,
    pub total_count: u64,
    pub batch_number: u64,
    pub stats: SyncStats,
}
