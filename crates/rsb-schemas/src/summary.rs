//! Per-run counters and the structured run summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Why a product was skipped without an upsert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Zero variants after grouping.
    Empty,
    /// Product does not exist remotely, force-create is off, and no variant
    /// has positive stock.
    ZeroStock,
    /// Product exists remotely and no observable field differs.
    Unchanged,
}

/// Terminal classification of one product within a run.
///
/// `Success` requires prepare/upsert/variants to have completed and at least
/// one of inventory or metafields to have succeeded; `Partial` means the core
/// upsert landed but a trailing step (inventory, metafields, discount,
/// collections) failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductOutcome {
    Created,
    Updated,
    Skipped(SkipReason),
    Partial,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
    pub inventory_updated: u64,
    pub inventory_failed: u64,
}

impl SyncStats {
    pub fn record(&mut self, outcome: &ProductOutcome) {
        self.processed += 1;
        match outcome {
            ProductOutcome::Created => self.created += 1,
            ProductOutcome::Updated | ProductOutcome::Partial => self.updated += 1,
            ProductOutcome::Skipped(_) => self.skipped += 1,
            ProductOutcome::Error => self.errors += 1,
            ProductOutcome::Cancelled => {}
        }
    }

    /// Fraction of processed products that did not error.
    /// An empty run counts as fully successful.
    pub fn success_ratio(&self) -> f64 {
        if self.processed == 0 {
            return 1.0;
        }
        let ok = self.processed.saturating_sub(self.errors);
        ok as f64 / self.processed as f64
    }

    pub fn merge(&mut self, other: &SyncStats) {
        self.processed += other.processed;
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.inventory_updated += other.inventory_updated;
        self.inventory_failed += other.inventory_failed;
    }
}

/// A captured failure, at most [`RunSummary::MAX_ERROR_SAMPLES`] per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSample {
    /// CCOD or order reference the failure belongs to.
    pub subject: String,
    pub code: String,
    pub message: String,
}

impl ErrorSample {
    pub fn from_error(subject: impl Into<String>, err: &SyncError) -> Self {
        Self {
            subject: subject.into(),
            code: err.code.clone(),
            message: err.message.clone(),
        }
    }
}

/// What every run yields, logged and appended to the run history file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub sync_id: uuid::Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub stats: SyncStats,
    pub success_rate: f64,
    pub duration_ms: u64,
    /// Greatest `last_updated` across processed rows; the watermark candidate.
    pub max_last_updated: Option<DateTime<Utc>>,
    pub error_samples: Vec<ErrorSample>,
    pub cancelled: bool,
}

impl RunSummary {
    pub const MAX_ERROR_SAMPLES: usize = 10;

    pub fn push_error_sample(&mut self, sample: ErrorSample) {
        if self.error_samples.len() < Self::MAX_ERROR_SAMPLES {
            self.error_samples.push(sample);
        }
    }
}
