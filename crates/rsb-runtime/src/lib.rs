//! Run orchestration: change detection, the product sync pipeline, order
//! ingestion and the job scheduler.
//!
//! Everything here is wired through an explicit [`SyncContext`] built once
//! at startup — no process-wide mutable state. Collaborators (RMS,
//! commerce, lock store, clock) enter as trait objects so the testkit can
//! run whole pipelines in memory.

pub mod context;
pub mod detector;
pub mod metrics;
pub mod orders;
pub mod pipeline;
pub mod scheduler;

pub use context::SyncContext;
pub use detector::{ChangeDetector, DetectorState, TickOutcome};
pub use orders::OrderIngestPipeline;
pub use pipeline::{ProductSyncPipeline, RunOptions};
pub use scheduler::Scheduler;

/// Lock names: one per mutually exclusive job family.
pub const LOCK_CHANGE_DETECT: &str = "sync/change-detect";
pub const LOCK_FULL_SYNC: &str = "sync/full";

/// Full-sync lock TTL (2h); change-detect uses the configured TTL.
pub const FULL_SYNC_LOCK_TTL: std::time::Duration = std::time::Duration::from_secs(7200);
