//! The explicit service context threaded through every pipeline.

use std::sync::Arc;

use rsb_catalog::TaxonomyResolver;
use rsb_checkpoint::{ProgressCheckpointStore, RunHistoryStore, UpdateCheckpointStore};
use rsb_clock::Clock;
use rsb_commerce::CommerceClient;
use rsb_config::Settings;
use rsb_lock::LockStore;
use rsb_rms::RmsRepository;
use tokio_util::sync::CancellationToken;

/// Everything a run needs, constructed once at startup and torn down at
/// shutdown. Cross-cutting services are explicit fields, never globals.
pub struct SyncContext {
    pub settings: Settings,
    pub clock: Arc<dyn Clock>,
    pub rms: Arc<dyn RmsRepository>,
    pub commerce: Arc<dyn CommerceClient>,
    pub lock_store: Arc<dyn LockStore>,
    pub taxonomy: Arc<TaxonomyResolver>,
    pub update_checkpoint: Arc<UpdateCheckpointStore>,
    pub progress: Arc<ProgressCheckpointStore>,
    pub history: Arc<RunHistoryStore>,
    /// Process-level shutdown; cancelling it drains every loop.
    pub shutdown: CancellationToken,
}

impl SyncContext {
    /// Child token for one run: cancelled by shutdown, a lost lock, or the
    /// run timeout — whichever comes first.
    pub fn run_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}
