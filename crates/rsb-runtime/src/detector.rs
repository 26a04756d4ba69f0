//! Change detection: the scheduled loop that discovers modified RMS rows
//! and drives the product pipeline.
//!
//! Each tick: take the distributed lock, read the watermark, pull modified
//! ids, fetch rows, run the pipeline, advance the watermark when the run
//! was successful enough, release the lock. A tick that cannot take the
//! lock is skipped — another process is already running.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rsb_clock::Clock as _;
use rsb_lock::DistributedLock;
use rsb_rms::{FetchFilter, RmsRepository as _};
use rsb_schemas::{ErrorKind, RunSummary, SyncResult};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::SyncContext;
use crate::metrics;
use crate::pipeline::{ProductSyncPipeline, RunOptions};
use crate::{FULL_SYNC_LOCK_TTL, LOCK_CHANGE_DETECT, LOCK_FULL_SYNC};

/// Observable loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Idle,
    Running,
    Cooldown,
}

/// What one tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// Another holder owns the lock.
    SkippedLocked,
    /// Nothing modified since the watermark.
    NoChanges,
    Ran(RunSummary),
}

pub struct ChangeDetector {
    ctx: Arc<SyncContext>,
    pipeline: ProductSyncPipeline,
    state: StdMutex<DetectorState>,
}

impl ChangeDetector {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self {
            pipeline: ProductSyncPipeline::new(Arc::clone(&ctx)),
            ctx,
            state: StdMutex::new(DetectorState::Idle),
        }
    }

    pub fn state(&self) -> DetectorState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, next: DetectorState) {
        *self.state.lock().unwrap() = next;
    }

    /// One incremental tick.
    pub async fn tick(&self) -> SyncResult<TickOutcome> {
        let ctx = &self.ctx;
        self.set_state(DetectorState::Idle);
        let lock = self.lock(LOCK_CHANGE_DETECT, ctx.settings.lock.ttl);

        match lock.acquire().await {
            Ok(()) => {}
            Err(err) if err.kind == ErrorKind::LockHeld => {
                info!(lock = LOCK_CHANGE_DETECT, "tick skipped, lock held elsewhere");
                metrics::record_lock_skip("change-detect");
                return Ok(TickOutcome::SkippedLocked);
            }
            Err(err) => return Err(err),
        }

        self.set_state(DetectorState::Running);
        let outcome = self.run_incremental(&lock).await;
        if let Err(err) = lock.release().await {
            warn!(error = %err, "lock release failed");
        }
        // Cooldown until the next tick flips it back.
        self.set_state(DetectorState::Cooldown);
        outcome
    }

    async fn run_incremental(
        &self,
        lock: &DistributedLock<Arc<dyn rsb_lock::LockStore>>,
    ) -> SyncResult<TickOutcome> {
        let ctx = &self.ctx;
        let now = ctx.clock.now_utc();

        let since = if ctx.settings.checkpoint.use_update_checkpoint {
            ctx.update_checkpoint.read_watermark(now)
        } else {
            now - ChronoDuration::days(ctx.settings.checkpoint.default_days)
        };

        let ids = ctx
            .rms
            .modified_items(since, ctx.settings.sync.batch_cap)
            .await?;
        if ids.is_empty() {
            info!(since = %since, "no modified items");
            metrics::record_no_changes();
            return Ok(TickOutcome::NoChanges);
        }
        info!(since = %since, count = ids.len(), "modified items detected");

        let rows = ctx
            .rms
            .fetch_item_rows(
                &ids,
                &FetchFilter {
                    include_zero_stock: true,
                    ..FetchFilter::default()
                },
            )
            .await?;

        let sync_id = Uuid::new_v4();
        let mut opts = RunOptions::incremental(sync_id);
        let mut resumed_from = None;
        if let Some(progress) = ctx.progress.load_resumable(now) {
            resumed_from = Some(progress.sync_id);
            opts.resume_after = Some(progress.last_processed_ccod);
        }

        let summary = self.guarded_run(lock, rows, opts).await;

        self.finish_run(&summary, sync_id);
        // The record that drove the resume is spent once this run completes.
        if !summary.cancelled {
            if let Some(old_sync_id) = resumed_from {
                if let Err(err) = ctx.progress.delete(old_sync_id) {
                    warn!(error = %err, "consumed progress record delete failed");
                }
            }
        }
        Ok(TickOutcome::Ran(summary))
    }

    /// Nightly full sync: pages through the whole catalog since epoch with
    /// force-create semantics, under its own lock.
    pub async fn full_sync(&self) -> SyncResult<Option<RunSummary>> {
        let ctx = &self.ctx;
        let lock = self.lock(LOCK_FULL_SYNC, FULL_SYNC_LOCK_TTL);

        match lock.acquire().await {
            Ok(()) => {}
            Err(err) if err.kind == ErrorKind::LockHeld => {
                metrics::record_lock_skip("full-sync");
                return Ok(None);
            }
            Err(err) => return Err(err),
        }

        let result = self.full_sync_locked(&lock).await;
        if let Err(err) = lock.release().await {
            warn!(error = %err, "full-sync lock release failed");
        }
        result.map(Some)
    }

    async fn full_sync_locked(
        &self,
        lock: &DistributedLock<Arc<dyn rsb_lock::LockStore>>,
    ) -> SyncResult<RunSummary> {
        let ctx = &self.ctx;
        let sync_id = Uuid::new_v4();
        let mut cursor: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;
        let mut combined: Option<RunSummary> = None;

        loop {
            let ids = ctx
                .rms
                .modified_items(cursor, ctx.settings.sync.batch_cap)
                .await?;
            if ids.is_empty() {
                break;
            }
            let rows = ctx
                .rms
                .fetch_item_rows(
                    &ids,
                    &FetchFilter {
                        include_zero_stock: true,
                        ..FetchFilter::default()
                    },
                )
                .await?;
            let next_cursor = rows.iter().map(|r| r.last_updated).max();

            let summary = self
                .guarded_run(lock, rows, RunOptions::full(sync_id))
                .await;
            let cancelled = summary.cancelled;

            combined = Some(match combined.take() {
                None => summary,
                Some(mut acc) => {
                    acc.stats.merge(&summary.stats);
                    acc.finished_at = summary.finished_at;
                    acc.duration_ms += summary.duration_ms;
                    acc.success_rate = acc.stats.success_ratio();
                    acc.max_last_updated = acc.max_last_updated.max(summary.max_last_updated);
                    acc.cancelled = cancelled;
                    for sample in summary.error_samples {
                        acc.push_error_sample(sample);
                    }
                    acc
                }
            });

            if cancelled {
                break;
            }
            match next_cursor {
                // Strictly-greater paging; identical timestamps in one page
                // were all fetched together.
                Some(next) if next > cursor => cursor = next,
                _ => break,
            }
        }

        let summary = combined.unwrap_or_else(|| self.empty_summary(sync_id));
        self.finish_run(&summary, sync_id);
        Ok(summary)
    }

    /// Run the pipeline with the run timeout, the lock keeper, and shutdown
    /// all able to cancel it.
    async fn guarded_run(
        &self,
        lock: &DistributedLock<Arc<dyn rsb_lock::LockStore>>,
        rows: Vec<rsb_schemas::ItemRow>,
        opts: RunOptions,
    ) -> RunSummary {
        let ctx = &self.ctx;
        let cancel = ctx.run_token();
        let keeper_done = CancellationToken::new();

        // Lost lock => abort the run; three failed refreshes cancel `cancel`.
        let keeper = {
            let done = keeper_done.clone();
            let abort = cancel.clone();
            let lock = lock.clone();
            tokio::spawn(async move { lock.keep_alive(done, abort).await })
        };

        // Run timeout => cooperative cancellation, not a hard abort.
        let timeout_guard = {
            let cancel = cancel.clone();
            let run_timeout = ctx.settings.sync.run_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(run_timeout).await;
                warn!("run timeout exceeded, cancelling");
                cancel.cancel();
            })
        };

        let summary = self.pipeline.run(rows, opts, cancel.clone()).await;

        timeout_guard.abort();
        keeper_done.cancel();
        let _ = keeper.await;
        summary
    }

    fn finish_run(&self, summary: &RunSummary, sync_id: Uuid) {
        let ctx = &self.ctx;
        let now = ctx.clock.now_utc();

        if ctx.settings.checkpoint.use_update_checkpoint && !summary.cancelled {
            if let Some(max_seen) = summary.max_last_updated {
                match ctx
                    .update_checkpoint
                    .advance(max_seen, summary.success_rate, now)
                {
                    Ok(true) => {}
                    Ok(false) => {
                        info!(success_rate = summary.success_rate, "watermark unchanged");
                    }
                    Err(err) => warn!(error = %err, "watermark write failed"),
                }
            }
        }

        if !summary.cancelled {
            if let Err(err) = ctx.progress.delete(sync_id) {
                warn!(error = %err, "progress delete failed");
            }
        }

        if let Err(err) = ctx.history.append(summary) {
            warn!(error = %err, "run history append failed");
        }
    }

    fn empty_summary(&self, sync_id: Uuid) -> RunSummary {
        let now = self.ctx.clock.now_utc();
        RunSummary {
            sync_id,
            started_at: now,
            finished_at: now,
            stats: rsb_schemas::SyncStats::default(),
            success_rate: 1.0,
            duration_ms: 0,
            max_last_updated: None,
            error_samples: Vec::new(),
            cancelled: false,
        }
    }

    fn lock(
        &self,
        name: &str,
        ttl: std::time::Duration,
    ) -> DistributedLock<Arc<dyn rsb_lock::LockStore>> {
        let store: Arc<dyn rsb_lock::LockStore> = if self.ctx.settings.lock.enabled {
            Arc::clone(&self.ctx.lock_store)
        } else {
            Arc::new(rsb_lock::NullLockStore)
        };
        DistributedLock::new(store, name, ttl)
    }
}

