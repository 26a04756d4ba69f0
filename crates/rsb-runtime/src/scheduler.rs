//! Job scheduling: the change-detect interval, the nightly full sync, and
//! daily maintenance.
//!
//! Three independent loops, all drained by the shutdown token:
//! - `change-detect` ticks every `SYNC_INTERVAL_MINUTES`; overlapping ticks
//!   are skipped (the interval skips missed ticks and the distributed lock
//!   rejects a second runner).
//! - `full-sync` fires at the configured HH:MM in the configured IANA
//!   timezone, optionally masked to weekdays.
//! - `maintenance` trims progress checkpoints and the run history once a
//!   day, off-peak.

use std::sync::Arc;

use rsb_clock::Clock as _;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::context::SyncContext;
use crate::detector::ChangeDetector;

/// Maintenance fires daily at this local time (off-peak for a retail shop).
const MAINTENANCE_HOUR: u32 = 4;
const MAINTENANCE_MINUTE: u32 = 40;

pub struct Scheduler {
    ctx: Arc<SyncContext>,
    detector: Arc<ChangeDetector>,
}

impl Scheduler {
    pub fn new(ctx: Arc<SyncContext>, detector: Arc<ChangeDetector>) -> Self {
        Self { ctx, detector }
    }

    /// Run all jobs until shutdown.
    pub async fn run(&self) {
        tokio::join!(
            self.change_detect_loop(),
            self.full_sync_loop(),
            self.maintenance_loop(),
        );
        info!("scheduler drained");
    }

    async fn change_detect_loop(&self) {
        let mut interval = tokio::time::interval(self.ctx.settings.sync.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => return,
                _ = interval.tick() => {}
            }
            match self.detector.tick().await {
                Ok(outcome) => {
                    info!(?outcome, "change-detect tick complete");
                }
                Err(err) => {
                    error!(error = %err, kind = err.kind.as_str(), "change-detect tick failed");
                }
            }
        }
    }

    async fn full_sync_loop(&self) {
        let schedule = &self.ctx.settings.schedule;
        if !schedule.full_sync_enabled {
            self.ctx.shutdown.cancelled().await;
            return;
        }

        loop {
            let now = self.ctx.clock.now_utc();
            let next = rsb_clock::next_scheduled_fire(
                now,
                schedule.full_sync_hour,
                schedule.full_sync_minute,
                schedule.full_sync_timezone,
                schedule.full_sync_days.as_deref(),
            );
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next = %next, "full sync scheduled");

            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            match self.detector.full_sync().await {
                Ok(Some(summary)) => {
                    info!(
                        processed = summary.stats.processed,
                        errors = summary.stats.errors,
                        "full sync complete"
                    );
                }
                Ok(None) => {
                    info!("full sync skipped, lock held elsewhere");
                }
                Err(err) => {
                    error!(error = %err, "full sync failed");
                }
            }
        }
    }

    async fn maintenance_loop(&self) {
        let tz = self.ctx.settings.schedule.full_sync_timezone;
        loop {
            let now = self.ctx.clock.now_utc();
            let next =
                rsb_clock::next_scheduled_fire(now, MAINTENANCE_HOUR, MAINTENANCE_MINUTE, tz, None);
            let wait = (next - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            let now = self.ctx.clock.now_utc();
            match self.ctx.progress.gc(now) {
                Ok(removed) if removed > 0 => {
                    info!(removed, "maintenance: expired progress checkpoints removed");
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "maintenance: progress gc failed"),
            }
            match self.ctx.history.trim() {
                Ok(dropped) if dropped > 0 => {
                    info!(dropped, "maintenance: run history trimmed");
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "maintenance: history trim failed"),
            }
        }
    }
}
