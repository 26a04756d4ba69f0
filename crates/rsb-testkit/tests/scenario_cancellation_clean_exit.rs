//! Scenario: cooperative cancellation stops the run cleanly.
//!
//! # Invariant under test
//! With the shutdown token already cancelled, the pipeline marks every
//! product cancelled instead of touching the remote side, the summary says
//! so, and the watermark is left untouched.

use chrono::Duration;
use rsb_runtime::TickOutcome;
use rsb_testkit::{item_row, TestHarness};
use std::sync::atomic::Ordering;

#[tokio::test]
async fn cancelled_run_touches_nothing_and_keeps_watermark() {
    let now = TestHarness::default_now();
    let h = TestHarness::at(now);
    h.rms.seed_items(vec![
        item_row(1, "S1", "A100", now - Duration::hours(1)),
        item_row(2, "S2", "B200", now - Duration::hours(1)),
    ]);

    h.ctx.shutdown.cancel();

    let summary = match h.detector.tick().await.unwrap() {
        TickOutcome::Ran(s) => s,
        other => panic!("expected a run, got {other:?}"),
    };

    assert!(summary.cancelled);
    assert_eq!(summary.stats.created, 0);
    assert_eq!(summary.stats.errors, 0, "cancellation is not a failure");
    assert_eq!(h.commerce.products_created.load(Ordering::SeqCst), 0);

    // No watermark write for a cancelled run.
    assert!(h.ctx.update_checkpoint.read().unwrap().is_none());
}
