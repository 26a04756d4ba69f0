//! Scenario: the watermark equals the max row timestamp and drives
//! incremental coverage.
//!
//! # Invariant under test
//! After a successful run over rows stamped T1 < T2, the watermark is
//! exactly T2 (not the wall clock). A later edit stamping a row T3 > T2 is
//! picked up; rows at or below T2 are not re-processed. The watermark never
//! decreases.

use chrono::Duration;
use rsb_runtime::TickOutcome;
use rsb_testkit::{item_row, TestHarness};

#[tokio::test]
async fn watermark_is_max_last_updated_and_drives_increments() {
    let now = TestHarness::default_now();
    let h = TestHarness::at(now);

    let t1 = now - Duration::hours(5);
    let t2 = now - Duration::hours(2);
    h.rms.seed_items(vec![
        item_row(7, "S7", "C700", t1),
        item_row(8, "S8", "C800", t2),
    ]);

    // First run covers both rows; watermark lands on T2.
    let summary = match h.detector.tick().await.unwrap() {
        TickOutcome::Ran(s) => s,
        other => panic!("expected a run, got {other:?}"),
    };
    assert_eq!(summary.stats.processed, 2);
    let checkpoint = h.ctx.update_checkpoint.read().unwrap().unwrap();
    assert_eq!(checkpoint.last_run_timestamp, t2);

    // Row 7 changes again, stamped T3 > T2.
    let t3 = now - Duration::minutes(30);
    let mut row7 = item_row(7, "S7", "C700", t3);
    row7.quantity = 9;
    h.rms.upsert_item(row7);

    // Only row 7 is re-processed.
    let summary = match h.detector.tick().await.unwrap() {
        TickOutcome::Ran(s) => s,
        other => panic!("expected a run, got {other:?}"),
    };
    assert_eq!(summary.stats.processed, 1);
    assert_eq!(h.commerce.on_hand_for_sku("tee-c700", "S7"), Some(9));

    let checkpoint = h.ctx.update_checkpoint.read().unwrap().unwrap();
    assert_eq!(checkpoint.last_run_timestamp, t3);
}

#[tokio::test]
async fn failed_run_leaves_watermark_untouched() {
    let now = TestHarness::default_now();
    let h = TestHarness::at(now);
    let t_old = now - Duration::hours(6);
    h.rms.seed_items(vec![item_row(1, "A1", "A", t_old)]);

    // Establish a watermark with a clean run.
    h.detector.tick().await.unwrap();
    let before = h.ctx.update_checkpoint.read().unwrap().unwrap();
    assert_eq!(before.last_run_timestamp, t_old);

    // New change (a price edit, so the full upsert path runs), but the run
    // will fail completely.
    let t_new = now - Duration::hours(1);
    let mut row = item_row(1, "A1", "A", t_new);
    row.price = rust_decimal_macros::dec!(12.00);
    h.rms.upsert_item(row);
    h.commerce
        .fail_inventory_times
        .store(u32::MAX, std::sync::atomic::Ordering::SeqCst);
    h.commerce
        .fail_metafields_times
        .store(u32::MAX, std::sync::atomic::Ordering::SeqCst);

    h.detector.tick().await.unwrap();

    let after = h.ctx.update_checkpoint.read().unwrap().unwrap();
    assert_eq!(
        after.last_run_timestamp, t_old,
        "watermark must not advance on a failed run"
    );
}
