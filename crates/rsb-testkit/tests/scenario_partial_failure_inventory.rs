//! Scenario: inventory failures degrade the product, never the run.
//!
//! # Invariant under test
//! When the product and variant upserts land but every `SetInventoryOnHand`
//! is throttled, the product counts as updated-with-partial, the failure is
//! visible in `inventory_failed`, and the watermark still advances because
//! the run's success ratio clears the threshold.

use chrono::Duration;
use rsb_runtime::TickOutcome;
use rsb_testkit::{item_row, TestHarness};

#[tokio::test]
async fn throttled_inventory_yields_partial_and_watermark_advances() {
    let now = TestHarness::default_now();
    let h = TestHarness::at(now);
    let last_updated = now - Duration::hours(1);
    h.rms.seed_items(vec![item_row(1, "A1", "A", last_updated)]);

    // Every inventory write is refused with a 429.
    h.commerce
        .fail_inventory_times
        .store(u32::MAX, std::sync::atomic::Ordering::SeqCst);

    let outcome = h.detector.tick().await.unwrap();
    let summary = match outcome {
        TickOutcome::Ran(s) => s,
        other => panic!("expected a run, got {other:?}"),
    };

    assert_eq!(summary.stats.processed, 1);
    assert_eq!(summary.stats.updated, 1, "partial counts as updated");
    assert_eq!(summary.stats.errors, 0);
    assert_eq!(summary.stats.inventory_failed, 1);
    assert_eq!(summary.stats.inventory_updated, 0);
    assert!(!summary.error_samples.is_empty());
    assert_eq!(summary.error_samples[0].code, "http_429");

    // Product and variants still landed.
    let product = h.commerce.product("tee-a").unwrap();
    assert_eq!(product.variants.len(), 1);

    // Success ratio is 1.0 (partial is not an error): watermark advances
    // to the row's lastUpdated.
    let checkpoint = h.ctx.update_checkpoint.read().unwrap().expect("written");
    assert_eq!(checkpoint.last_run_timestamp, last_updated);
}

#[tokio::test]
async fn both_inventory_and_metafields_failing_is_an_error() {
    let now = TestHarness::default_now();
    let h = TestHarness::at(now);
    h.rms
        .seed_items(vec![item_row(1, "A1", "A", now - Duration::hours(1))]);

    h.commerce
        .fail_inventory_times
        .store(u32::MAX, std::sync::atomic::Ordering::SeqCst);
    h.commerce
        .fail_metafields_times
        .store(u32::MAX, std::sync::atomic::Ordering::SeqCst);

    let outcome = h.detector.tick().await.unwrap();
    let summary = match outcome {
        TickOutcome::Ran(s) => s,
        other => panic!("expected a run, got {other:?}"),
    };

    assert_eq!(summary.stats.processed, 1);
    assert_eq!(summary.stats.errors, 1);

    // Ratio 0.0 < threshold: watermark must not be written.
    assert!(h.ctx.update_checkpoint.read().unwrap().is_none());
}
