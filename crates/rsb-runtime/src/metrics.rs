//! Counters, gauges and histograms for sync throughput and health.
//!
//! Thin wrappers over the `metrics` facade so metric names live in one
//! place. With no recorder installed (tests) every call is a no-op.

use rsb_schemas::{IngestOutcome, ProductOutcome, RunSummary, SkipReason};

pub fn record_run(summary: &RunSummary) {
    metrics::counter!("sync_runs_total").increment(1);
    metrics::counter!("sync_products_processed_total").increment(summary.stats.processed);
    metrics::counter!("sync_products_created_total").increment(summary.stats.created);
    metrics::counter!("sync_products_updated_total").increment(summary.stats.updated);
    metrics::counter!("sync_products_errors_total").increment(summary.stats.errors);
    metrics::counter!("sync_inventory_updated_total").increment(summary.stats.inventory_updated);
    metrics::counter!("sync_inventory_failed_total").increment(summary.stats.inventory_failed);
    metrics::gauge!("sync_last_success_ratio").set(summary.success_rate);
    metrics::histogram!("sync_run_duration_seconds").record(summary.duration_ms as f64 / 1000.0);
}

pub fn record_product(outcome: &ProductOutcome) {
    let label = match outcome {
        ProductOutcome::Created => "created",
        ProductOutcome::Updated => "updated",
        ProductOutcome::Partial => "partial",
        ProductOutcome::Error => "error",
        ProductOutcome::Cancelled => "cancelled",
        ProductOutcome::Skipped(SkipReason::Empty) => "skipped_empty",
        ProductOutcome::Skipped(SkipReason::ZeroStock) => "skipped_zero_stock",
        ProductOutcome::Skipped(SkipReason::Unchanged) => "skipped_unchanged",
    };
    metrics::counter!("sync_product_outcomes_total", "outcome" => label).increment(1);
}

pub fn record_lock_skip(lock: &'static str) {
    metrics::counter!("sync_lock_skips_total", "lock" => lock).increment(1);
}

pub fn record_no_changes() {
    metrics::counter!("sync_no_changes_total").increment(1);
}

pub fn record_order(outcome: &IngestOutcome) {
    metrics::counter!(
        "orders_ingested_total",
        "status" => outcome.status_str(),
    )
    .increment(1);
}
