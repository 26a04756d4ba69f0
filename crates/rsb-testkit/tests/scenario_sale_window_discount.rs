//! Scenario: sale detection and the automatic discount.
//!
//! # Invariant under test
//! Inside the sale window the variant is written with `price=salePrice` and
//! `compareAtPrice=listPrice`, and one automatic discount is created for the
//! product (percent = max variant discount, bounded by the window). Outside
//! the window there is no compareAt and no discount. Re-running updates the
//! existing discount in place instead of creating a second one.

use chrono::{Duration, TimeZone, Utc};
use rsb_runtime::TickOutcome;
use rsb_testkit::{item_row, TestHarness};
use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;

fn sale_row(now: chrono::DateTime<Utc>) -> rsb_schemas::ItemRow {
    let mut row = item_row(1, "A1", "A", now - Duration::hours(1));
    row.price = dec!(100.00);
    row.sale_price = Some(dec!(80.00));
    row.sale_start = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    row.sale_end = Some(Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 0).unwrap());
    row
}

#[tokio::test]
async fn inside_window_discounts_variant_and_creates_rule() {
    // Jan 15 is inside the Jan 1–31 window.
    let now = TestHarness::default_now();
    let h = TestHarness::at(now);
    h.rms.seed_items(vec![sale_row(now)]);

    let outcome = h.detector.tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Ran(_)));

    let product = h.commerce.product("tee-a").unwrap();
    let variant = &product.variants[0];
    assert_eq!(variant.price, dec!(80.00));
    assert_eq!(variant.compare_at_price, Some(dec!(100.00)));

    let spec = h
        .commerce
        .discount_for("rms-sale-tee-a")
        .expect("discount created");
    assert_eq!(spec.percent, dec!(0.20));
    assert_eq!(
        spec.starts_at,
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    );
    assert_eq!(
        spec.ends_at,
        Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 0).unwrap()
    );
    assert_eq!(h.commerce.discounts_created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn outside_window_no_discount_no_compare_at() {
    // March 1 is past the window.
    let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    let h = TestHarness::at(now);
    h.rms.seed_items(vec![sale_row(now)]);

    h.detector.tick().await.unwrap();

    let product = h.commerce.product("tee-a").unwrap();
    let variant = &product.variants[0];
    assert_eq!(variant.price, dec!(100.00));
    assert!(variant.compare_at_price.is_none());
    assert_eq!(h.commerce.discount_count(), 0);
}

#[tokio::test]
async fn rerun_updates_discount_in_place() {
    let now = TestHarness::default_now();
    let h = TestHarness::at(now);
    h.rms.seed_items(vec![sale_row(now)]);
    h.detector.tick().await.unwrap();
    assert_eq!(h.commerce.discounts_created.load(Ordering::SeqCst), 1);

    // Deepen the sale; full sync rewrites regardless of the watermark.
    let mut row = sale_row(now);
    row.sale_price = Some(dec!(70.00));
    row.last_updated = now - Duration::minutes(30);
    h.rms.upsert_item(row);

    h.detector.full_sync().await.unwrap().expect("ran");

    assert_eq!(h.commerce.discounts_created.load(Ordering::SeqCst), 1);
    assert!(h.commerce.discounts_updated.load(Ordering::SeqCst) >= 1);
    let spec = h.commerce.discount_for("rms-sale-tee-a").unwrap();
    assert_eq!(spec.percent, dec!(0.30));
}

#[tokio::test]
async fn sub_five_percent_sale_gets_no_discount_rule() {
    let now = TestHarness::default_now();
    let h = TestHarness::at(now);
    let mut row = sale_row(now);
    row.sale_price = Some(dec!(98.00));
    h.rms.seed_items(vec![row]);

    h.detector.tick().await.unwrap();

    // Variant pricing still reflects the sale...
    let product = h.commerce.product("tee-a").unwrap();
    assert_eq!(product.variants[0].price, dec!(98.00));
    // ...but 2% is below the discount-eligibility floor.
    assert_eq!(h.commerce.discount_count(), 0);
}
