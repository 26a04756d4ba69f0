//! Scenario: ingesting the same commerce order twice persists it once.
//!
//! # Invariant under test
//! The order name is the idempotency key: the first ingestion inserts one
//! RMS order with `referenceNumber = name`, the second returns `Duplicate`
//! and writes nothing.

use chrono::Duration;
use rsb_clock::Clock as _;
use rsb_schemas::{CommerceAddress, CommerceLineItem, CommerceOrder, IngestOutcome, MoneySet};
use rsb_testkit::{item_row, TestHarness};
use rust_decimal_macros::dec;

fn money(amount: rust_decimal::Decimal) -> MoneySet {
    MoneySet {
        amount,
        currency: "CRC".into(),
    }
}

fn seeded_order(h: &TestHarness) -> CommerceOrder {
    let now = h.clock.now_utc();
    CommerceOrder {
        id: "gid://commerce/Order/1001".into(),
        name: "#1001".into(),
        created_at: now - Duration::hours(2),
        financial_status: "paid".into(),
        email: Some("ana@example.com".into()),
        customer_first_name: "Ana".into(),
        customer_last_name: "Mora".into(),
        total_price: money(dec!(20.00)),
        total_tax: money(dec!(2.60)),
        shipping_address: Some(CommerceAddress {
            name: "Ana Mora".into(),
            address1: "Calle 5".into(),
            city: "San José".into(),
            country: "Costa Rica".into(),
            ..Default::default()
        }),
        line_items: vec![CommerceLineItem {
            title: "Tee".into(),
            sku: "A1".into(),
            quantity: 2,
            original_unit_price: money(dec!(10.00)),
            discounted_unit_price: money(dec!(10.00)),
        }],
    }
}

#[tokio::test]
async fn second_ingestion_is_duplicate() {
    let now = TestHarness::default_now();
    let h = TestHarness::at(now);
    h.rms
        .seed_items(vec![item_row(1, "A1", "A", now - Duration::hours(1))]);
    h.commerce.seed_order(seeded_order(&h));

    let pipeline = h.order_pipeline();

    let first = pipeline.ingest("#1001").await.unwrap();
    let order_id = match first {
        IngestOutcome::Persisted { order_id } => order_id,
        other => panic!("expected Persisted, got {other:?}"),
    };

    let orders = h.rms.orders();
    assert_eq!(orders.len(), 1);
    let stored = &orders[0];
    assert_eq!(stored.order_id, order_id);
    assert_eq!(stored.header.reference_number, "#1001");
    assert_eq!(stored.header.store_id, 7);
    assert_eq!(stored.header.channel_type, 2);
    assert_eq!(stored.header.order_type, 1);
    assert_eq!(stored.header.comment, "Shopify Order #1001 - paid");
    assert_eq!(stored.lines.len(), 1);
    assert_eq!(stored.lines[0].item_id, 1);
    assert_eq!(stored.lines[0].quantity, 2);

    // Same order again: Duplicate, and no new row.
    let second = pipeline.ingest("#1001").await.unwrap();
    assert_eq!(second, IngestOutcome::Duplicate);
    assert_eq!(h.rms.orders().len(), 1);
}

#[tokio::test]
async fn unpaid_order_is_rejected() {
    let now = TestHarness::default_now();
    let h = TestHarness::at(now);
    h.rms
        .seed_items(vec![item_row(1, "A1", "A", now - Duration::hours(1))]);
    let mut order = seeded_order(&h);
    order.financial_status = "refunded".into();
    h.commerce.seed_order(order);

    let outcome = h.order_pipeline().ingest("#1001").await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Rejected { .. }));
    assert!(h.rms.orders().is_empty());
}
