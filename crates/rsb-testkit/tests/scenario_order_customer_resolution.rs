//! Scenario: the guest-order customer matrix.
//!
//! # Invariant under test
//! Email present: an existing customer is reused by case-insensitive email,
//! otherwise one is created from the order names. Email absent: rejected
//! when required, mapped to the configured default id when set, NULL when
//! guest orders are allowed.

use chrono::Duration;
use rsb_schemas::{CommerceLineItem, CommerceOrder, CustomerDraft, IngestOutcome, MoneySet, RejectReason};
use rsb_testkit::{item_row, TestHarness};
use rust_decimal_macros::dec;

fn money(amount: rust_decimal::Decimal) -> MoneySet {
    MoneySet {
        amount,
        currency: "CRC".into(),
    }
}

fn order(name: &str, email: Option<&str>) -> CommerceOrder {
    CommerceOrder {
        id: format!("gid://commerce/Order/{}", name.trim_start_matches('#')),
        name: name.into(),
        created_at: TestHarness::default_now() - Duration::hours(1),
        financial_status: "paid".into(),
        email: email.map(str::to_string),
        customer_first_name: "Ana".into(),
        customer_last_name: "Mora".into(),
        total_price: money(dec!(10.00)),
        total_tax: money(dec!(1.30)),
        shipping_address: None,
        line_items: vec![CommerceLineItem {
            title: "Tee".into(),
            sku: "A1".into(),
            quantity: 1,
            original_unit_price: money(dec!(10.00)),
            discounted_unit_price: money(dec!(10.00)),
        }],
    }
}

fn seed_item(h: &TestHarness) {
    let now = TestHarness::default_now();
    h.rms
        .seed_items(vec![item_row(1, "A1", "A", now - Duration::hours(1))]);
}

#[tokio::test]
async fn existing_customer_is_reused_by_email() {
    let h = TestHarness::at(TestHarness::default_now());
    seed_item(&h);
    h.rms.seed_customer(
        501,
        CustomerDraft {
            first_name: "Ana".into(),
            last_name: "Mora".into(),
            email: Some("ANA@example.com".into()),
            phone: None,
        },
    );
    h.commerce.seed_order(order("#3001", Some("ana@example.com")));

    let outcome = h.order_pipeline().ingest("#3001").await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Persisted { .. }));
    assert_eq!(h.rms.orders()[0].header.customer_id, Some(501));
    assert_eq!(h.rms.customers_created(), 1, "no new customer created");
}

#[tokio::test]
async fn unknown_email_creates_a_customer() {
    let h = TestHarness::at(TestHarness::default_now());
    seed_item(&h);
    h.commerce.seed_order(order("#3002", Some("nueva@example.com")));

    let outcome = h.order_pipeline().ingest("#3002").await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Persisted { .. }));
    let customer_id = h.rms.orders()[0].header.customer_id;
    assert!(customer_id.is_some());
    assert_eq!(h.rms.customers_created(), 1);
}

#[tokio::test]
async fn missing_email_rejected_when_required() {
    let h = TestHarness::at_with(
        TestHarness::default_now(),
        &[("REQUIRE_CUSTOMER_EMAIL", "true")],
    );
    seed_item(&h);
    h.commerce.seed_order(order("#3003", None));

    let outcome = h.order_pipeline().ingest("#3003").await.unwrap();
    assert_eq!(
        outcome,
        IngestOutcome::Rejected {
            reason: RejectReason::MissingEmail
        }
    );
    assert!(h.rms.orders().is_empty());
}

#[tokio::test]
async fn missing_email_uses_configured_default_customer() {
    let h = TestHarness::at_with(
        TestHarness::default_now(),
        &[("DEFAULT_CUSTOMER_ID_FOR_GUEST_ORDERS", "900")],
    );
    seed_item(&h);
    h.commerce.seed_order(order("#3004", None));

    let outcome = h.order_pipeline().ingest("#3004").await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Persisted { .. }));
    assert_eq!(h.rms.orders()[0].header.customer_id, Some(900));
}

#[tokio::test]
async fn missing_email_allowed_as_null_customer() {
    let h = TestHarness::at(TestHarness::default_now());
    seed_item(&h);
    h.commerce.seed_order(order("#3005", None));

    let outcome = h.order_pipeline().ingest("#3005").await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Persisted { .. }));
    assert_eq!(h.rms.orders()[0].header.customer_id, None);
}
