//! Remote commerce shapes as the engine sees them.
//!
//! These are deliberately looser than the wire schema: deserialization
//! ignores unknown fields so additive upstream schema changes do not break
//! the client, and every field the engine does not act on stays out.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_primary: bool,
}

/// A product as it exists remotely, fetched by handle before an upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteProduct {
    pub id: String,
    pub handle: String,
    pub title: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub product_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub variants: Vec<RemoteVariant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteVariant {
    pub id: String,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub option1: String,
    #[serde(default)]
    pub option2: String,
    pub price: Decimal,
    pub compare_at_price: Option<Decimal>,
    /// Needed to activate tracking and set on-hand quantities.
    pub inventory_item_id: String,
}

impl RemoteProduct {
    /// Find a remote variant by its `(option1, option2)` pair.
    pub fn variant_by_options(&self, option1: &str, option2: &str) -> Option<&RemoteVariant> {
        self.variants
            .iter()
            .find(|v| v.option1 == option1 && v.option2 == option2)
    }
}

/// `{amount, currency}` pair pattern used across commerce money fields.
/// Only the shop-currency amount matters to RMS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoneySet {
    pub amount: Decimal,
    #[serde(default)]
    pub currency: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommerceAddress {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address1: String,
    #[serde(default)]
    pub address2: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub province: String,
    #[serde(default)]
    pub zip: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommerceLineItem {
    pub title: String,
    #[serde(default)]
    pub sku: String,
    pub quantity: i32,
    /// Unit price before commerce-side discounts.
    pub original_unit_price: MoneySet,
    /// Unit price actually charged.
    pub discounted_unit_price: MoneySet,
}

/// A paid commerce order fetched for ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommerceOrder {
    pub id: String,
    /// Human-facing order name (`"#1001"`); the RMS idempotency key.
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub financial_status: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub customer_first_name: String,
    #[serde(default)]
    pub customer_last_name: String,
    pub total_price: MoneySet,
    pub total_tax: MoneySet,
    #[serde(default)]
    pub shipping_address: Option<CommerceAddress>,
    pub line_items: Vec<CommerceLineItem>,
}

impl CommerceOrder {
    /// Financial statuses accepted for ingestion.
    pub fn is_paid_enough(&self) -> bool {
        matches!(
            self.financial_status.as_str(),
            "paid" | "partially_paid" | "authorized"
        )
    }
}
