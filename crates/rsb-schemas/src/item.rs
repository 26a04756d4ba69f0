//! RMS-side entities: the `View_Items` read model and the `Order` /
//! `OrderEntry` write model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// RMS order type for a plain sale.
pub const ORDER_TYPE_SALE: i32 = 1;
/// RMS channel marker for orders ingested from the commerce platform.
pub const ORDER_CHANNEL_ONLINE: i32 = 2;

/// One row of the `View_Items` projection: item master + inventory + pricing.
///
/// The engine only ever reads these; RMS remains the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRow {
    pub item_id: i64,
    pub sku: String,
    /// Model-plus-color code; the grouping key for one commerce product.
    pub ccod: String,
    pub description: String,
    pub familia: String,
    pub categoria: String,
    pub extended_category: String,
    pub genero: String,
    pub color: String,
    pub talla: String,
    pub price: Decimal,
    pub sale_price: Option<Decimal>,
    pub sale_start: Option<DateTime<Utc>>,
    pub sale_end: Option<DateTime<Utc>>,
    pub quantity: i32,
    pub stock_a: i32,
    pub stock_b: i32,
    pub tax: Decimal,
    pub barcode: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl ItemRow {
    /// Row-level invariants from the read model: non-empty sku/description,
    /// positive price.
    pub fn is_well_formed(&self) -> bool {
        !self.sku.trim().is_empty()
            && !self.description.trim().is_empty()
            && self.price > Decimal::ZERO
    }

    /// Whether the row carries an applicable sale at `now`:
    /// `sale_price < price` and `sale_start <= now < sale_end`.
    pub fn sale_active_at(&self, now: DateTime<Utc>) -> bool {
        let Some(sale_price) = self.sale_price else {
            return false;
        };
        if sale_price >= self.price || sale_price <= Decimal::ZERO {
            return false;
        }
        match (self.sale_start, self.sale_end) {
            (Some(start), Some(end)) => start <= now && now < end,
            _ => false,
        }
    }
}

/// Write model for the RMS `Order` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderHeader {
    pub store_id: i32,
    /// Always [`ORDER_TYPE_SALE`] for ingested orders.
    pub order_type: i32,
    pub time: DateTime<Utc>,
    pub customer_id: Option<i64>,
    pub total: Decimal,
    pub tax: Decimal,
    pub comment: String,
    pub shipping_notes: String,
    /// Always [`ORDER_CHANNEL_ONLINE`] for ingested orders; together with
    /// `reference_number` it forms the idempotency key.
    pub channel_type: i32,
    pub reference_number: String,
}

/// Write model for one RMS `OrderEntry` line. `order_id` is assigned by the
/// insert transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub item_id: i64,
    pub description: String,
    /// Unit price actually charged (after commerce-side discounts).
    pub price: Decimal,
    /// Undiscounted unit price.
    pub full_price: Decimal,
    pub quantity: i32,
}

/// Minimal customer payload for `CreateCustomer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerDraft {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn row() -> ItemRow {
        ItemRow {
            item_id: 1,
            sku: "A1".into(),
            ccod: "A".into(),
            description: "Tee".into(),
            familia: "Ropa".into(),
            categoria: "Blusas".into(),
            extended_category: String::new(),
            genero: "Mujer".into(),
            color: "Red".into(),
            talla: "M".into(),
            price: dec!(10.00),
            sale_price: None,
            sale_start: None,
            sale_end: None,
            quantity: 5,
            stock_a: 3,
            stock_b: 2,
            tax: dec!(0.13),
            barcode: None,
            last_updated: Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn well_formed_requires_sku_description_price() {
        assert!(row().is_well_formed());

        let mut r = row();
        r.sku = "  ".into();
        assert!(!r.is_well_formed());

        let mut r = row();
        r.description = String::new();
        assert!(!r.is_well_formed());

        let mut r = row();
        r.price = Decimal::ZERO;
        assert!(!r.is_well_formed());
    }

    #[test]
    fn sale_active_inside_window_only() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 0).unwrap();

        let mut r = row();
        r.price = dec!(100.00);
        r.sale_price = Some(dec!(80.00));
        r.sale_start = Some(start);
        r.sale_end = Some(end);

        let inside = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2024, 12, 31, 12, 0, 0).unwrap();
        let after = end;

        assert!(r.sale_active_at(inside));
        assert!(!r.sale_active_at(before));
        // End bound is exclusive.
        assert!(!r.sale_active_at(after));
    }

    #[test]
    fn sale_requires_discounted_price() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap();

        let mut r = row();
        r.price = dec!(100.00);
        r.sale_price = Some(dec!(100.00));
        r.sale_start = Some(start);
        r.sale_end = Some(end);
        assert!(!r.sale_active_at(now), "equal price is not a sale");

        r.sale_price = Some(dec!(120.00));
        assert!(!r.sale_active_at(now), "markup is not a sale");
    }
}
