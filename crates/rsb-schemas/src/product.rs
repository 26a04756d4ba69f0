//! The in-memory product aggregate built per batch from RMS item rows.
//!
//! A `Product` lives only for the duration of one pipeline pass: the variant
//! grouper builds it, the sync pipeline upserts it, then it is discarded.
//! Nothing here touches the network.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Commerce listing status.
///
/// Invariant: `Active` iff the summed variant inventory is positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductStatus {
    Active,
    Draft,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "ACTIVE",
            ProductStatus::Draft => "DRAFT",
        }
    }

    /// Derive status from total stock (invariant 3b).
    pub fn from_total_stock(total: i64) -> Self {
        if total > 0 {
            ProductStatus::Active
        } else {
            ProductStatus::Draft
        }
    }
}

/// One commerce variant, derived from a single RMS item row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub sku: String,
    pub item_id: i64,
    /// Color.
    pub option1: String,
    /// Canonical (normalized) size.
    pub option2: String,
    /// Source size string when normalization changed it; drives the
    /// `rms.talla_original` metafield.
    pub size_original: Option<String>,
    /// Price to write: the sale price while a sale window is active,
    /// the list price otherwise.
    pub price: Decimal,
    /// List price while a sale is active; always greater than `price`
    /// when present.
    pub compare_at_price: Option<Decimal>,
    pub quantity: i32,
    pub barcode: Option<String>,
    /// `(list - sale) / list`, set while a sale window is active.
    pub discount_percent: Option<Decimal>,
    /// Sale window bounds, set together with `discount_percent`.
    pub sale_starts_at: Option<DateTime<Utc>>,
    pub sale_ends_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl Variant {
    /// The `(option1, option2)` pair that must be unique within a product.
    pub fn option_key(&self) -> (String, String) {
        (self.option1.clone(), self.option2.clone())
    }
}

/// Time-bounded automatic percentage discount for one product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountSpec {
    /// Maximum variant discount, rounded to 2 decimals.
    pub percent: Decimal,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Deterministic idempotency key derived from the product handle.
    pub external_ref: String,
}

/// Metafield value types actually written by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetafieldType {
    Text,
    Integer,
    Json,
    DateTime,
}

impl MetafieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetafieldType::Text => "single_line_text_field",
            MetafieldType::Integer => "number_integer",
            MetafieldType::Json => "json",
            MetafieldType::DateTime => "date_time",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metafield {
    pub namespace: String,
    pub key: String,
    pub value: String,
    pub value_type: MetafieldType,
}

impl Metafield {
    pub fn text(namespace: &str, key: &str, value: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            value: value.into(),
            value_type: MetafieldType::Text,
        }
    }

    pub fn integer(namespace: &str, key: &str, value: i64) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            value: value.to_string(),
            value_type: MetafieldType::Integer,
        }
    }

    pub fn json(namespace: &str, key: &str, value: &Value) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            value: value.to_string(),
            value_type: MetafieldType::Json,
        }
    }

    pub fn datetime(namespace: &str, key: &str, value: DateTime<Utc>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            value: value.to_rfc3339(),
            value_type: MetafieldType::DateTime,
        }
    }
}

/// Broad product family used to pick the attribute schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductKind {
    Footwear,
    Apparel,
    Accessory,
}

/// Typed attribute envelope with a raw bag for forward compatibility.
///
/// RMS rows carry open-ended fields; the typed variants cover what the
/// pipeline acts on, and everything else rides along in `raw` untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeBag {
    Footwear {
        shoe_size: Option<String>,
        #[serde(default)]
        raw: Map<String, Value>,
    },
    Apparel {
        size_label: Option<String>,
        #[serde(default)]
        raw: Map<String, Value>,
    },
    Accessory {
        #[serde(default)]
        raw: Map<String, Value>,
    },
}

impl AttributeBag {
    pub fn kind(&self) -> ProductKind {
        match self {
            AttributeBag::Footwear { .. } => ProductKind::Footwear,
            AttributeBag::Apparel { .. } => ProductKind::Apparel,
            AttributeBag::Accessory { .. } => ProductKind::Accessory,
        }
    }

    pub fn raw(&self) -> &Map<String, Value> {
        match self {
            AttributeBag::Footwear { raw, .. }
            | AttributeBag::Apparel { raw, .. }
            | AttributeBag::Accessory { raw } => raw,
        }
    }

    /// String field from the raw bag, if present and non-empty.
    pub fn raw_str(&self, key: &str) -> Option<&str> {
        self.raw()
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// The typed size carried by the envelope, when the kind has one.
    pub fn lead_size(&self) -> Option<&str> {
        match self {
            AttributeBag::Footwear { shoe_size, .. } => shoe_size.as_deref(),
            AttributeBag::Apparel { size_label, .. } => size_label.as_deref(),
            AttributeBag::Accessory { .. } => None,
        }
    }
}

/// The per-CCOD aggregate handed to the sync pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    /// Normalized CCOD (or the SKU for singleton fallbacks).
    pub key: String,
    pub title: String,
    /// RMS `familia`.
    pub vendor: String,
    /// RMS `categoria`.
    pub product_type: String,
    pub taxonomy_id: Option<String>,
    pub handle: String,
    pub status: ProductStatus,
    pub variants: Vec<Variant>,
    pub metafields: Vec<Metafield>,
    /// Collection names this product belongs to (categoria, familia).
    pub collection_keys: Vec<String>,
    pub discount: Option<DiscountSpec>,
    pub attributes: AttributeBag,
}

impl Product {
    /// Total on-hand stock across variants.
    pub fn total_stock(&self) -> i64 {
        self.variants.iter().map(|v| i64::from(v.quantity)).sum()
    }

    /// Greatest `last_updated` across the rows that built this product.
    pub fn max_last_updated(&self) -> Option<DateTime<Utc>> {
        self.variants.iter().map(|v| v.last_updated).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn status_from_stock() {
        assert_eq!(ProductStatus::from_total_stock(1), ProductStatus::Active);
        assert_eq!(ProductStatus::from_total_stock(0), ProductStatus::Draft);
        assert_eq!(ProductStatus::from_total_stock(-3), ProductStatus::Draft);
    }

    #[test]
    fn metafield_constructors_render_values() {
        let m = Metafield::integer("rms", "item_id", 42);
        assert_eq!(m.value, "42");
        assert_eq!(m.value_type.as_str(), "number_integer");

        let m = Metafield::json("rms", "product_attributes", &serde_json::json!({"a": 1}));
        assert_eq!(m.value, r#"{"a":1}"#);
    }

    #[test]
    fn attribute_bag_tags_by_kind() {
        let bag = AttributeBag::Footwear {
            shoe_size: Some("23.5".into()),
            raw: Map::new(),
        };
        assert_eq!(bag.kind(), ProductKind::Footwear);
        let json = serde_json::to_value(&bag).unwrap();
        assert_eq!(json["kind"], "footwear");
        assert_eq!(json["shoe_size"], "23.5");
    }

    #[test]
    fn unknown_raw_fields_survive_roundtrip() {
        let json = serde_json::json!({
            "kind": "apparel",
            "size_label": "M",
            "raw": {"fit": "slim", "season": "SS25"}
        });
        let bag: AttributeBag = serde_json::from_value(json.clone()).unwrap();
        let back = serde_json::to_value(&bag).unwrap();
        assert_eq!(back["raw"]["fit"], "slim");
        assert_eq!(back["raw"]["season"], "SS25");
    }

    #[test]
    fn variant_option_key_pairs_color_and_size() {
        let v = Variant {
            sku: "A1".into(),
            item_id: 1,
            option1: "Red".into(),
            option2: "23.5".into(),
            size_original: Some("23½".into()),
            price: dec!(10),
            compare_at_price: None,
            quantity: 1,
            barcode: None,
            discount_percent: None,
            sale_starts_at: None,
            sale_ends_at: None,
            last_updated: Utc::now(),
        };
        assert_eq!(v.option_key(), ("Red".into(), "23.5".into()));
    }
}
