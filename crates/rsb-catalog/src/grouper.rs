//! CCOD grouping: RMS item rows → product aggregates.
//!
//! One product per model-color code. Within a group every row becomes one
//! variant (option1 = color, option2 = normalized size). The grouper owns:
//! - duplicate `(color, size)` resolution (newest `last_updated` wins)
//! - the 100-variant cap with deterministic handle-suffixed splits
//! - title derivation (longest common prefix of descriptions)
//! - sale-window pricing on each variant
//!
//! It does not resolve taxonomy or compose metafields; the pipeline's
//! prepare step does that on the aggregates returned from here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rsb_schemas::{AttributeBag, ItemRow, Product, ProductKind, ProductStatus, Variant};
use serde_json::Map;

use crate::handle::{derive_handle, numbered_handle};
use crate::size::normalize_size;
use crate::taxonomy::product_kind;

/// Commerce-side hard limit on variants per product.
pub const MAX_VARIANTS_PER_PRODUCT: usize = 100;

/// Title prefixes shorter than this fall back to the first description.
const MIN_TITLE_PREFIX: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupWarning {
    /// Row failed the read-model invariants (empty sku/description or
    /// non-positive price) and was dropped.
    InvalidRow { item_id: i64, sku: String },
    /// Two rows mapped to the same `(color, size)`; the older one lost.
    DuplicateVariant {
        ccod: String,
        color: String,
        size: String,
        kept_sku: String,
        dropped_sku: String,
    },
    /// A group exceeded [`MAX_VARIANTS_PER_PRODUCT`] and was split.
    VariantCap { ccod: String, parts: usize },
}

#[derive(Debug, Default)]
pub struct GroupingOutcome {
    pub products: Vec<Product>,
    pub warnings: Vec<GroupWarning>,
}

/// Group a batch of rows into product aggregates.
///
/// `now` drives sale-window evaluation. Output ordering is deterministic:
/// products ascend by group key, variants by `(option1, option2)`.
pub fn group_rows(rows: &[ItemRow], now: DateTime<Utc>) -> GroupingOutcome {
    let mut outcome = GroupingOutcome::default();

    let mut groups: BTreeMap<String, Vec<&ItemRow>> = BTreeMap::new();
    for row in rows {
        if !row.is_well_formed() {
            outcome.warnings.push(GroupWarning::InvalidRow {
                item_id: row.item_id,
                sku: row.sku.clone(),
            });
            continue;
        }
        groups.entry(group_key(row)).or_default().push(row);
    }

    for (key, mut members) in groups {
        // Stable intra-group order before any tie is broken.
        members.sort_by(|a, b| a.sku.cmp(&b.sku));

        let mut variants = build_variants(&key, &members, now, &mut outcome.warnings);
        variants.sort_by(|a, b| {
            a.option1
                .cmp(&b.option1)
                .then_with(|| a.option2.cmp(&b.option2))
        });

        if variants.is_empty() {
            continue;
        }

        let title = derive_title(&members);
        let base_handle = derive_handle(&key, &title);
        let first = members[0];

        let parts: Vec<&[Variant]> = variants.chunks(MAX_VARIANTS_PER_PRODUCT).collect();
        if parts.len() > 1 {
            outcome.warnings.push(GroupWarning::VariantCap {
                ccod: key.clone(),
                parts: parts.len(),
            });
        }

        for (idx, part) in parts.iter().enumerate() {
            let part_variants = part.to_vec();
            let total: i64 = part_variants.iter().map(|v| i64::from(v.quantity)).sum();
            outcome.products.push(Product {
                key: key.clone(),
                title: title.clone(),
                vendor: first.familia.clone(),
                product_type: first.categoria.clone(),
                taxonomy_id: None,
                handle: numbered_handle(&base_handle, idx + 1),
                status: ProductStatus::from_total_stock(total),
                attributes: attribute_bag(first, &part_variants),
                variants: part_variants,
                metafields: Vec::new(),
                collection_keys: collection_keys(first),
                discount: None,
            });
        }
    }

    outcome
}

/// Normalized group key: uppercase trimmed CCOD, falling back to the SKU for
/// rows without one (singleton products).
fn group_key(row: &ItemRow) -> String {
    let ccod = row.ccod.trim();
    if ccod.is_empty() {
        row.sku.trim().to_uppercase()
    } else {
        ccod.to_uppercase()
    }
}

fn build_variants(
    ccod: &str,
    members: &[&ItemRow],
    now: DateTime<Utc>,
    warnings: &mut Vec<GroupWarning>,
) -> Vec<Variant> {
    let mut by_options: BTreeMap<(String, String), Variant> = BTreeMap::new();

    for row in members {
        let size = normalize_size(&row.talla);
        let slot = (row.color.clone(), size.canonical.clone());

        let variant = variant_from_row(row, size.canonical, size.original, now);

        match by_options.get(&slot) {
            Some(existing) if existing.last_updated >= variant.last_updated => {
                warnings.push(GroupWarning::DuplicateVariant {
                    ccod: ccod.to_string(),
                    color: slot.0,
                    size: slot.1,
                    kept_sku: existing.sku.clone(),
                    dropped_sku: variant.sku,
                });
            }
            Some(existing) => {
                warnings.push(GroupWarning::DuplicateVariant {
                    ccod: ccod.to_string(),
                    color: slot.0.clone(),
                    size: slot.1.clone(),
                    kept_sku: variant.sku.clone(),
                    dropped_sku: existing.sku.clone(),
                });
                by_options.insert(slot, variant);
            }
            None => {
                by_options.insert(slot, variant);
            }
        }
    }

    by_options.into_values().collect()
}

fn variant_from_row(
    row: &ItemRow,
    canonical_size: String,
    original_size: Option<String>,
    now: DateTime<Utc>,
) -> Variant {
    let sale_active = row.sale_active_at(now);
    let (price, compare_at, discount) = match row.sale_price {
        Some(sale) if sale_active => {
            let discount = (row.price - sale) / row.price;
            (sale, Some(row.price), Some(discount))
        }
        _ => (row.price, None, None),
    };

    Variant {
        sku: row.sku.clone(),
        item_id: row.item_id,
        option1: row.color.clone(),
        option2: canonical_size,
        size_original: original_size,
        price,
        compare_at_price: compare_at,
        quantity: row.quantity,
        barcode: row
            .barcode
            .clone()
            .filter(|b| !b.trim().is_empty())
            .or_else(|| Some(row.sku.clone())),
        discount_percent: discount,
        sale_starts_at: if sale_active { row.sale_start } else { None },
        sale_ends_at: if sale_active { row.sale_end } else { None },
        last_updated: row.last_updated,
    }
}

/// Longest common prefix of the group's descriptions, trimmed of trailing
/// separators. Falls back to the first description when the prefix is too
/// short to be a name.
fn derive_title(members: &[&ItemRow]) -> String {
    let first = members[0].description.trim();
    let mut prefix = first.to_string();
    for row in &members[1..] {
        let desc = row.description.trim();
        let common: usize = prefix
            .chars()
            .zip(desc.chars())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a.len_utf8())
            .sum();
        prefix.truncate(common);
        if prefix.is_empty() {
            break;
        }
    }
    let prefix = prefix
        .trim_end_matches(|c: char| c.is_whitespace() || c == '-' || c == '/' || c == ',')
        .to_string();

    if prefix.chars().count() >= MIN_TITLE_PREFIX {
        prefix
    } else {
        first.to_string()
    }
}

fn collection_keys(row: &ItemRow) -> Vec<String> {
    let mut keys = Vec::new();
    for k in [row.categoria.trim(), row.familia.trim()] {
        if !k.is_empty() && !keys.iter().any(|existing| existing == k) {
            keys.push(k.to_string());
        }
    }
    keys
}

fn attribute_bag(first: &ItemRow, variants: &[Variant]) -> AttributeBag {
    let lead_size = variants.first().map(|v| v.option2.clone());

    // Row fields the aggregate itself has no slot for ride in the raw bag;
    // the pipeline reads them back when composing metafields.
    let mut raw = Map::new();
    raw.insert("genero".into(), first.genero.clone().into());
    raw.insert(
        "extended_category".into(),
        first.extended_category.clone().into(),
    );

    match product_kind(&first.familia) {
        ProductKind::Footwear => AttributeBag::Footwear {
            shoe_size: lead_size,
            raw,
        },
        ProductKind::Apparel => AttributeBag::Apparel {
            size_label: lead_size,
            raw,
        },
        ProductKind::Accessory => AttributeBag::Accessory { raw },
    }
}

/// Largest per-variant discount in the product, if any variant is on sale.
pub fn max_discount_percent(variants: &[Variant]) -> Option<Decimal> {
    variants.iter().filter_map(|v| v.discount_percent).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn base_row(item_id: i64, sku: &str, ccod: &str, color: &str, talla: &str) -> ItemRow {
        ItemRow {
            item_id,
            sku: sku.into(),
            ccod: ccod.into(),
            description: "Blusa Manga Larga".into(),
            familia: "Ropa".into(),
            categoria: "Blusas".into(),
            extended_category: String::new(),
            genero: "Mujer".into(),
            color: color.into(),
            talla: talla.into(),
            price: dec!(10.00),
            sale_price: None,
            sale_start: None,
            sale_end: None,
            quantity: 5,
            stock_a: 3,
            stock_b: 2,
            tax: dec!(0.13),
            barcode: None,
            last_updated: Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn one_product_per_ccod() {
        let rows = vec![
            base_row(1, "A1", "B100", "Red", "S"),
            base_row(2, "A2", "B100", "Red", "M"),
            base_row(3, "A3", "B200", "Blue", "M"),
        ];
        let out = group_rows(&rows, now());
        assert_eq!(out.products.len(), 2);
        assert_eq!(out.products[0].key, "B100");
        assert_eq!(out.products[0].variants.len(), 2);
        assert_eq!(out.products[1].key, "B200");
    }

    #[test]
    fn ccod_is_normalized_uppercase_trim() {
        let rows = vec![
            base_row(1, "A1", " b100 ", "Red", "S"),
            base_row(2, "A2", "B100", "Red", "M"),
        ];
        let out = group_rows(&rows, now());
        assert_eq!(out.products.len(), 1);
        assert_eq!(out.products[0].key, "B100");
    }

    #[test]
    fn empty_ccod_falls_back_to_sku_singleton() {
        let rows = vec![
            base_row(1, "A1", "", "Red", "S"),
            base_row(2, "A2", "", "Red", "M"),
        ];
        let out = group_rows(&rows, now());
        assert_eq!(out.products.len(), 2);
        assert_eq!(out.products[0].key, "A1");
        assert_eq!(out.products[1].key, "A2");
    }

    #[test]
    fn options_map_color_and_normalized_size() {
        let rows = vec![base_row(1, "A1", "B100", "Red", "23½")];
        let out = group_rows(&rows, now());
        let v = &out.products[0].variants[0];
        assert_eq!(v.option1, "Red");
        assert_eq!(v.option2, "23.5");
        assert_eq!(v.size_original.as_deref(), Some("23½"));
    }

    #[test]
    fn duplicate_options_keep_newer_row() {
        let mut older = base_row(1, "A1", "B100", "Red", "M");
        older.last_updated = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut newer = base_row(2, "A2", "B100", "Red", "M");
        newer.last_updated = Utc.with_ymd_and_hms(2025, 1, 9, 0, 0, 0).unwrap();

        let out = group_rows(&[older, newer], now());
        assert_eq!(out.products[0].variants.len(), 1);
        assert_eq!(out.products[0].variants[0].sku, "A2");
        assert!(matches!(
            out.warnings.as_slice(),
            [GroupWarning::DuplicateVariant { kept_sku, dropped_sku, .. }]
                if kept_sku == "A2" && dropped_sku == "A1"
        ));
    }

    #[test]
    fn variant_cap_splits_with_suffixed_handles() {
        let rows: Vec<ItemRow> = (0..250)
            .map(|i| base_row(i, &format!("S{i:03}"), "B100", "Red", &format!("{i}")))
            .collect();
        let out = group_rows(&rows, now());
        assert_eq!(out.products.len(), 3);
        assert_eq!(out.products[0].variants.len(), 100);
        assert_eq!(out.products[1].variants.len(), 100);
        assert_eq!(out.products[2].variants.len(), 50);

        let h0 = &out.products[0].handle;
        assert_eq!(out.products[1].handle, format!("{h0}-2"));
        assert_eq!(out.products[2].handle, format!("{h0}-3"));
        assert!(out
            .warnings
            .iter()
            .any(|w| matches!(w, GroupWarning::VariantCap { parts: 3, .. })));
    }

    #[test]
    fn title_is_common_prefix_of_descriptions() {
        let mut a = base_row(1, "A1", "B100", "Red", "S");
        a.description = "Blusa Floral Roja".into();
        let mut b = base_row(2, "A2", "B100", "Red", "M");
        b.description = "Blusa Floral Azul".into();
        let out = group_rows(&[a, b], now());
        assert_eq!(out.products[0].title, "Blusa Floral");
    }

    #[test]
    fn short_prefix_falls_back_to_first_description() {
        let mut a = base_row(1, "A1", "B100", "Red", "S");
        a.description = "Abrigo Largo".into();
        let mut b = base_row(2, "A2", "B100", "Red", "M");
        b.description = "Bufanda".into();
        let out = group_rows(&[a, b], now());
        assert_eq!(out.products[0].title, "Abrigo Largo");
    }

    #[test]
    fn status_follows_stock() {
        let mut in_stock = base_row(1, "A1", "B100", "Red", "S");
        in_stock.quantity = 5;
        let out = group_rows(&[in_stock], now());
        assert_eq!(out.products[0].status, ProductStatus::Active);

        let mut empty = base_row(1, "A1", "B200", "Red", "S");
        empty.quantity = 0;
        let out = group_rows(&[empty], now());
        assert_eq!(out.products[0].status, ProductStatus::Draft);
    }

    #[test]
    fn sale_window_rewrites_variant_pricing() {
        let mut row = base_row(1, "A1", "B100", "Red", "M");
        row.price = dec!(100.00);
        row.sale_price = Some(dec!(80.00));
        row.sale_start = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        row.sale_end = Some(Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 0).unwrap());

        let out = group_rows(&[row.clone()], now());
        let v = &out.products[0].variants[0];
        assert_eq!(v.price, dec!(80.00));
        assert_eq!(v.compare_at_price, Some(dec!(100.00)));
        assert_eq!(v.discount_percent, Some(dec!(0.20)));

        // Outside the window: list price, no compareAt.
        let outside = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let out = group_rows(&[row], outside);
        let v = &out.products[0].variants[0];
        assert_eq!(v.price, dec!(100.00));
        assert!(v.compare_at_price.is_none());
        assert!(v.discount_percent.is_none());
    }

    #[test]
    fn invalid_rows_dropped_with_warning() {
        let mut bad = base_row(1, "A1", "B100", "Red", "S");
        bad.price = Decimal::ZERO;
        let good = base_row(2, "A2", "B100", "Red", "M");
        let out = group_rows(&[bad, good], now());
        assert_eq!(out.products[0].variants.len(), 1);
        assert!(matches!(
            out.warnings.as_slice(),
            [GroupWarning::InvalidRow { item_id: 1, .. }]
        ));
    }

    #[test]
    fn barcode_falls_back_to_sku() {
        let mut with = base_row(1, "A1", "B100", "Red", "S");
        with.barcode = Some("7501".into());
        let without = base_row(2, "A2", "B100", "Red", "M");
        let out = group_rows(&[with, without], now());
        let barcodes: Vec<_> = out.products[0]
            .variants
            .iter()
            .map(|v| v.barcode.clone().unwrap())
            .collect();
        assert!(barcodes.contains(&"7501".to_string()));
        assert!(barcodes.contains(&"A2".to_string()));
    }

    #[test]
    fn collection_keys_are_categoria_then_familia() {
        let rows = vec![base_row(1, "A1", "B100", "Red", "S")];
        let out = group_rows(&rows, now());
        assert_eq!(out.products[0].collection_keys, vec!["Blusas", "Ropa"]);
    }

    #[test]
    fn max_discount_across_variants() {
        let mut a = base_row(1, "A1", "B100", "Red", "S");
        a.price = dec!(100.00);
        a.sale_price = Some(dec!(90.00));
        a.sale_start = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        a.sale_end = Some(Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap());
        let mut b = base_row(2, "A2", "B100", "Red", "M");
        b.price = dec!(100.00);
        b.sale_price = Some(dec!(75.00));
        b.sale_start = a.sale_start;
        b.sale_end = a.sale_end;

        let out = group_rows(&[a, b], now());
        let max = max_discount_percent(&out.products[0].variants).unwrap();
        assert_eq!(max, dec!(0.25));
    }
}
