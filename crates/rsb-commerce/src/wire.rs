//! Response-shape helpers for the GraphQL transport.
//!
//! Navigation into response JSON is explicit and every miss produces a
//! `SchemaDrift` error carrying the payload that failed to parse — the
//! payloads are small and the alternative (silently defaulting) hides
//! upstream contract changes.

use chrono::{DateTime, Utc};
use rsb_schemas::{
    CommerceAddress, CommerceLineItem, CommerceOrder, ErrorKind, Location, MoneySet,
    RemoteProduct, RemoteVariant, SyncError,
};
use rust_decimal::Decimal;
use serde_json::Value;

/// Walk `path` into `v`; a missing or null step is schema drift.
pub fn dig<'a>(v: &'a Value, path: &[&str]) -> Result<&'a Value, SyncError> {
    let mut cur = v;
    for key in path {
        match cur.get(key) {
            Some(next) if !next.is_null() => cur = next,
            _ => {
                return Err(SyncError::schema_drift(
                    "missing_field",
                    format!("response missing '{}'", path.join(".")),
                )
                .with_payload(v.clone()));
            }
        }
    }
    Ok(cur)
}

/// Like [`dig`] but a missing/null leaf is `None`, not drift.
pub fn dig_opt<'a>(v: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = v;
    for key in path {
        match cur.get(key) {
            Some(next) if !next.is_null() => cur = next,
            _ => return None,
        }
    }
    Some(cur)
}

pub fn as_str(v: &Value, path: &[&str]) -> Result<String, SyncError> {
    let leaf = dig(v, path)?;
    leaf.as_str().map(str::to_string).ok_or_else(|| {
        SyncError::schema_drift(
            "field_type",
            format!("'{}' is not a string", path.join(".")),
        )
        .with_payload(v.clone())
    })
}

pub fn as_decimal(v: &Value, path: &[&str]) -> Result<Decimal, SyncError> {
    let leaf = dig(v, path)?;
    let parsed = match leaf {
        Value::String(s) => s.parse::<Decimal>().ok(),
        Value::Number(n) => n.to_string().parse::<Decimal>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        SyncError::schema_drift(
            "field_type",
            format!("'{}' is not a decimal", path.join(".")),
        )
        .with_payload(v.clone())
    })
}

pub fn as_datetime(v: &Value, path: &[&str]) -> Result<DateTime<Utc>, SyncError> {
    let raw = as_str(v, path)?;
    raw.parse::<DateTime<Utc>>().map_err(|_| {
        SyncError::schema_drift(
            "field_type",
            format!("'{}' is not a datetime: {raw}", path.join(".")),
        )
        .with_payload(v.clone())
    })
}

/// Surface a non-empty `userErrors` array as a permanent failure.
pub fn check_user_errors(mutation: &str, payload: &Value) -> Result<(), SyncError> {
    let Some(errors) = dig_opt(payload, &["userErrors"]).and_then(Value::as_array) else {
        return Ok(());
    };
    if errors.is_empty() {
        return Ok(());
    }
    let joined = errors
        .iter()
        .filter_map(|e| e.get("message").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("; ");
    Err(
        SyncError::validation("user_errors", format!("{mutation}: {joined}"))
            .with_payload(payload.clone()),
    )
}

/// Classify a non-2xx HTTP response.
pub fn classify_status(status: u16, retry_after_secs: Option<u64>, body: &str) -> SyncError {
    let snippet: String = body.chars().take(512).collect();
    match status {
        401 | 403 => SyncError::auth(format!("http_{status}"), snippet),
        429 => {
            let mut err = SyncError::transient("http_429", "throttled by commerce API");
            if let Some(secs) = retry_after_secs {
                err = err.with_retry_after(secs);
            }
            err
        }
        500..=599 => SyncError::transient(format!("http_{status}"), snippet),
        _ => SyncError::new(ErrorKind::Validation, format!("http_{status}"), snippet),
    }
}

// ---------------------------------------------------------------------------
// Node parsers
// ---------------------------------------------------------------------------

pub fn parse_location(node: &Value) -> Result<Location, SyncError> {
    Ok(Location {
        id: as_str(node, &["id"])?,
        name: as_str(node, &["name"])?,
        is_primary: dig_opt(node, &["isPrimary"])
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

pub fn parse_remote_variant(node: &Value) -> Result<RemoteVariant, SyncError> {
    Ok(RemoteVariant {
        id: as_str(node, &["id"])?,
        sku: dig_opt(node, &["sku"])
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        option1: dig_opt(node, &["option1"])
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        option2: dig_opt(node, &["option2"])
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        price: as_decimal(node, &["price"])?,
        compare_at_price: match dig_opt(node, &["compareAtPrice"]) {
            Some(v) => Some(as_decimal(v, &[])?),
            None => None,
        },
        inventory_item_id: as_str(node, &["inventoryItem", "id"])?,
    })
}

pub fn parse_remote_product(node: &Value) -> Result<RemoteProduct, SyncError> {
    let mut variants = Vec::new();
    if let Some(nodes) = dig_opt(node, &["variants", "nodes"]).and_then(Value::as_array) {
        for v in nodes {
            variants.push(parse_remote_variant(v)?);
        }
    }
    Ok(RemoteProduct {
        id: as_str(node, &["id"])?,
        handle: as_str(node, &["handle"])?,
        title: as_str(node, &["title"])?,
        vendor: dig_opt(node, &["vendor"])
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        product_type: dig_opt(node, &["productType"])
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        status: dig_opt(node, &["status"])
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        variants,
    })
}

fn parse_money(node: &Value) -> Result<MoneySet, SyncError> {
    Ok(MoneySet {
        amount: as_decimal(node, &["shopMoney", "amount"])?,
        currency: dig_opt(node, &["shopMoney", "currencyCode"])
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn parse_address(node: &Value) -> CommerceAddress {
    let text = |key: &str| {
        dig_opt(node, &[key])
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    CommerceAddress {
        name: text("name"),
        address1: text("address1"),
        address2: text("address2"),
        city: text("city"),
        province: text("province"),
        zip: text("zip"),
        country: text("country"),
        phone: text("phone"),
    }
}

pub fn parse_order(node: &Value) -> Result<CommerceOrder, SyncError> {
    let mut line_items = Vec::new();
    let nodes = dig(node, &["lineItems", "nodes"])?
        .as_array()
        .cloned()
        .unwrap_or_default();
    for item in &nodes {
        line_items.push(CommerceLineItem {
            title: as_str(item, &["title"])?,
            sku: dig_opt(item, &["sku"])
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            quantity: dig(item, &["quantity"])?.as_i64().unwrap_or(0) as i32,
            original_unit_price: parse_money(dig(item, &["originalUnitPriceSet"])?)?,
            discounted_unit_price: parse_money(dig(item, &["discountedUnitPriceSet"])?)?,
        });
    }

    Ok(CommerceOrder {
        id: as_str(node, &["id"])?,
        name: as_str(node, &["name"])?,
        created_at: as_datetime(node, &["createdAt"])?,
        financial_status: as_str(node, &["financialStatus"])?.to_lowercase(),
        email: dig_opt(node, &["email"])
            .and_then(Value::as_str)
            .map(str::to_string),
        customer_first_name: dig_opt(node, &["customer", "firstName"])
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        customer_last_name: dig_opt(node, &["customer", "lastName"])
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        total_price: parse_money(dig(node, &["totalPriceSet"])?)?,
        total_tax: parse_money(dig(node, &["totalTaxSet"])?)?,
        shipping_address: dig_opt(node, &["shippingAddress"]).map(parse_address),
        line_items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dig_reports_full_path_on_miss() {
        let v = json!({"a": {"b": 1}});
        assert_eq!(dig(&v, &["a", "b"]).unwrap(), &json!(1));
        let err = dig(&v, &["a", "c"]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SchemaDrift);
        assert!(err.message.contains("a.c"));
        assert!(err.payload.is_some());
    }

    #[test]
    fn null_leaf_is_drift_for_dig_but_none_for_opt() {
        let v = json!({"a": null});
        assert!(dig(&v, &["a"]).is_err());
        assert!(dig_opt(&v, &["a"]).is_none());
    }

    #[test]
    fn decimal_accepts_string_and_number() {
        let v = json!({"s": "10.50", "n": 3});
        assert_eq!(as_decimal(&v, &["s"]).unwrap().to_string(), "10.50");
        assert_eq!(as_decimal(&v, &["n"]).unwrap().to_string(), "3");
    }

    #[test]
    fn user_errors_surface_as_validation() {
        let payload = json!({"userErrors": [{"field": ["title"], "message": "Title taken"}]});
        let err = check_user_errors("productCreate", &payload).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("Title taken"));
        assert!(err.payload.is_some());
    }

    #[test]
    fn empty_user_errors_pass() {
        assert!(check_user_errors("x", &json!({"userErrors": []})).is_ok());
        assert!(check_user_errors("x", &json!({})).is_ok());
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(401, None, "").kind, ErrorKind::Auth);
        assert_eq!(classify_status(503, None, "").kind, ErrorKind::Transient);
        assert_eq!(classify_status(422, None, "").kind, ErrorKind::Validation);
        let throttled = classify_status(429, Some(4), "");
        assert_eq!(throttled.kind, ErrorKind::Transient);
        assert_eq!(throttled.retry_after_secs, Some(4));
    }

    #[test]
    fn parses_product_with_variants() {
        let node = json!({
            "id": "gid://commerce/Product/1",
            "handle": "tee-a",
            "title": "Tee",
            "vendor": "Ropa",
            "productType": "Blusas",
            "status": "ACTIVE",
            "variants": {"nodes": [{
                "id": "gid://commerce/Variant/2",
                "sku": "A1",
                "option1": "Red",
                "option2": "M",
                "price": "10.00",
                "inventoryItem": {"id": "gid://commerce/InventoryItem/3"}
            }]}
        });
        let p = parse_remote_product(&node).unwrap();
        assert_eq!(p.handle, "tee-a");
        assert_eq!(p.variants[0].inventory_item_id, "gid://commerce/InventoryItem/3");
        assert!(p.variants[0].compare_at_price.is_none());
    }

    #[test]
    fn parses_order() {
        let node = json!({
            "id": "gid://commerce/Order/9",
            "name": "#1001",
            "createdAt": "2025-05-01T10:00:00Z",
            "financialStatus": "PAID",
            "email": "ana@example.com",
            "customer": {"firstName": "Ana", "lastName": "Mora"},
            "totalPriceSet": {"shopMoney": {"amount": "45.00", "currencyCode": "CRC"}},
            "totalTaxSet": {"shopMoney": {"amount": "5.85", "currencyCode": "CRC"}},
            "shippingAddress": {"name": "Ana Mora", "address1": "Calle 5", "city": "San José",
                                 "province": "SJ", "zip": "10101", "country": "CR", "phone": "+506"},
            "lineItems": {"nodes": [{
                "title": "Tee",
                "sku": "A1",
                "quantity": 2,
                "originalUnitPriceSet": {"shopMoney": {"amount": "25.00"}},
                "discountedUnitPriceSet": {"shopMoney": {"amount": "22.50"}}
            }]}
        });
        let order = parse_order(&node).unwrap();
        assert_eq!(order.name, "#1001");
        assert_eq!(order.financial_status, "paid");
        assert_eq!(order.line_items.len(), 1);
        assert_eq!(order.line_items[0].discounted_unit_price.amount.to_string(), "22.50");
        assert!(order.shipping_address.is_some());
    }

    #[test]
    fn missing_line_price_is_drift() {
        let node = json!({
            "id": "x", "name": "#1", "createdAt": "2025-05-01T10:00:00Z",
            "financialStatus": "PAID",
            "totalPriceSet": {"shopMoney": {"amount": "1"}},
            "totalTaxSet": {"shopMoney": {"amount": "0"}},
            "lineItems": {"nodes": [{"title": "Tee", "sku": "A1", "quantity": 1}]}
        });
        let err = parse_order(&node).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SchemaDrift);
    }
}
