//! GraphQL transport implementation of [`CommerceClient`].
//!
//! One shared `reqwest::Client`; every operation:
//! 1. takes a token from its endpoint family's bucket
//! 2. runs through the retry executor (transient-only retries)
//! 3. surfaces HTTP status, top-level GraphQL errors and `userErrors`
//!    through the shared error taxonomy
//!
//! A 429 surrenders the family's remaining budget for the server-supplied
//! interval before the retry executor sleeps on it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rsb_config::CommerceSettings;
use rsb_limiter::{EndpointFamily, RateLimiter, RetryExecutor, RetryPolicy};
use rsb_schemas::{
    CommerceOrder, DiscountSpec, Location, Metafield, Product, RemoteProduct, RemoteVariant,
    SyncError, SyncResult, Variant,
};
use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::wire;
use crate::{CommerceClient, ProductPatch, VariantUpdate, METAFIELDS_PER_CALL};

pub struct HttpCommerceClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
    /// Process-shutdown token: stops retry sleeps, never a per-run cancel.
    shutdown: CancellationToken,
}

impl HttpCommerceClient {
    pub fn new(
        settings: &CommerceSettings,
        call_timeout: Duration,
        limiter: Arc<RateLimiter>,
        retry_policy: RetryPolicy,
        shutdown: CancellationToken,
    ) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| SyncError::validation("http_client", e.to_string()))?;
        let endpoint = format!(
            "{}/admin/api/{}/graphql.json",
            settings.shop_url.trim_end_matches('/'),
            settings.api_version
        );
        Ok(Self {
            http,
            endpoint,
            token: settings.token.clone(),
            limiter,
            retry: RetryExecutor::new(retry_policy),
            shutdown,
        })
    }

    /// One paced, retried GraphQL call. Returns the `data` object.
    async fn graphql(
        &self,
        family: EndpointFamily,
        op: &'static str,
        query: &'static str,
        variables: Value,
    ) -> SyncResult<Value> {
        self.limiter.acquire(family).await;

        self.retry
            .execute(op, &self.shutdown, || {
                let variables = variables.clone();
                async move { self.post_once(family, op, query, variables).await }
            })
            .await
    }

    async fn post_once(
        &self,
        family: EndpointFamily,
        op: &'static str,
        query: &'static str,
        variables: Value,
    ) -> SyncResult<Value> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("X-Shopify-Access-Token", &self.token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::transient("http_timeout", format!("{op}: {e}"))
                } else {
                    SyncError::transient("http_network", format!("{op}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            let err = wire::classify_status(status.as_u16(), retry_after, &body);
            if status.as_u16() == 429 {
                self.limiter
                    .penalize(family, Duration::from_secs(retry_after.unwrap_or(2)))
                    .await;
            }
            return Err(err);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SyncError::schema_drift("bad_json", format!("{op}: {e}")))?;

        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let throttled = errors.iter().any(|e| {
                    wire::dig_opt(e, &["extensions", "code"]).and_then(Value::as_str)
                        == Some("THROTTLED")
                });
                if throttled {
                    self.limiter.penalize(family, Duration::from_secs(2)).await;
                    return Err(SyncError::transient("graphql_throttled", op)
                        .with_payload(body.clone()));
                }
                return Err(SyncError::validation(
                    "graphql_errors",
                    format!("{op}: request rejected"),
                )
                .with_payload(body.clone()));
            }
        }

        debug!(op, "commerce call ok");
        wire::dig(&body, &["data"]).cloned()
    }
}

// ---------------------------------------------------------------------------
// GraphQL documents
// ---------------------------------------------------------------------------

const Q_LOCATIONS: &str = r#"
query Locations {
  locations(first: 50) { nodes { id name isPrimary } }
}"#;

const Q_PRODUCT_BY_HANDLE: &str = r#"
query ProductByHandle($handle: String!) {
  productByHandle(handle: $handle) {
    id handle title vendor productType status
    variants(first: 250) { nodes {
      id sku option1 option2 price compareAtPrice
      inventoryItem { id }
    } }
  }
}"#;

const M_PRODUCT_CREATE: &str = r#"
mutation ProductCreate($input: ProductInput!) {
  productCreate(input: $input) {
    product { id }
    userErrors { field message }
  }
}"#;

const M_PRODUCT_UPDATE: &str = r#"
mutation ProductUpdate($input: ProductInput!) {
  productUpdate(input: $input) {
    product { id }
    userErrors { field message }
  }
}"#;

const M_VARIANTS_BULK_CREATE: &str = r#"
mutation VariantsBulkCreate($productId: ID!, $variants: [ProductVariantsBulkInput!]!) {
  productVariantsBulkCreate(productId: $productId, variants: $variants) {
    productVariants {
      id sku option1 option2 price compareAtPrice
      inventoryItem { id }
    }
    userErrors { field message }
  }
}"#;

const M_VARIANTS_BULK_UPDATE: &str = r#"
mutation VariantsBulkUpdate($productId: ID!, $variants: [ProductVariantsBulkInput!]!) {
  productVariantsBulkUpdate(productId: $productId, variants: $variants) {
    productVariants { id }
    userErrors { field message }
  }
}"#;

const M_INVENTORY_ACTIVATE: &str = r#"
mutation InventoryActivate($inventoryItemId: ID!, $locationId: ID!) {
  inventoryActivate(inventoryItemId: $inventoryItemId, locationId: $locationId) {
    inventoryLevel { id }
    userErrors { field message }
  }
}"#;

const M_INVENTORY_SET_ON_HAND: &str = r#"
mutation InventorySetOnHand($input: InventorySetOnHandQuantitiesInput!) {
  inventorySetOnHandQuantities(input: $input) {
    inventoryAdjustmentGroup { id }
    userErrors { field message }
  }
}"#;

const M_METAFIELDS_SET: &str = r#"
mutation MetafieldsSet($metafields: [MetafieldsSetInput!]!) {
  metafieldsSet(metafields: $metafields) {
    metafields { id }
    userErrors { field message }
  }
}"#;

const Q_DISCOUNT_BY_TITLE: &str = r#"
query DiscountByTitle($query: String!) {
  automaticDiscountNodes(first: 1, query: $query) { nodes { id } }
}"#;

const M_DISCOUNT_CREATE: &str = r#"
mutation DiscountCreate($automaticBasicDiscount: DiscountAutomaticBasicInput!) {
  discountAutomaticBasicCreate(automaticBasicDiscount: $automaticBasicDiscount) {
    automaticDiscountNode { id }
    userErrors { field message }
  }
}"#;

const M_DISCOUNT_UPDATE: &str = r#"
mutation DiscountUpdate($id: ID!, $automaticBasicDiscount: DiscountAutomaticBasicInput!) {
  discountAutomaticBasicUpdate(id: $id, automaticBasicDiscount: $automaticBasicDiscount) {
    automaticDiscountNode { id }
    userErrors { field message }
  }
}"#;

const Q_COLLECTIONS: &str = r#"
query Collections {
  collections(first: 250) { nodes { id title } }
}"#;

const Q_COLLECTION_BY_TITLE: &str = r#"
query CollectionByTitle($query: String!) {
  collections(first: 1, query: $query) { nodes { id title } }
}"#;

const M_COLLECTION_CREATE: &str = r#"
mutation CollectionCreate($input: CollectionInput!) {
  collectionCreate(input: $input) {
    collection { id }
    userErrors { field message }
  }
}"#;

const M_COLLECTION_ADD_PRODUCTS: &str = r#"
mutation CollectionAddProducts($id: ID!, $productIds: [ID!]!) {
  collectionAddProducts(id: $id, productIds: $productIds) {
    collection { id }
    userErrors { field message }
  }
}"#;

const Q_ORDER_BY_ID: &str = r#"
query OrderById($id: ID!) {
  node(id: $id) { ... on Order {
    id name createdAt financialStatus email
    customer { firstName lastName }
    totalPriceSet { shopMoney { amount currencyCode } }
    totalTaxSet { shopMoney { amount currencyCode } }
    shippingAddress { name address1 address2 city province zip country phone }
    lineItems(first: 100) { nodes {
      title sku quantity
      originalUnitPriceSet { shopMoney { amount currencyCode } }
      discountedUnitPriceSet { shopMoney { amount currencyCode } }
    } }
  } }
}"#;

const Q_ORDER_BY_NAME: &str = r#"
query OrderByName($query: String!) {
  orders(first: 1, query: $query) { nodes {
    id name createdAt financialStatus email
    customer { firstName lastName }
    totalPriceSet { shopMoney { amount currencyCode } }
    totalTaxSet { shopMoney { amount currencyCode } }
    shippingAddress { name address1 address2 city province zip country phone }
    lineItems(first: 100) { nodes {
      title sku quantity
      originalUnitPriceSet { shopMoney { amount currencyCode } }
      discountedUnitPriceSet { shopMoney { amount currencyCode } }
    } }
  } }
}"#;

fn decimal_str(d: rust_decimal::Decimal) -> String {
    d.to_string()
}

fn variant_input(v: &Variant) -> Value {
    json!({
        "sku": v.sku,
        "option1": v.option1,
        "option2": v.option2,
        "price": decimal_str(v.price),
        "compareAtPrice": v.compare_at_price.map(decimal_str),
        "barcode": v.barcode,
        "inventoryItem": { "tracked": true },
    })
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

#[async_trait]
impl CommerceClient for HttpCommerceClient {
    async fn get_locations(&self) -> SyncResult<Vec<Location>> {
        let data = self
            .graphql(EndpointFamily::GraphqlMutation, "locations", Q_LOCATIONS, json!({}))
            .await?;
        let nodes = wire::dig(&data, &["locations", "nodes"])?
            .as_array()
            .cloned()
            .unwrap_or_default();
        nodes.iter().map(wire::parse_location).collect()
    }

    async fn primary_location(&self) -> SyncResult<Location> {
        let locations = self.get_locations().await?;
        locations
            .iter()
            .find(|l| l.is_primary)
            .or_else(|| locations.first())
            .cloned()
            .ok_or_else(|| SyncError::validation("no_locations", "shop has no locations"))
    }

    async fn fetch_product_by_handle(&self, handle: &str) -> SyncResult<Option<RemoteProduct>> {
        let data = self
            .graphql(
                EndpointFamily::GraphqlMutation,
                "product_by_handle",
                Q_PRODUCT_BY_HANDLE,
                json!({ "handle": handle }),
            )
            .await?;
        match wire::dig_opt(&data, &["productByHandle"]) {
            Some(node) => Ok(Some(wire::parse_remote_product(node)?)),
            None => Ok(None),
        }
    }

    async fn create_product(&self, product: &Product) -> SyncResult<String> {
        let data = self
            .graphql(
                EndpointFamily::GraphqlMutation,
                "product_create",
                M_PRODUCT_CREATE,
                json!({ "input": {
                    "title": product.title,
                    "handle": product.handle,
                    "vendor": product.vendor,
                    "productType": product.product_type,
                    "status": product.status.as_str(),
                    "category": product.taxonomy_id,
                }}),
            )
            .await?;
        let payload = wire::dig(&data, &["productCreate"])?;
        wire::check_user_errors("productCreate", payload)?;
        wire::as_str(payload, &["product", "id"])
    }

    async fn update_product(&self, remote_id: &str, patch: &ProductPatch) -> SyncResult<()> {
        let data = self
            .graphql(
                EndpointFamily::GraphqlMutation,
                "product_update",
                M_PRODUCT_UPDATE,
                json!({ "input": {
                    "id": remote_id,
                    "title": patch.title,
                    "vendor": patch.vendor,
                    "productType": patch.product_type,
                    "status": patch.status,
                    "category": patch.taxonomy_id,
                }}),
            )
            .await?;
        wire::check_user_errors("productUpdate", wire::dig(&data, &["productUpdate"])?)
    }

    async fn bulk_create_variants(
        &self,
        product_remote_id: &str,
        variants: &[Variant],
    ) -> SyncResult<Vec<RemoteVariant>> {
        let inputs: Vec<Value> = variants.iter().map(variant_input).collect();
        let data = self
            .graphql(
                EndpointFamily::GraphqlMutation,
                "variants_bulk_create",
                M_VARIANTS_BULK_CREATE,
                json!({ "productId": product_remote_id, "variants": inputs }),
            )
            .await?;
        let payload = wire::dig(&data, &["productVariantsBulkCreate"])?;
        wire::check_user_errors("productVariantsBulkCreate", payload)?;
        let nodes = wire::dig(payload, &["productVariants"])?
            .as_array()
            .cloned()
            .unwrap_or_default();
        nodes.iter().map(wire::parse_remote_variant).collect()
    }

    async fn bulk_update_variants(
        &self,
        product_remote_id: &str,
        updates: &[VariantUpdate],
    ) -> SyncResult<()> {
        let inputs: Vec<Value> = updates
            .iter()
            .map(|u| {
                json!({
                    "id": u.remote_id,
                    "sku": u.sku,
                    "price": decimal_str(u.price),
                    "compareAtPrice": u.compare_at_price.map(decimal_str),
                })
            })
            .collect();
        let data = self
            .graphql(
                EndpointFamily::GraphqlMutation,
                "variants_bulk_update",
                M_VARIANTS_BULK_UPDATE,
                json!({ "productId": product_remote_id, "variants": inputs }),
            )
            .await?;
        wire::check_user_errors(
            "productVariantsBulkUpdate",
            wire::dig(&data, &["productVariantsBulkUpdate"])?,
        )
    }

    async fn activate_inventory_tracking(
        &self,
        inventory_item_id: &str,
        location_id: &str,
    ) -> SyncResult<()> {
        let data = self
            .graphql(
                EndpointFamily::RestInventory,
                "inventory_activate",
                M_INVENTORY_ACTIVATE,
                json!({ "inventoryItemId": inventory_item_id, "locationId": location_id }),
            )
            .await?;
        wire::check_user_errors("inventoryActivate", wire::dig(&data, &["inventoryActivate"])?)
    }

    async fn set_inventory_on_hand(
        &self,
        inventory_item_id: &str,
        location_id: &str,
        quantity: i32,
    ) -> SyncResult<()> {
        let data = self
            .graphql(
                EndpointFamily::RestInventory,
                "inventory_set_on_hand",
                M_INVENTORY_SET_ON_HAND,
                json!({ "input": {
                    "reason": "correction",
                    "setQuantities": [{
                        "inventoryItemId": inventory_item_id,
                        "locationId": location_id,
                        "quantity": quantity,
                    }],
                }}),
            )
            .await?;
        wire::check_user_errors(
            "inventorySetOnHandQuantities",
            wire::dig(&data, &["inventorySetOnHandQuantities"])?,
        )
    }

    async fn set_metafields(&self, owner_id: &str, metafields: &[Metafield]) -> SyncResult<()> {
        if metafields.len() > METAFIELDS_PER_CALL {
            return Err(SyncError::validation(
                "metafield_chunk",
                format!(
                    "{} metafields in one call (max {METAFIELDS_PER_CALL})",
                    metafields.len()
                ),
            ));
        }
        let inputs: Vec<Value> = metafields
            .iter()
            .map(|m| {
                json!({
                    "ownerId": owner_id,
                    "namespace": m.namespace,
                    "key": m.key,
                    "type": m.value_type.as_str(),
                    "value": m.value,
                })
            })
            .collect();
        let data = self
            .graphql(
                EndpointFamily::GraphqlMutation,
                "metafields_set",
                M_METAFIELDS_SET,
                json!({ "metafields": inputs }),
            )
            .await?;
        wire::check_user_errors("metafieldsSet", wire::dig(&data, &["metafieldsSet"])?)
    }

    async fn find_discount_by_ref(&self, external_ref: &str) -> SyncResult<Option<String>> {
        let data = self
            .graphql(
                EndpointFamily::Discount,
                "discount_by_title",
                Q_DISCOUNT_BY_TITLE,
                json!({ "query": format!("title:'{external_ref}'") }),
            )
            .await?;
        let nodes = wire::dig(&data, &["automaticDiscountNodes", "nodes"])?
            .as_array()
            .cloned()
            .unwrap_or_default();
        match nodes.first() {
            Some(node) => Ok(Some(wire::as_str(node, &["id"])?)),
            None => Ok(None),
        }
    }

    async fn create_automatic_discount(
        &self,
        spec: &DiscountSpec,
        variant_ids: &[String],
    ) -> SyncResult<String> {
        let data = self
            .graphql(
                EndpointFamily::Discount,
                "discount_create",
                M_DISCOUNT_CREATE,
                json!({ "automaticBasicDiscount": {
                    "title": spec.external_ref,
                    "startsAt": spec.starts_at.to_rfc3339(),
                    "endsAt": spec.ends_at.to_rfc3339(),
                    "customerGets": {
                        "value": { "percentage": spec.percent.to_f64() },
                        "items": { "products": { "productVariantsToAdd": variant_ids } },
                    },
                }}),
            )
            .await?;
        let payload = wire::dig(&data, &["discountAutomaticBasicCreate"])?;
        wire::check_user_errors("discountAutomaticBasicCreate", payload)?;
        wire::as_str(payload, &["automaticDiscountNode", "id"])
    }

    async fn update_automatic_discount(
        &self,
        discount_remote_id: &str,
        spec: &DiscountSpec,
    ) -> SyncResult<()> {
        let data = self
            .graphql(
                EndpointFamily::Discount,
                "discount_update",
                M_DISCOUNT_UPDATE,
                json!({
                    "id": discount_remote_id,
                    "automaticBasicDiscount": {
                        "startsAt": spec.starts_at.to_rfc3339(),
                        "endsAt": spec.ends_at.to_rfc3339(),
                        "customerGets": { "value": { "percentage": spec.percent.to_f64() } },
                    },
                }),
            )
            .await?;
        wire::check_user_errors(
            "discountAutomaticBasicUpdate",
            wire::dig(&data, &["discountAutomaticBasicUpdate"])?,
        )
    }

    async fn list_collections(&self) -> SyncResult<Vec<(String, String)>> {
        let data = self
            .graphql(
                EndpointFamily::GraphqlMutation,
                "collections",
                Q_COLLECTIONS,
                json!({}),
            )
            .await?;
        let nodes = wire::dig(&data, &["collections", "nodes"])?
            .as_array()
            .cloned()
            .unwrap_or_default();
        let mut out = Vec::with_capacity(nodes.len());
        for node in &nodes {
            out.push((wire::as_str(node, &["title"])?, wire::as_str(node, &["id"])?));
        }
        Ok(out)
    }

    async fn ensure_collection(&self, name: &str) -> SyncResult<String> {
        let data = self
            .graphql(
                EndpointFamily::GraphqlMutation,
                "collection_by_title",
                Q_COLLECTION_BY_TITLE,
                json!({ "query": format!("title:'{name}'") }),
            )
            .await?;
        let nodes = wire::dig(&data, &["collections", "nodes"])?
            .as_array()
            .cloned()
            .unwrap_or_default();
        if let Some(node) = nodes.first() {
            return wire::as_str(node, &["id"]);
        }

        let data = self
            .graphql(
                EndpointFamily::GraphqlMutation,
                "collection_create",
                M_COLLECTION_CREATE,
                json!({ "input": { "title": name } }),
            )
            .await?;
        let payload = wire::dig(&data, &["collectionCreate"])?;
        wire::check_user_errors("collectionCreate", payload)?;
        wire::as_str(payload, &["collection", "id"])
    }

    async fn add_products_to_collection(
        &self,
        collection_id: &str,
        product_ids: &[String],
    ) -> SyncResult<()> {
        let data = self
            .graphql(
                EndpointFamily::GraphqlMutation,
                "collection_add_products",
                M_COLLECTION_ADD_PRODUCTS,
                json!({ "id": collection_id, "productIds": product_ids }),
            )
            .await?;
        wire::check_user_errors(
            "collectionAddProducts",
            wire::dig(&data, &["collectionAddProducts"])?,
        )
    }

    async fn fetch_order_by_id(&self, id: &str) -> SyncResult<CommerceOrder> {
        let node = if id.starts_with("gid://") {
            let data = self
                .graphql(
                    EndpointFamily::GraphqlMutation,
                    "order_by_id",
                    Q_ORDER_BY_ID,
                    json!({ "id": id }),
                )
                .await?;
            wire::dig(&data, &["node"])?.clone()
        } else {
            // A human-facing order name like "#1001".
            let data = self
                .graphql(
                    EndpointFamily::GraphqlMutation,
                    "order_by_name",
                    Q_ORDER_BY_NAME,
                    json!({ "query": format!("name:{id}") }),
                )
                .await?;
            let nodes = wire::dig(&data, &["orders", "nodes"])?
                .as_array()
                .cloned()
                .unwrap_or_default();
            nodes
                .first()
                .cloned()
                .ok_or_else(|| SyncError::validation("order_not_found", id.to_string()))?
        };
        wire::parse_order(&node)
    }
}
