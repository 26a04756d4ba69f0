//! Thin transport over the commerce platform API.
//!
//! [`CommerceClient`] is the operation set the pipelines consume; the
//! production implementation ([`HttpCommerceClient`]) speaks GraphQL over
//! HTTPS with every call paced by the rate limiter and wrapped in the retry
//! executor. Responses tolerate additive schema changes; `userErrors`
//! embedded in mutation payloads surface as permanent failures carrying the
//! original payload.

use async_trait::async_trait;
use rsb_schemas::{
    CommerceOrder, DiscountSpec, Location, Metafield, Product, RemoteProduct, RemoteVariant,
    SyncResult, Variant,
};

mod http;
pub mod wire;

pub use http::HttpCommerceClient;

/// Maximum metafields accepted by one `set_metafields` call.
pub const METAFIELDS_PER_CALL: usize = 25;

/// Fields `update_product` may change on an existing product.
#[derive(Debug, Clone)]
pub struct ProductPatch {
    pub title: String,
    pub vendor: String,
    pub product_type: String,
    pub taxonomy_id: Option<String>,
    /// `"ACTIVE"` or `"DRAFT"`.
    pub status: String,
}

/// One variant mutation against an existing remote variant.
#[derive(Debug, Clone)]
pub struct VariantUpdate {
    pub remote_id: String,
    pub sku: String,
    pub price: rust_decimal::Decimal,
    pub compare_at_price: Option<rust_decimal::Decimal>,
}

#[async_trait]
pub trait CommerceClient: Send + Sync {
    async fn get_locations(&self) -> SyncResult<Vec<Location>>;

    /// The location inventory is written to. Errors if the shop has none.
    async fn primary_location(&self) -> SyncResult<Location>;

    async fn fetch_product_by_handle(&self, handle: &str) -> SyncResult<Option<RemoteProduct>>;

    /// Create the bare product (no variants). Returns the remote product id.
    async fn create_product(&self, product: &Product) -> SyncResult<String>;

    async fn update_product(&self, remote_id: &str, patch: &ProductPatch) -> SyncResult<()>;

    /// Bulk-create variants; returns the created remote variants with their
    /// inventory item ids.
    async fn bulk_create_variants(
        &self,
        product_remote_id: &str,
        variants: &[Variant],
    ) -> SyncResult<Vec<RemoteVariant>>;

    async fn bulk_update_variants(
        &self,
        product_remote_id: &str,
        updates: &[VariantUpdate],
    ) -> SyncResult<()>;

    async fn activate_inventory_tracking(
        &self,
        inventory_item_id: &str,
        location_id: &str,
    ) -> SyncResult<()>;

    async fn set_inventory_on_hand(
        &self,
        inventory_item_id: &str,
        location_id: &str,
        quantity: i32,
    ) -> SyncResult<()>;

    /// Write up to [`METAFIELDS_PER_CALL`] metafields on one owner.
    /// Larger sets are the caller's chunking problem.
    async fn set_metafields(&self, owner_id: &str, metafields: &[Metafield]) -> SyncResult<()>;

    /// Find an automatic discount previously created with `external_ref`.
    async fn find_discount_by_ref(&self, external_ref: &str) -> SyncResult<Option<String>>;

    async fn create_automatic_discount(
        &self,
        spec: &DiscountSpec,
        variant_ids: &[String],
    ) -> SyncResult<String>;

    /// Update dates/percent of an existing automatic discount in place.
    async fn update_automatic_discount(
        &self,
        discount_remote_id: &str,
        spec: &DiscountSpec,
    ) -> SyncResult<()>;

    /// All collections as `(normalized name, id)` pairs; the pipeline's
    /// cache warm-up.
    async fn list_collections(&self) -> SyncResult<Vec<(String, String)>>;

    /// Create the collection if it does not exist; idempotent by name.
    async fn ensure_collection(&self, name: &str) -> SyncResult<String>;

    async fn add_products_to_collection(
        &self,
        collection_id: &str,
        product_ids: &[String],
    ) -> SyncResult<()>;

    async fn fetch_order_by_id(&self, id: &str) -> SyncResult<CommerceOrder>;
}
