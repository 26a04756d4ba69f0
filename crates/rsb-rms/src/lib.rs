//! Typed access to RMS entities.
//!
//! The engine reads `View_Items` and writes `Order`/`OrderEntry`/`Customer`;
//! it never owns the schema (RMS does) and never builds SQL from strings —
//! every query is parameterised.
//!
//! [`RmsRepository`] is the seam the pipelines talk to; [`PgRmsRepository`]
//! is the production implementation over a bounded, pre-checked connection
//! pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rsb_schemas::{CustomerDraft, ItemRow, OrderHeader, OrderLine, SyncResult};

mod pg;

pub use pg::PgRmsRepository;

/// Row filters for `fetch_item_rows`.
#[derive(Debug, Clone, Default)]
pub struct FetchFilter {
    /// When false, rows with zero on-hand quantity are excluded.
    pub include_zero_stock: bool,
    pub categoria: Option<String>,
    pub familia: Option<String>,
}

#[async_trait]
pub trait RmsRepository: Send + Sync {
    /// Item ids whose `LastUpdated` is strictly after `since`, ascending,
    /// capped at `limit`. Rows with a null `LastUpdated` never appear.
    async fn modified_items(&self, since: DateTime<Utc>, limit: i64) -> SyncResult<Vec<i64>>;

    /// Full `View_Items` rows for `ids`, subject to `filter`.
    async fn fetch_item_rows(&self, ids: &[i64], filter: &FetchFilter)
        -> SyncResult<Vec<ItemRow>>;

    async fn lookup_item_id_by_sku(&self, sku: &str) -> SyncResult<Option<i64>>;

    async fn find_customer_by_email(&self, email: &str) -> SyncResult<Option<i64>>;

    async fn create_customer(&self, draft: &CustomerDraft) -> SyncResult<i64>;

    /// Insert header + all lines in one transaction; any line failure rolls
    /// the whole order back. Returns the new RMS order id.
    async fn insert_order_tx(&self, header: &OrderHeader, lines: &[OrderLine])
        -> SyncResult<i64>;

    /// Whether an online-channel order with this reference already exists.
    async fn has_order_by_reference(&self, reference: &str) -> SyncResult<bool>;
}
