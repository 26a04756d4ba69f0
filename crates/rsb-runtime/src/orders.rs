//! Commerce → RMS order ingestion.
//!
//! One order at a time: `Received → Validated → Resolved → Persisted`,
//! short-circuiting to `Rejected(reason)` or `Duplicate`. The insert is a
//! single RMS transaction; a failing line rolls the whole order back.
//!
//! Policy decisions (configurable via the order settings):
//! - a line whose SKU is unknown to RMS rejects the entire order — partial
//!   orders would desynchronize inventory
//! - lines with an empty SKU (shipping, tips) are not RMS items and are
//!   dropped from the line set, the order total is unaffected
//! - customer resolution follows the guest-order matrix: lookup by email,
//!   create, configured default id, or NULL

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use rsb_commerce::CommerceClient as _;
use rsb_rms::RmsRepository as _;
use rsb_schemas::{
    CommerceAddress, CommerceOrder, CustomerDraft, IngestOutcome, OrderHeader, OrderLine,
    RejectReason, SyncResult, ORDER_CHANNEL_ONLINE, ORDER_TYPE_SALE,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::context::SyncContext;
use crate::metrics;

const SKU_CACHE_SIZE: usize = 1024;
const LINE_DESCRIPTION_MAX: usize = 255;

pub struct OrderIngestPipeline {
    ctx: Arc<SyncContext>,
    /// SKU → RMS item id, warm across order bursts.
    sku_cache: Mutex<LruCache<String, i64>>,
}

impl OrderIngestPipeline {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self {
            ctx,
            sku_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(SKU_CACHE_SIZE).expect("non-zero cache size"),
            )),
        }
    }

    /// Ingest one commerce order by id or name. Infrastructure failures
    /// surface as errors; business rejections are an [`IngestOutcome`].
    pub async fn ingest(&self, order_ref: &str) -> SyncResult<IngestOutcome> {
        let outcome = self.ingest_inner(order_ref).await?;
        metrics::record_order(&outcome);
        match &outcome {
            IngestOutcome::Persisted { order_id } => {
                info!(order_ref, order_id, "order persisted");
            }
            IngestOutcome::Duplicate => {
                info!(order_ref, "order already ingested, skipping");
            }
            IngestOutcome::Rejected { reason } => {
                warn!(order_ref, reason = reason.code(), "order rejected");
            }
        }
        Ok(outcome)
    }

    async fn ingest_inner(&self, order_ref: &str) -> SyncResult<IngestOutcome> {
        let ctx = &self.ctx;

        // Fetch the full order first; its name is the idempotency key.
        let order = ctx.commerce.fetch_order_by_id(order_ref).await?;

        if ctx.rms.has_order_by_reference(&order.name).await? {
            return Ok(IngestOutcome::Duplicate);
        }

        // Validate.
        if let Some(reason) = validate(&order) {
            return Ok(IngestOutcome::Rejected { reason });
        }

        // Resolve customer per the guest-order policy.
        let customer_id = match self.resolve_customer(&order).await? {
            Ok(id) => id,
            Err(reason) => return Ok(IngestOutcome::Rejected { reason }),
        };

        // Resolve every line SKU; any unknown SKU rejects the whole order.
        let mut lines = Vec::new();
        let mut unknown = Vec::new();
        for item in &order.line_items {
            let sku = item.sku.trim();
            if sku.is_empty() {
                continue;
            }
            match self.lookup_sku(sku).await? {
                Some(item_id) => lines.push(OrderLine {
                    item_id,
                    description: truncate(&item.title, LINE_DESCRIPTION_MAX),
                    price: item.discounted_unit_price.amount,
                    full_price: item.original_unit_price.amount,
                    quantity: item.quantity,
                }),
                None => unknown.push(sku.to_string()),
            }
        }
        if !unknown.is_empty() {
            return Ok(IngestOutcome::Rejected {
                reason: RejectReason::UnknownSku { skus: unknown },
            });
        }

        let header = build_header(&order, customer_id, ctx.settings.orders.store_id);

        let order_id = ctx.rms.insert_order_tx(&header, &lines).await?;
        Ok(IngestOutcome::Persisted { order_id })
    }

    async fn lookup_sku(&self, sku: &str) -> SyncResult<Option<i64>> {
        if let Some(id) = self.sku_cache.lock().await.get(sku).copied() {
            return Ok(Some(id));
        }
        let found = self.ctx.rms.lookup_item_id_by_sku(sku).await?;
        if let Some(id) = found {
            self.sku_cache.lock().await.put(sku.to_string(), id);
        }
        Ok(found)
    }

    /// Customer id for the order header, or the rejection that stops it.
    async fn resolve_customer(
        &self,
        order: &CommerceOrder,
    ) -> SyncResult<Result<Option<i64>, RejectReason>> {
        let policy = &self.ctx.settings.orders;

        let email = order
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty());

        let Some(email) = email else {
            if policy.require_customer_email {
                return Ok(Err(RejectReason::MissingEmail));
            }
            if let Some(default_id) = policy.default_customer_id_for_guest_orders {
                return Ok(Ok(Some(default_id)));
            }
            if policy.allow_orders_without_customer {
                return Ok(Ok(None));
            }
            return Ok(Err(RejectReason::MissingEmail));
        };

        if let Some(id) = self.ctx.rms.find_customer_by_email(email).await? {
            return Ok(Ok(Some(id)));
        }

        let (first_name, last_name) = customer_names(order, &policy.guest_customer_name);
        let id = self
            .ctx
            .rms
            .create_customer(&CustomerDraft {
                first_name,
                last_name,
                email: Some(email.to_string()),
                phone: order
                    .shipping_address
                    .as_ref()
                    .map(|a| a.phone.clone())
                    .filter(|p| !p.is_empty()),
            })
            .await?;
        Ok(Ok(Some(id)))
    }
}

fn validate(order: &CommerceOrder) -> Option<RejectReason> {
    if !order.is_paid_enough() {
        return Some(RejectReason::NotPaid {
            status: order.financial_status.clone(),
        });
    }
    let has_sku_line = order.line_items.iter().any(|l| !l.sku.trim().is_empty());
    if !has_sku_line || order.total_price.amount <= rust_decimal::Decimal::ZERO {
        return Some(RejectReason::EmptyOrder);
    }
    None
}

fn build_header(order: &CommerceOrder, customer_id: Option<i64>, store_id: i32) -> OrderHeader {
    OrderHeader {
        store_id,
        order_type: ORDER_TYPE_SALE,
        time: order.created_at,
        customer_id,
        total: order.total_price.amount,
        tax: order.total_tax.amount,
        comment: format!(
            "Shopify Order {} - {}",
            display_name(&order.name),
            order.financial_status
        ),
        shipping_notes: order
            .shipping_address
            .as_ref()
            .map(format_address)
            .unwrap_or_default(),
        channel_type: ORDER_CHANNEL_ONLINE,
        reference_number: order.name.clone(),
    }
}

/// Order names usually arrive with their `#` prefix; add one if missing so
/// comments read uniformly.
fn display_name(name: &str) -> String {
    if name.starts_with('#') {
        name.to_string()
    } else {
        format!("#{name}")
    }
}

/// Multi-line shipping note: name / street / city-province-zip / country /
/// phone, skipping empty parts.
fn format_address(addr: &CommerceAddress) -> String {
    let mut lines: Vec<String> = Vec::new();
    if !addr.name.is_empty() {
        lines.push(addr.name.clone());
    }
    let street = [addr.address1.as_str(), addr.address2.as_str()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    if !street.is_empty() {
        lines.push(street);
    }
    let locality = [addr.city.as_str(), addr.province.as_str(), addr.zip.as_str()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    if !locality.is_empty() {
        lines.push(locality);
    }
    if !addr.country.is_empty() {
        lines.push(addr.country.clone());
    }
    if !addr.phone.is_empty() {
        lines.push(format!("Tel: {}", addr.phone));
    }
    lines.join("\n")
}

fn customer_names(order: &CommerceOrder, guest_name: &str) -> (String, String) {
    let first = order.customer_first_name.trim();
    let last = order.customer_last_name.trim();
    if !first.is_empty() || !last.is_empty() {
        return (first.to_string(), last.to_string());
    }
    // Guest checkout: split the configured guest name.
    match guest_name.split_once(' ') {
        Some((f, l)) => (f.to_string(), l.to_string()),
        None => (guest_name.to_string(), String::new()),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
