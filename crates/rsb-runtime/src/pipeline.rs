//! The product sync pipeline.
//!
//! Per product the steps are: prepare → upsert product → reconcile variants
//! → inventory → metafields → discount → collections → record progress.
//! Ordering within a product is strict up to variants, and nothing after the
//! variant step runs if it failed; trailing steps (inventory, metafields,
//! discount, collections) degrade the product to `partial` instead of
//! failing it.
//!
//! Batching: products are processed in batches of K with at most P batches
//! in flight; inside a batch products are sequential. Progress is
//! checkpointed every N processed products.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rsb_catalog::{group_rows, taxonomy::TaxonomyResolution};
use rsb_clock::Clock as _;
use rsb_commerce::{CommerceClient, ProductPatch, VariantUpdate, METAFIELDS_PER_CALL};
use rsb_schemas::{
    DiscountSpec, ErrorSample, ItemRow, Location, Metafield, Product, ProductKind,
    ProductOutcome, ProgressCheckpoint, RemoteProduct, RemoteVariant, RunSummary, SkipReason,
    SyncError, SyncStats, Variant,
};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::SyncContext;
use crate::metrics;

/// Minimum variant discount that makes a product discount-eligible.
const DISCOUNT_ELIGIBLE_MIN: &str = "0.05";

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub sync_id: Uuid,
    /// Full-sync semantics: create zero-stock products and rewrite
    /// everything, skipping the unchanged check.
    pub force_create: bool,
    /// Resume cursor: products with key lexically <= this are skipped.
    pub resume_after: Option<String>,
}

impl RunOptions {
    pub fn incremental(sync_id: Uuid) -> Self {
        Self {
            sync_id,
            force_create: false,
            resume_after: None,
        }
    }

    pub fn full(sync_id: Uuid) -> Self {
        Self {
            sync_id,
            force_create: true,
            resume_after: None,
        }
    }
}

/// Mutable run-wide state shared by the in-flight batches.
struct RunState {
    stats: SyncStats,
    samples: Vec<ErrorSample>,
    last_ccod: String,
    since_save: u64,
    max_last_updated: Option<DateTime<Utc>>,
    fatal: Option<SyncError>,
}

/// Per-product result handed back to the batch loop.
struct ProductReport {
    outcome: ProductOutcome,
    inventory_updated: u64,
    inventory_failed: u64,
    sample: Option<SyncError>,
}

/// Caches shared across one run.
struct RunCaches {
    /// normalized collection name → remote collection id
    collections: Mutex<HashMap<String, String>>,
    location: Mutex<Option<Location>>,
}

pub struct ProductSyncPipeline {
    ctx: Arc<SyncContext>,
}

impl ProductSyncPipeline {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Run the pipeline over a set of item rows. Always returns a summary;
    /// per-product failures are aggregated, never raised.
    pub async fn run(
        &self,
        rows: Vec<ItemRow>,
        opts: RunOptions,
        cancel: CancellationToken,
    ) -> RunSummary {
        let ctx = &self.ctx;
        let started = ctx.clock.now_utc();
        let start_instant = ctx.clock.monotonic();
        let now = started;

        let grouping = group_rows(&rows, now);
        for w in &grouping.warnings {
            warn!(?w, "grouping warning");
        }

        let mut products = grouping.products;
        if let Some(resume) = &opts.resume_after {
            let before = products.len();
            products.retain(|p| p.key.as_str() > resume.as_str());
            info!(
                skipped = before - products.len(),
                resume_after = %resume,
                "resuming from progress checkpoint"
            );
        }
        let total = products.len() as u64;

        let caches = Arc::new(RunCaches {
            collections: Mutex::new(self.warm_collections().await),
            location: Mutex::new(None),
        });

        let state = Arc::new(Mutex::new(RunState {
            stats: SyncStats::default(),
            samples: Vec::new(),
            last_ccod: opts.resume_after.clone().unwrap_or_default(),
            since_save: 0,
            max_last_updated: rows.iter().map(|r| r.last_updated).max(),
            fatal: None,
        }));

        let batch_size = ctx.settings.sync.batch_size;
        let semaphore = Arc::new(Semaphore::new(ctx.settings.sync.max_concurrent_jobs));
        let mut join_set: JoinSet<()> = JoinSet::new();

        let batches: Vec<Vec<Product>> = products
            .chunks(batch_size.max(1))
            .map(|c| c.to_vec())
            .collect();

        for (batch_number, batch) in batches.into_iter().enumerate() {
            let ctx = Arc::clone(&self.ctx);
            let caches = Arc::clone(&caches);
            let state = Arc::clone(&state);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let opts = opts.clone();

            join_set.spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(p) => p,
                    Err(_) => return,
                };
                for product in batch {
                    if cancel.is_cancelled() || state.lock().await.fatal.is_some() {
                        record_outcome(
                            &state,
                            &ctx,
                            &opts,
                            &product,
                            total,
                            batch_number as u64,
                            ProductReport {
                                outcome: ProductOutcome::Cancelled,
                                inventory_updated: 0,
                                inventory_failed: 0,
                                sample: None,
                            },
                        )
                        .await;
                        continue;
                    }

                    let report = match tokio::time::timeout(
                        ctx.settings.sync.product_timeout,
                        process_product(&ctx, &caches, &product, &opts, &cancel),
                    )
                    .await
                    {
                        Ok(report) => report,
                        Err(_) => ProductReport {
                            outcome: ProductOutcome::Error,
                            inventory_updated: 0,
                            inventory_failed: 0,
                            sample: Some(SyncError::transient(
                                "product_timeout",
                                format!("product {} exceeded its time budget", product.key),
                            )),
                        },
                    };

                    record_outcome(
                        &state,
                        &ctx,
                        &opts,
                        &product,
                        total,
                        batch_number as u64,
                        report,
                    )
                    .await;
                }
            });
        }

        while join_set.join_next().await.is_some() {}

        let finished = ctx.clock.now_utc();
        let state = state.lock().await;
        let summary = RunSummary {
            sync_id: opts.sync_id,
            started_at: started,
            finished_at: finished,
            stats: state.stats,
            success_rate: state.stats.success_ratio(),
            duration_ms: start_instant.elapsed().as_millis() as u64,
            max_last_updated: state.max_last_updated,
            error_samples: state.samples.clone(),
            cancelled: cancel.is_cancelled(),
        };
        metrics::record_run(&summary);
        info!(
            sync_id = %summary.sync_id,
            processed = summary.stats.processed,
            created = summary.stats.created,
            updated = summary.stats.updated,
            skipped = summary.stats.skipped,
            errors = summary.stats.errors,
            success_rate = summary.success_rate,
            cancelled = summary.cancelled,
            "product sync run finished"
        );
        summary
    }

    /// Pre-load the collection name → id map; failures degrade to an empty
    /// cache and per-product `ensure_collection` calls.
    async fn warm_collections(&self) -> HashMap<String, String> {
        match self.ctx.commerce.list_collections().await {
            Ok(pairs) => pairs
                .into_iter()
                .map(|(name, id)| (normalize_collection(&name), id))
                .collect(),
            Err(err) => {
                warn!(error = %err, "collection warm-up failed, continuing cold");
                HashMap::new()
            }
        }
    }
}

async fn record_outcome(
    state: &Arc<Mutex<RunState>>,
    ctx: &Arc<SyncContext>,
    opts: &RunOptions,
    product: &Product,
    total: u64,
    batch_number: u64,
    report: ProductReport,
) {
    metrics::record_product(&report.outcome);

    let mut st = state.lock().await;
    st.stats.record(&report.outcome);
    st.stats.inventory_updated += report.inventory_updated;
    st.stats.inventory_failed += report.inventory_failed;

    if let Some(err) = &report.sample {
        if err.is_fatal_for_run() && st.fatal.is_none() {
            st.fatal = Some(err.clone());
        }
        if st.samples.len() < RunSummary::MAX_ERROR_SAMPLES {
            st.samples.push(ErrorSample::from_error(&product.key, err));
        }
    }

    // A cancelled product was not completed; the resume cursor must not
    // move past it.
    if report.outcome != ProductOutcome::Cancelled && product.key > st.last_ccod {
        st.last_ccod = product.key.clone();
    }
    st.since_save += 1;

    if st.since_save >= ctx.settings.sync.checkpoint_interval {
        st.since_save = 0;
        let cp = ProgressCheckpoint {
            sync_id: opts.sync_id,
            timestamp: ctx.clock.now_utc(),
            last_processed_ccod: st.last_ccod.clone(),
            processed_count: st.stats.processed,
            total_count: total,
            batch_number,
            stats: st.stats,
        };
        if let Err(err) = ctx.progress.save(&cp) {
            warn!(error = %err, "progress checkpoint save failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Per-product processing (steps A..I)
// ---------------------------------------------------------------------------

async fn process_product(
    ctx: &Arc<SyncContext>,
    caches: &Arc<RunCaches>,
    product: &Product,
    opts: &RunOptions,
    cancel: &CancellationToken,
) -> ProductReport {
    let mut product = product.clone();

    // A. Prepare: taxonomy, metafields, discount spec.
    let resolution = ctx.taxonomy.resolve(
        &product.vendor,
        &product.product_type,
        product.attributes.raw_str("extended_category").unwrap_or(""),
    );
    apply_resolution(&mut product, &resolution);
    product.metafields = compose_metafields(&product);
    product.discount = discount_spec(&product);

    if product.variants.is_empty() {
        return skip(SkipReason::Empty);
    }
    if cancel.is_cancelled() {
        return cancelled();
    }

    // B. Upsert product.
    let remote = match ctx.commerce.fetch_product_by_handle(&product.handle).await {
        Ok(r) => r,
        Err(err) => return error(err),
    };

    let mut created = false;
    let mut catalog_unchanged = false;
    let (remote_id, remote_variants): (String, Vec<RemoteVariant>) = match remote {
        None => {
            if !opts.force_create && product.total_stock() <= 0 {
                return skip(SkipReason::ZeroStock);
            }
            match ctx.commerce.create_product(&product).await {
                Ok(id) => {
                    created = true;
                    (id, Vec::new())
                }
                Err(err) => return error(err),
            }
        }
        Some(existing) => {
            if !opts.force_create && !product_differs(&product, &existing) {
                catalog_unchanged = true;
            } else if let Err(err) = ctx
                .commerce
                .update_product(&existing.id, &patch_for(&product))
                .await
            {
                return error(err);
            }
            (existing.id.clone(), existing.variants)
        }
    };

    if cancel.is_cancelled() {
        return cancelled();
    }

    // C. Reconcile variants by (option1, option2). Sale pricing is already
    // baked into the variant set. Deletions are out of scope: zero-quantity
    // variants stay for history.
    let diff = diff_variants(&product.variants, &remote_variants);
    let mut inventory_ids = diff.inventory_ids.clone();
    let mut discount_variant_ids: Vec<String> =
        remote_variants.iter().map(|v| v.id.clone()).collect();

    if !catalog_unchanged {
        if !diff.to_create.is_empty() {
            match ctx
                .commerce
                .bulk_create_variants(&remote_id, &diff.to_create)
                .await
            {
                Ok(created_variants) => {
                    for rv in created_variants {
                        inventory_ids.insert(rv.sku.clone(), rv.inventory_item_id);
                        discount_variant_ids.push(rv.id);
                    }
                }
                Err(err) => return error(err),
            }
        }
        if !diff.to_update.is_empty() {
            if let Err(err) = ctx
                .commerce
                .bulk_update_variants(&remote_id, &diff.to_update)
                .await
            {
                return error(err);
            }
        }
    }

    // Trailing steps: failures degrade to partial, never abort the product.
    let mut trailing_failed = false;
    let mut sample: Option<SyncError> = None;

    // D. Inventory on the primary location.
    let mut inventory_updated = 0u64;
    let mut inventory_failed = 0u64;
    match primary_location(ctx, caches).await {
        Ok(location) => {
            for variant in &product.variants {
                if cancel.is_cancelled() {
                    return cancelled();
                }
                let Some(inventory_item_id) = inventory_ids.get(&variant.sku) else {
                    // Variant was neither remote nor created this pass
                    // (earlier partial failure); count it as failed.
                    inventory_failed += 1;
                    continue;
                };
                let result = async {
                    ctx.commerce
                        .activate_inventory_tracking(inventory_item_id, &location.id)
                        .await?;
                    ctx.commerce
                        .set_inventory_on_hand(inventory_item_id, &location.id, variant.quantity)
                        .await
                }
                .await;
                match result {
                    Ok(()) => inventory_updated += 1,
                    Err(err) => {
                        inventory_failed += 1;
                        sample.get_or_insert(err);
                    }
                }
            }
        }
        Err(err) => {
            inventory_failed += product.variants.len() as u64;
            sample.get_or_insert(err);
        }
    }
    let d_ok = inventory_failed == 0;
    trailing_failed |= !d_ok;

    // E. Metafields, chunked.
    let mut e_ok = true;
    if !catalog_unchanged {
        for chunk in product.metafields.chunks(METAFIELDS_PER_CALL) {
            if cancel.is_cancelled() {
                return cancelled();
            }
            if let Err(err) = ctx.commerce.set_metafields(&remote_id, chunk).await {
                e_ok = false;
                trailing_failed = true;
                sample.get_or_insert(err);
                break;
            }
        }
    }

    // A product only counts as synced when the core landed and at least one
    // of inventory/metafields reached the remote side.
    let d_any = inventory_updated > 0 || product.variants.is_empty();
    if !(d_any || e_ok) {
        return ProductReport {
            outcome: ProductOutcome::Error,
            inventory_updated,
            inventory_failed,
            sample,
        };
    }

    // H. Automatic discount, idempotent by external ref.
    if !catalog_unchanged {
        if let Some(spec) = &product.discount {
            if let Err(err) = upsert_discount(ctx, spec, &discount_variant_ids).await {
                trailing_failed = true;
                sample.get_or_insert(err);
            }
        }
    }

    // I. Collections for categoria and familia.
    if !catalog_unchanged {
        if let Err(err) = attach_collections(ctx, caches, &product, &remote_id).await {
            trailing_failed = true;
            sample.get_or_insert(err);
        }
    }

    let outcome = if created {
        if trailing_failed {
            ProductOutcome::Partial
        } else {
            ProductOutcome::Created
        }
    } else if catalog_unchanged && !trailing_failed {
        ProductOutcome::Skipped(SkipReason::Unchanged)
    } else if trailing_failed {
        ProductOutcome::Partial
    } else {
        ProductOutcome::Updated
    };

    ProductReport {
        outcome,
        inventory_updated,
        inventory_failed,
        sample,
    }
}

fn skip(reason: SkipReason) -> ProductReport {
    ProductReport {
        outcome: ProductOutcome::Skipped(reason),
        inventory_updated: 0,
        inventory_failed: 0,
        sample: None,
    }
}

fn cancelled() -> ProductReport {
    ProductReport {
        outcome: ProductOutcome::Cancelled,
        inventory_updated: 0,
        inventory_failed: 0,
        sample: None,
    }
}

fn error(err: SyncError) -> ProductReport {
    ProductReport {
        outcome: ProductOutcome::Error,
        inventory_updated: 0,
        inventory_failed: 0,
        sample: Some(err),
    }
}

async fn primary_location(
    ctx: &Arc<SyncContext>,
    caches: &Arc<RunCaches>,
) -> Result<Location, SyncError> {
    let mut cached = caches.location.lock().await;
    if let Some(location) = cached.as_ref() {
        return Ok(location.clone());
    }
    let location = ctx.commerce.primary_location().await?;
    *cached = Some(location.clone());
    Ok(location)
}

async fn upsert_discount(
    ctx: &Arc<SyncContext>,
    spec: &DiscountSpec,
    variant_ids: &[String],
) -> Result<(), SyncError> {
    match ctx.commerce.find_discount_by_ref(&spec.external_ref).await? {
        Some(id) => ctx.commerce.update_automatic_discount(&id, spec).await,
        None => ctx
            .commerce
            .create_automatic_discount(spec, variant_ids)
            .await
            .map(|_| ()),
    }
}

async fn attach_collections(
    ctx: &Arc<SyncContext>,
    caches: &Arc<RunCaches>,
    product: &Product,
    remote_id: &str,
) -> Result<(), SyncError> {
    for key in &product.collection_keys {
        let normalized = normalize_collection(key);
        let id = {
            let cache = caches.collections.lock().await;
            cache.get(&normalized).cloned()
        };
        let id = match id {
            Some(id) => id,
            None => {
                let id = ctx.commerce.ensure_collection(key).await?;
                caches
                    .collections
                    .lock()
                    .await
                    .insert(normalized, id.clone());
                id
            }
        };
        ctx.commerce
            .add_products_to_collection(&id, &[remote_id.to_string()])
            .await?;
    }
    Ok(())
}

fn normalize_collection(name: &str) -> String {
    name.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

fn apply_resolution(product: &mut Product, resolution: &TaxonomyResolution) {
    product.taxonomy_id = Some(resolution.taxonomy_id.clone());
    product.product_type = resolution.product_type.clone();
    product.vendor = resolution.vendor.clone();
}

fn patch_for(product: &Product) -> ProductPatch {
    ProductPatch {
        title: product.title.clone(),
        vendor: product.vendor.clone(),
        product_type: product.product_type.clone(),
        taxonomy_id: product.taxonomy_id.clone(),
        status: product.status.as_str().to_string(),
    }
}

/// Observable-field comparator deciding whether an upsert is needed at all
/// (absent force). Inventory quantities are not observable on the product
/// fetch and are therefore always written in step D, even for unchanged
/// products.
fn product_differs(ours: &Product, remote: &RemoteProduct) -> bool {
    if ours.title != remote.title
        || ours.vendor != remote.vendor
        || ours.product_type != remote.product_type
        || ours.status.as_str() != remote.status
    {
        return true;
    }
    for variant in &ours.variants {
        match remote.variant_by_options(&variant.option1, &variant.option2) {
            None => return true,
            Some(rv) => {
                if rv.sku != variant.sku
                    || rv.price != variant.price
                    || rv.compare_at_price != variant.compare_at_price
                {
                    return true;
                }
            }
        }
    }
    false
}

struct VariantDiff {
    to_create: Vec<Variant>,
    to_update: Vec<VariantUpdate>,
    /// sku → inventory item id, for variants already present remotely.
    inventory_ids: HashMap<String, String>,
}

/// Set difference by `(option1, option2)`: create what is missing, update
/// what changed (price, compareAt, sku). Remote-only variants are left in
/// place for history.
fn diff_variants(ours: &[Variant], remote: &[RemoteVariant]) -> VariantDiff {
    let by_options: HashMap<(String, String), &RemoteVariant> = remote
        .iter()
        .map(|rv| ((rv.option1.clone(), rv.option2.clone()), rv))
        .collect();

    let mut diff = VariantDiff {
        to_create: Vec::new(),
        to_update: Vec::new(),
        inventory_ids: HashMap::new(),
    };

    for variant in ours {
        match by_options.get(&variant.option_key()) {
            None => diff.to_create.push(variant.clone()),
            Some(rv) => {
                diff.inventory_ids
                    .insert(variant.sku.clone(), rv.inventory_item_id.clone());
                if rv.price != variant.price
                    || rv.compare_at_price != variant.compare_at_price
                    || rv.sku != variant.sku
                {
                    diff.to_update.push(VariantUpdate {
                        remote_id: rv.id.clone(),
                        sku: variant.sku.clone(),
                        price: variant.price,
                        compare_at_price: variant.compare_at_price,
                    });
                }
            }
        }
    }

    diff
}

/// Product-level discount from the variant discounts: eligible when the
/// maximum variant discount reaches 5%, bounded by the union of the active
/// sale windows, keyed by the handle for idempotent re-creation.
fn discount_spec(product: &Product) -> Option<DiscountSpec> {
    let max = rsb_catalog::grouper::max_discount_percent(&product.variants)?;
    let threshold: Decimal = DISCOUNT_ELIGIBLE_MIN.parse().expect("static decimal");
    if max < threshold {
        return None;
    }
    let starts_at = product
        .variants
        .iter()
        .filter_map(|v| v.sale_starts_at)
        .min()?;
    let ends_at = product
        .variants
        .iter()
        .filter_map(|v| v.sale_ends_at)
        .max()?;
    Some(DiscountSpec {
        percent: max.round_dp(2),
        starts_at,
        ends_at,
        external_ref: format!("rms-sale-{}", product.handle),
    })
}

/// The fixed metafield set written per product. Values derive from the
/// first (deterministically ordered) variant where the source field is
/// per-row rather than per-product.
fn compose_metafields(product: &Product) -> Vec<Metafield> {
    let mut out = Vec::with_capacity(16);
    let first = product.variants.first();
    let genero = product.attributes.raw_str("genero").unwrap_or("");
    let extended = product.attributes.raw_str("extended_category").unwrap_or("");

    out.push(Metafield::text("rms", "familia", &product.vendor));
    out.push(Metafield::text("rms", "categoria", &product.product_type));
    if let Some(v) = first {
        out.push(Metafield::text("rms", "talla", &v.option2));
        if let Some(original) = &v.size_original {
            out.push(Metafield::text("rms", "talla_original", original));
        }
        out.push(Metafield::text("rms", "color", &v.option1));
        out.push(Metafield::integer("rms", "item_id", v.item_id));
    }
    out.push(Metafield::text("rms", "ccod", &product.key));
    if !extended.is_empty() {
        out.push(Metafield::text("rms", "extended_category", extended));
    }
    if !genero.is_empty() {
        out.push(Metafield::text("rms", "genero", genero));
    }
    if let Ok(attrs) = serde_json::to_value(&product.attributes) {
        out.push(Metafield::json("rms", "product_attributes", &attrs));
    }
    if let Some(spec) = &product.discount {
        out.push(Metafield::datetime("rms", "sale_start_date", spec.starts_at));
        out.push(Metafield::datetime("rms", "sale_end_date", spec.ends_at));
    }
    out.push(Metafield::text("custom", "target_gender", target_gender(genero)));
    out.push(Metafield::text("custom", "age_group", age_group(genero)));
    if product.attributes.kind() == ProductKind::Footwear {
        if let Some(size) = product.attributes.lead_size() {
            out.push(Metafield::text("custom", "shoe_size", size));
        }
    }
    out
}

fn target_gender(genero: &str) -> &'static str {
    let g = genero.to_lowercase();
    if g.contains("muj") || g.contains("dama") || g.contains("nina") || g.contains("niña") {
        "female"
    } else if g.contains("homb") || g.contains("caball") || g.contains("nino") || g.contains("niño")
    {
        "male"
    } else {
        "unisex"
    }
}

fn age_group(genero: &str) -> &'static str {
    let g = genero.to_lowercase();
    if g.contains("nin") || g.contains("niñ") || g.contains("bebe") || g.contains("kid") {
        "kids"
    } else {
        "adult"
    }
}
