//! Scenario harness: a full [`SyncContext`] over the in-memory fakes, a
//! manual clock, and a temp checkpoint directory.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rsb_catalog::TaxonomyResolver;
use rsb_checkpoint::{ProgressCheckpointStore, RunHistoryStore, UpdateCheckpointStore};
use rsb_clock::ManualClock;
use rsb_config::Settings;
use rsb_lock::MemoryLockStore;
use rsb_runtime::{ChangeDetector, OrderIngestPipeline, SyncContext};
use rsb_schemas::ItemRow;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

use crate::{MemoryCommerce, MemoryRms};

pub struct TestHarness {
    pub ctx: Arc<SyncContext>,
    pub rms: Arc<MemoryRms>,
    pub commerce: Arc<MemoryCommerce>,
    pub lock_store: Arc<MemoryLockStore>,
    pub clock: Arc<ManualClock>,
    pub detector: ChangeDetector,
    /// Owns the checkpoint directory for the harness lifetime.
    pub dir: tempfile::TempDir,
}

impl TestHarness {
    /// Harness anchored at `now`, with settings tuned for tests (small
    /// batches, short timeouts, checkpointing every 2 products).
    pub fn at(now: DateTime<Utc>) -> Self {
        Self::at_with(now, &[])
    }

    /// Like [`TestHarness::at`] but with extra env overrides.
    pub fn at_with(now: DateTime<Utc>, overrides: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut env = base_env(&dir);
        for (k, v) in overrides {
            env.insert((*k).into(), (*v).into());
        }
        Self::with_env(now, env, dir)
    }

    fn with_env(now: DateTime<Utc>, env: HashMap<String, String>, dir: tempfile::TempDir) -> Self {
        let settings = Settings::from_map(&env).expect("test settings");

        let rms = Arc::new(MemoryRms::new());
        let commerce = Arc::new(MemoryCommerce::new());
        let lock_store = Arc::new(MemoryLockStore::new());
        let clock = Arc::new(ManualClock::at(now));

        let checkpoint_dir = settings.checkpoint.file_path.clone();
        let ctx = Arc::new(SyncContext {
            clock: Arc::clone(&clock) as Arc<dyn rsb_clock::Clock>,
            rms: Arc::clone(&rms) as Arc<dyn rsb_rms::RmsRepository>,
            commerce: Arc::clone(&commerce) as Arc<dyn rsb_commerce::CommerceClient>,
            lock_store: Arc::clone(&lock_store) as Arc<dyn rsb_lock::LockStore>,
            taxonomy: Arc::new(TaxonomyResolver::new()),
            update_checkpoint: Arc::new(UpdateCheckpointStore::new(
                &checkpoint_dir,
                settings.checkpoint.success_threshold,
                settings.checkpoint.default_days,
            )),
            progress: Arc::new(ProgressCheckpointStore::new(&checkpoint_dir)),
            history: Arc::new(RunHistoryStore::new(&checkpoint_dir)),
            settings,
            shutdown: CancellationToken::new(),
        });

        let detector = ChangeDetector::new(Arc::clone(&ctx));

        Self {
            ctx,
            rms,
            commerce,
            lock_store,
            clock,
            detector,
            dir,
        }
    }

    pub fn order_pipeline(&self) -> OrderIngestPipeline {
        OrderIngestPipeline::new(Arc::clone(&self.ctx))
    }

    /// Convenience anchor used by most scenarios: 2025-01-15 12:00 UTC.
    pub fn default_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }
}

fn base_env(dir: &tempfile::TempDir) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = HashMap::new();
    for (k, v) in [
        ("RMS_DB_HOST", "unused"),
        ("RMS_DB_DATABASE", "unused"),
        ("RMS_DB_USER", "unused"),
        ("RMS_DB_PASSWORD", "unused"),
        ("COMMERCE_SHOP_URL", "https://shop.test"),
        ("COMMERCE_TOKEN", "test-token"),
        ("SYNC_BATCH_SIZE", "2"),
        ("SYNC_MAX_CONCURRENT_JOBS", "2"),
        ("SYNC_CHECKPOINT_INTERVAL", "2"),
        ("STORE_ID", "7"),
    ] {
        env.insert(k.into(), v.into());
    }
    env.insert(
        "CHECKPOINT_FILE_PATH".into(),
        dir.path().to_string_lossy().into_owned(),
    );
    env
}

/// One well-formed `View_Items` row; scenarios override what they need.
pub fn item_row(item_id: i64, sku: &str, ccod: &str, last_updated: DateTime<Utc>) -> ItemRow {
    ItemRow {
        item_id,
        sku: sku.into(),
        ccod: ccod.into(),
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
        last_updated,
    }
}
