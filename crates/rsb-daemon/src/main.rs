//! rsb-daemon entry point.
//!
//! This file is intentionally thin: it loads the environment, sets up
//! tracing and the Prometheus recorder, builds the service context, and
//! hands control to the scheduler. SIGINT/SIGTERM cancel the shutdown
//! token; the in-flight run checkpoints and releases its lock before exit.
//!
//! `rsb-daemon ingest-order <id-or-name>` runs a single order ingestion and
//! prints the structured outcome — the operator-facing entry for the flow
//! that normally arrives through the web-hook surface.

use std::sync::Arc;

use anyhow::{Context, Result};
use rsb_catalog::TaxonomyResolver;
use rsb_checkpoint::{ProgressCheckpointStore, RunHistoryStore, UpdateCheckpointStore};
use rsb_clock::SystemClock;
use rsb_commerce::HttpCommerceClient;
use rsb_config::Settings;
use rsb_limiter::{RateLimiter, RetryPolicy};
use rsb_lock::{LockStore, NullLockStore, RedisLockStore};
use rsb_rms::PgRmsRepository;
use rsb_runtime::{ChangeDetector, OrderIngestPipeline, Scheduler, SyncContext};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::dotenv();

    init_tracing();
    init_metrics();

    let settings = Settings::from_env().context("loading configuration")?;
    let shutdown = CancellationToken::new();
    let ctx = build_context(settings, shutdown.clone()).await?;

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("ingest-order") => {
            let order_ref = args
                .next()
                .context("usage: rsb-daemon ingest-order <id-or-name>")?;
            let pipeline = OrderIngestPipeline::new(ctx);
            let outcome = pipeline.ingest(&order_ref).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            return Ok(());
        }
        Some(other) => {
            anyhow::bail!("unknown subcommand '{other}' (expected: ingest-order)");
        }
        None => {}
    }

    let detector = Arc::new(ChangeDetector::new(Arc::clone(&ctx)));
    let scheduler = Scheduler::new(Arc::clone(&ctx), detector);

    info!("rsb-daemon started");
    let run = tokio::spawn(async move { scheduler.run().await });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining");
    shutdown.cancel();
    run.await.context("scheduler task panicked")?;
    info!("rsb-daemon stopped");

    Ok(())
}

async fn build_context(
    settings: Settings,
    shutdown: CancellationToken,
) -> Result<Arc<SyncContext>> {
    let rms = PgRmsRepository::connect(&settings.rms_db)
        .await
        .context("connecting to RMS database")?;

    let limiter = Arc::new(RateLimiter::new(settings.commerce.rate_limit_per_second));
    let commerce = HttpCommerceClient::new(
        &settings.commerce,
        settings.sync.call_timeout,
        limiter,
        RetryPolicy::default(),
        shutdown.clone(),
    )
    .context("building commerce client")?;

    let lock_store: Arc<dyn LockStore> = if settings.lock.enabled {
        Arc::new(
            RedisLockStore::connect(&settings.lock.redis_url)
                .await
                .context("connecting to lock store")?,
        )
    } else {
        Arc::new(NullLockStore)
    };

    let checkpoint_dir = settings.checkpoint.file_path.clone();
    Ok(Arc::new(SyncContext {
        clock: Arc::new(SystemClock),
        rms: Arc::new(rms),
        commerce: Arc::new(commerce),
        lock_store,
        taxonomy: Arc::new(TaxonomyResolver::new()),
        update_checkpoint: Arc::new(UpdateCheckpointStore::new(
            &checkpoint_dir,
            settings.checkpoint.success_threshold,
            settings.checkpoint.default_days,
        )),
        progress: Arc::new(ProgressCheckpointStore::new(&checkpoint_dir)),
        history: Arc::new(RunHistoryStore::new(&checkpoint_dir)),
        settings,
        shutdown,
    }))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Prometheus recorder on the default scrape port; a failure here only
/// costs metrics, never the sync.
fn init_metrics() {
    if let Err(err) = metrics_exporter_prometheus::PrometheusBuilder::new().install() {
        tracing::warn!(error = %err, "prometheus exporter not installed");
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
