use anyhow::{Context, Result};
use chrono::Local;
use tax_bracket_ingest::{
    config::IngestConfig,
    fetch::{self, INITIAL_BACKOFF_MS, MAX_RETRIES},
    logging, pipeline,
    store::Backend,
};
use tokio::time::Instant;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let _log_guard = logging::init();
    info!("startup");

    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    let started = Instant::now();
    if let Err(e) = ingest().await {
        error!(error = ?e, elapsed_ms = started.elapsed().as_millis() as u64, "ingest failed");
        return Err(e);
    }
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "ingest complete");
    Ok(())
}

async fn ingest() -> Result<()> {
    // ─── 2) configuration ────────────────────────────────────────────
    let config = IngestConfig::from_env().context("loading configuration from environment")?;
    info!(
        source_url = %config.source_url,
        history = ?config.history,
        dry_run = config.dry_run,
        backend = config.backend_url.is_some(),
        "starting ingest"
    );

    // ─── 3) fetch the source page ────────────────────────────────────
    let client = fetch::build_client().context("building HTTP client")?;
    let html = fetch::fetch_page(&client, &config.source_url, MAX_RETRIES, INITIAL_BACKOFF_MS)
        .await
        .with_context(|| format!("fetching {}", config.source_url))?;
    info!(bytes = html.len(), "fetched source page");

    // ─── 4) extract, reshape, reconcile, push, store ─────────────────
    let store = Backend::connect(&config.history).await;
    let today = Local::now().date_naive();
    let summary = pipeline::run(&config, &html, &store, &client, today)
        .await
        .context("running ingest pipeline")?;

    let summary_json = serde_json::to_string(&summary).context("serializing run summary")?;
    info!(summary = %summary_json, "run summary");
    Ok(())
}
