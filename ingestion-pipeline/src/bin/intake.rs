use anyhow::Result;
use ingestion_pipeline::{config::AppConfig, ingest, observability};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let summary = ingest::intake(&cfg).await?;

    tracing::info!(
        admitted = summary.admitted.len(),
        quarantined = summary.quarantined.len(),
        skipped = summary.skipped.len(),
        "intake finished"
    );
    Ok(())
}
