use anyhow::Result;
use ingestion_pipeline::{config::AppConfig, ingest, observability};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let summary = ingest::build(&cfg).await?;

    tracing::info!(
        sites = summary.sites.len(),
        system_rows = summary.system_rows,
        files_merged = summary.files_merged,
        files_cached = summary.files_cached,
        files_failed = summary.files_failed,
        overlap_rows = summary.overlap_rows,
        duplicate_rows = summary.duplicate_rows,
        "profile build finished"
    );
    Ok(())
}
