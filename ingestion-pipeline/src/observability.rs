use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    // RUST_LOG still wins; default the pipeline crates to info.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ingestion_pipeline=info,profile_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
