use std::{env, path::PathBuf};

use anyhow::{anyhow, bail, Result};
use ingestion_pipeline::{
    config::{AppConfig, DemandFactorChoice},
    ingest, observability,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!(
            "usage: analyze_profile <csv_path> [--transformer-kva <rating>] \
             [--connected-load-scale <factor>]"
        );
    }
    let input = PathBuf::from(&args[1]);

    let mut cfg = AppConfig::load()?;
    let mut transformer_kva = None;
    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--transformer-kva" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--transformer-kva needs a value"))?;
                transformer_kva = Some(value.parse()?);
                i += 2;
            }
            "--connected-load-scale" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--connected-load-scale needs a value"))?;
                cfg.analysis.connected_load_scale = value.parse()?;
                cfg.analysis.demand_factor = DemandFactorChoice::ScaledEstimate;
                i += 2;
            }
            other => bail!("unknown argument '{other}'"),
        }
    }

    let output = ingest::analyze(&cfg, &input, transformer_kva).await?;
    print!("{}", output.text);

    tracing::info!(
        series = %output.series_csv.display(),
        report = %output.report_txt.display(),
        factors = %output.factors_json.display(),
        "analysis written"
    );
    Ok(())
}
