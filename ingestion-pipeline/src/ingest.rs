use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context};
use futures::future::join_all;
use profile_core::analysis::{capacity, factors, resample};
use profile_core::domain::{
    CapacityDistribution, FactorReport, LoadSeries, Reading, RegisterRead, SitePower,
};
use time::{OffsetDateTime, PrimitiveDateTime};
use walkdir::WalkDir;

use crate::config::AppConfig;
use crate::dedup::{self, HashCache, RowClass, RowLedger};
use crate::logs::{IntakeLog, RunLogs};
use crate::pipeline::{Pipeline, PipelineError};
use crate::report::{self, DatasetMeta};
use crate::sequence;
use crate::sources::{IntervalCsvFileSource, RegisterCsvFileSource};
use crate::transform::{ReadingValidation, RegisterReadValidation};

fn has_csv_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
}

fn move_file(src: &Path, dest: &Path) -> io::Result<()> {
    // Rename can cross devices; fall back to copy-and-remove.
    if fs::rename(src, dest).is_err() {
        fs::copy(src, dest)?;
        fs::remove_file(src)?;
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct IntakeSummary {
    pub admitted: Vec<PathBuf>,
    pub quarantined: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Validate every export sitting in the dropbox: sequence-clean files move
/// into the data tree under their starting month, violators move to
/// quarantine with a diagnostic, unreadable files stay put for the next run.
pub async fn intake(cfg: &AppConfig) -> anyhow::Result<IntakeSummary> {
    let mut log = IntakeLog::open(&cfg.ingest.log_dir)?;
    let mut summary = IntakeSummary::default();

    let entries = fs::read_dir(&cfg.ingest.dropbox_dir).with_context(|| {
        format!(
            "dropbox directory {} is not readable",
            cfg.ingest.dropbox_dir.display()
        )
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_csv_extension(p))
        .collect();
    files.sort();

    for path in files {
        let pipeline: Pipeline<_, RegisterRead> = Pipeline {
            source: RegisterCsvFileSource::new(&path),
            transforms: vec![Arc::new(RegisterReadValidation)],
            max_dropped: cfg.ingest.max_dropped_rows,
        };
        let batch = match pipeline.run().await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "intake could not parse file");
                log.skipped(&path, &e.to_string())?;
                summary.skipped.push(path);
                continue;
            }
        };
        if batch.rows.is_empty() {
            tracing::warn!(path = %path.display(), "no valid data rows");
            log.skipped(&path, "no valid data rows")?;
            summary.skipped.push(path);
            continue;
        }

        if let Err(violation) = sequence::check(&batch) {
            let dest = sequence::quarantine(&path, &cfg.ingest.quarantine_dir)?;
            tracing::error!(
                error = %violation.to_error(&path),
                moved_to = %dest.display(),
                "file quarantined"
            );
            log.quarantined(&path, &violation, &dest)?;
            summary.quarantined.push(dest);
            continue;
        }

        let first = batch.rows[0].payload.start;
        let last = batch.rows[batch.rows.len() - 1].payload.end;
        let month_dir = cfg.ingest.data_root.join(format!(
            "{:04}-{:02}",
            first.year(),
            u8::from(first.month())
        ));
        fs::create_dir_all(&month_dir)?;
        let Some(name) = path.file_name() else {
            continue;
        };
        let dest = month_dir.join(name);
        move_file(&path, &dest)?;
        tracing::info!(path = %path.display(), dest = %dest.display(), "file admitted");
        log.admitted(&path, &dest, first, last)?;
        summary.admitted.push(dest);
    }

    Ok(summary)
}

#[derive(Debug)]
pub struct SiteBuild {
    pub name: String,
    pub rows: usize,
    pub output: PathBuf,
}

#[derive(Debug, Default)]
pub struct BuildSummary {
    pub sites: Vec<SiteBuild>,
    pub system_rows: usize,
    pub overlap_rows: usize,
    pub duplicate_rows: usize,
    pub files_merged: usize,
    pub files_cached: usize,
    pub files_failed: usize,
}

/// Merge every admitted register export into per-site net-power profiles
/// and the system-wide series. Re-running over unchanged inputs is a no-op
/// in the outputs, the cache and the logs.
pub async fn build(cfg: &AppConfig) -> anyhow::Result<BuildSummary> {
    if cfg.sites.is_empty() {
        bail!("no sites configured; nothing to merge");
    }
    let mut logs = RunLogs::create(&cfg.ingest.log_dir)?;
    let mut cache = HashCache::load_or_empty(&cfg.ingest.hash_cache)?;

    let outcome = build_inner(cfg, &mut cache, &mut logs).await;

    // The cache persists on every exit path; anything recorded in it has
    // been fully merged even if a later stage failed.
    if let Err(e) = cache.persist() {
        tracing::error!(error = %e, "failed to persist hash cache");
        if outcome.is_ok() {
            return Err(e.into());
        }
    }
    outcome
}

async fn build_inner(
    cfg: &AppConfig,
    cache: &mut HashCache,
    logs: &mut RunLogs,
) -> anyhow::Result<BuildSummary> {
    let mut files: Vec<(PathBuf, String)> = Vec::new();
    for entry in WalkDir::new(&cfg.ingest.data_root)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if !entry.file_type().is_file()
            || !has_csv_extension(path)
            || path.starts_with(&cfg.ingest.quarantine_dir)
        {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match cfg.site_for_file(name) {
            Some(site) => files.push((path.to_path_buf(), site.name.clone())),
            None => tracing::debug!(path = %path.display(), "no site match; ignored"),
        }
    }
    files.sort();

    // Parsing and digesting fan out per file; the merge below stays
    // single-threaded because the ledger and the cache have one owner.
    let parsed = join_all(files.into_iter().map(|(path, site_name)| async move {
        let outcome = async {
            let digest = dedup::file_digest(&path).map_err(|e| PipelineError::Io {
                path: path.clone(),
                source: e,
            })?;
            let pipeline: Pipeline<_, RegisterRead> = Pipeline {
                source: RegisterCsvFileSource::new(&path),
                transforms: vec![Arc::new(RegisterReadValidation)],
                max_dropped: cfg.ingest.max_dropped_rows,
            };
            let batch = pipeline.run().await?;
            Ok::<_, PipelineError>((digest, batch))
        }
        .await;
        (path, site_name, outcome)
    }))
    .await;

    let mut summary = BuildSummary::default();
    let mut ledger: RowLedger<RegisterRead> = RowLedger::new();

    for (path, site_name, outcome) in parsed {
        let (digest, batch) = match outcome {
            Ok(v) => v,
            Err(e) => {
                // Not recorded in the cache, so the next run retries it.
                logs.error(&format!("{},FAILED TO PARSE FILE: {e}", path.display()))?;
                tracing::error!(path = %path.display(), error = %e, "file excluded from merge");
                summary.files_failed += 1;
                continue;
            }
        };

        if cache.contains(&digest) {
            tracing::info!(path = %path.display(), "already processed; merging rows idempotently");
            metrics::counter!("hash_cache_hits_total").increment(1);
            summary.files_cached += 1;
        } else {
            summary.files_merged += 1;
        }

        for env in batch.rows {
            let ts = env.payload.start;
            if let Some((class, rejected)) = ledger.insert(&site_name, ts, env) {
                match class {
                    RowClass::Overlap => {
                        metrics::counter!("dedup_overlap_rows_total").increment(1);
                        summary.overlap_rows += 1;
                    }
                    RowClass::Duplicate => {
                        metrics::counter!("dedup_duplicate_rows_total").increment(1);
                        summary.duplicate_rows += 1;
                    }
                }
                logs.duplicate(&site_name, ts, &path, class, &rejected.raw)?;
            }
        }
        cache.record(digest, &path);
    }

    fs::create_dir_all(&cfg.ingest.profile_dir)?;
    let mut site_series: Vec<Vec<SitePower>> = Vec::new();
    for (site_name, envs) in ledger.into_series() {
        let Some(site) = cfg.sites.iter().find(|s| s.name == site_name) else {
            continue;
        };
        let rows: Vec<RegisterRead> = envs.into_iter().map(|e| e.payload).collect();
        let powers = resample::site_net_series(&rows, &site.scaling());
        let output = cfg.ingest.profile_dir.join(format!("{site_name}.csv"));
        report::write_site_csv(&output, &powers)?;
        tracing::info!(site = %site_name, rows = powers.len(), output = %output.display(), "site profile written");
        summary.sites.push(SiteBuild {
            name: site_name,
            rows: powers.len(),
            output,
        });
        site_series.push(powers);
    }

    let system = resample::aggregate_sites(&site_series);
    summary.system_rows = system.len();
    let system_path = cfg.ingest.profile_dir.join("system.csv");
    report::write_system_csv(&system_path, &system)?;
    tracing::info!(rows = system.len(), output = %system_path.display(), "system profile written");

    Ok(summary)
}

#[derive(Debug)]
pub struct AnalysisOutput {
    pub report: FactorReport,
    pub capacity: Option<CapacityDistribution>,
    pub series: LoadSeries,
    pub meta: DatasetMeta,
    pub text: String,
    pub series_csv: PathBuf,
    pub report_txt: PathBuf,
    pub factors_json: PathBuf,
}

fn now_utc_naive() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

fn sibling_path(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    input.with_file_name(format!("{stem}{suffix}"))
}

/// Run the single-file factor analysis: resample, derive the loading
/// ratios, optionally partition time against a transformer rating, and
/// write the series CSV, text report and structured report next to the
/// input.
pub async fn analyze(
    cfg: &AppConfig,
    input: &Path,
    transformer_kva: Option<f64>,
) -> anyhow::Result<AnalysisOutput> {
    let pipeline: Pipeline<_, Reading> = Pipeline {
        source: IntervalCsvFileSource::new(input),
        transforms: vec![Arc::new(ReadingValidation)],
        max_dropped: cfg.ingest.max_dropped_rows,
    };
    let batch = pipeline.run().await?;
    if batch.rows.is_empty() {
        bail!("{}: no valid readings", input.display());
    }

    let readings: Vec<Reading> = batch.rows.iter().map(|e| e.payload.clone()).collect();
    let interval = cfg.interval();
    let series = resample::resample(&readings, interval);
    let maxima = resample::per_meter_maxima(&readings, interval);

    let report = factors::calculate(&series, &maxima, &cfg.demand_factor_policy())?;
    for violation in &report.violations {
        tracing::warn!(metric = %violation.metric, value = violation.value, "reasonability violation");
    }

    let capacity = match transformer_kva {
        Some(kva) => Some(capacity::distribution(&series, kva)?),
        None => None,
    };

    let start = readings.iter().map(|r| r.ts).min().context("no readings")?;
    let end = readings.iter().map(|r| r.ts).max().context("no readings")?;
    let meta = DatasetMeta {
        input: input.display().to_string(),
        run_at: report::stamp(now_utc_naive()),
        start,
        end,
        rows_read: batch.rows.len() + batch.dropped,
        rows_dropped: batch.dropped,
    };

    let series_csv = sibling_path(input, "_RESULTS-LP.csv");
    let report_txt = sibling_path(input, "_RESULTS.txt");
    let factors_json = sibling_path(input, "_factors.json");

    report::write_series_csv(&series_csv, &series)?;
    let text = report::render_report(&meta, &report, capacity.as_ref());
    fs::write(&report_txt, &text)?;
    report::write_factor_json(&factors_json, &report)?;

    Ok(AnalysisOutput {
        report,
        capacity,
        series,
        meta,
        text,
        series_csv,
        report_txt,
        factors_json,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;
    use std::fs;

    fn test_config(root: &Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.ingest.dropbox_dir = root.join("dropbox");
        cfg.ingest.data_root = root.join("data");
        cfg.ingest.quarantine_dir = root.join("data/error");
        cfg.ingest.profile_dir = root.join("lp");
        cfg.ingest.log_dir = root.join("logs");
        cfg.ingest.hash_cache = root.join(".processed-hashes.json");
        cfg.sites = vec![SiteConfig {
            name: "north".to_string(),
            meter_id: "85400796".to_string(),
            multiplier: 1_000_000.0,
            polarity: Default::default(),
        }];
        cfg
    }

    const REGISTER_HEADER: &str = "Record No.,Meter,Start Time,End Time,-1-,-2-,-3-,-4-\n";

    fn register_file(rows: &[&str]) -> String {
        let mut contents = String::from("Export Preamble\n");
        contents.push_str(REGISTER_HEADER);
        for row in rows {
            contents.push_str(row);
            contents.push('\n');
        }
        contents
    }

    #[tokio::test]
    async fn intake_admits_clean_files_and_quarantines_violators() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        fs::create_dir_all(&cfg.ingest.dropbox_dir).unwrap();

        fs::write(
            cfg.ingest.dropbox_dir.join("north_clean.csv"),
            register_file(&[
                "1,n,01/01/24 00:00:00,01/01/24 00:15:00,200.0,0.0,210.0,0.0",
                "2,n,01/01/24 00:15:00,01/01/24 00:30:00,190.0,0.0,200.0,0.0",
            ]),
        )
        .unwrap();
        // The second row starts 15 minutes after the first one ends.
        fs::write(
            cfg.ingest.dropbox_dir.join("north_gap.csv"),
            register_file(&[
                "1,n,01/01/24 00:00:00,01/01/24 00:15:00,200.0,0.0,210.0,0.0",
                "2,n,01/01/24 00:30:00,01/01/24 00:45:00,190.0,0.0,200.0,0.0",
            ]),
        )
        .unwrap();

        let summary = intake(&cfg).await.unwrap();
        assert_eq!(summary.admitted.len(), 1);
        assert_eq!(summary.quarantined.len(), 1);
        assert!(summary.skipped.is_empty());

        assert!(cfg
            .ingest
            .data_root
            .join("2024-01/north_clean.csv")
            .exists());
        assert!(cfg
            .ingest
            .quarantine_dir
            .join("north_gap_SEQUENCE-ERROR.csv")
            .exists());
        // Nothing from the quarantined file remains in the dropbox or tree.
        assert!(!cfg.ingest.dropbox_dir.join("north_gap.csv").exists());
    }

    #[tokio::test]
    async fn build_merges_dedups_and_reruns_identically() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let month_dir = cfg.ingest.data_root.join("2024-01");
        fs::create_dir_all(&month_dir).unwrap();

        let shared_row = "2,n,01/01/24 00:15:00,01/01/24 00:30:00,190.0,0.0,200.0,0.0";
        fs::write(
            month_dir.join("north_a.csv"),
            register_file(&[
                "1,n,01/01/24 00:00:00,01/01/24 00:15:00,200.0,0.0,210.0,0.0",
                shared_row,
            ]),
        )
        .unwrap();
        fs::write(
            month_dir.join("north_b.csv"),
            register_file(&[
                shared_row,
                "3,n,01/01/24 00:30:00,01/01/24 00:45:00,180.0,0.0,190.0,0.0",
            ]),
        )
        .unwrap();

        let summary = build(&cfg).await.unwrap();
        assert_eq!(summary.files_merged, 2);
        assert_eq!(summary.overlap_rows, 1);
        assert_eq!(summary.duplicate_rows, 0);
        assert_eq!(summary.sites.len(), 1);
        assert_eq!(summary.sites[0].rows, 3);
        assert_eq!(summary.system_rows, 3);

        let site_csv = fs::read_to_string(cfg.ingest.profile_dir.join("north.csv")).unwrap();
        assert_eq!(site_csv.lines().count(), 4);

        let duplicates = fs::read_to_string(cfg.ingest.log_dir.join("duplicates.log")).unwrap();
        assert!(duplicates.contains("OVERLAP"));
        assert!(!duplicates.contains("DUPLICATE ROW"));

        // Second pass over unchanged inputs: same cache, same logs, and the
        // inputs now all count as cached.
        let cache_before = fs::read_to_string(&cfg.ingest.hash_cache).unwrap();
        let summary2 = build(&cfg).await.unwrap();
        assert_eq!(summary2.files_cached, 2);
        assert_eq!(summary2.files_merged, 0);
        assert_eq!(summary2.sites[0].rows, 3);
        assert_eq!(
            cache_before,
            fs::read_to_string(&cfg.ingest.hash_cache).unwrap()
        );
        assert_eq!(
            duplicates,
            fs::read_to_string(cfg.ingest.log_dir.join("duplicates.log")).unwrap()
        );
    }

    #[tokio::test]
    async fn build_logs_conflicting_rows_as_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let month_dir = cfg.ingest.data_root.join("2024-01");
        fs::create_dir_all(&month_dir).unwrap();

        fs::write(
            month_dir.join("north_a.csv"),
            register_file(&["1,n,01/01/24 00:00:00,01/01/24 00:15:00,200.0,0.0,210.0,0.0"]),
        )
        .unwrap();
        fs::write(
            month_dir.join("north_b.csv"),
            register_file(&["1,n,01/01/24 00:00:00,01/01/24 00:15:00,999.0,0.0,210.0,0.0"]),
        )
        .unwrap();

        let summary = build(&cfg).await.unwrap();
        assert_eq!(summary.duplicate_rows, 1);
        assert_eq!(summary.sites[0].rows, 1);

        // First-seen wins: the merged value comes from north_a.
        let site_csv = fs::read_to_string(cfg.ingest.profile_dir.join("north.csv")).unwrap();
        assert!(site_csv.contains("200.000000"));
        assert!(!site_csv.contains("999.000000"));
    }

    #[tokio::test]
    async fn analyze_reproduces_the_worked_example() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let input = dir.path().join("reads.csv");
        fs::write(
            &input,
            "meter,date,time,kw\n\
             85400796,2024-01-01,00:00:00.000,1.0\n\
             85400796,2024-01-01,00:15:00.000,2.0\n\
             85400796,2024-01-01,00:30:00.000,3.0\n\
             85400796,2024-01-01,00:45:00.000,4.0\n",
        )
        .unwrap();

        let output = analyze(&cfg, &input, None).await.unwrap();
        assert_eq!(output.report.average_load, 2.5);
        assert_eq!(output.report.peak_load, 4.0);
        assert_eq!(
            report::stamp(output.report.peak_timestamp),
            "2024-01-01 00:45:00"
        );
        assert_eq!(output.report.num_days, 1);
        assert_eq!(output.report.num_meters, 1);
        assert!(output.report.violations.is_empty());
        assert!(output.capacity.is_none());

        assert!(output.series_csv.exists());
        assert!(output.report_txt.exists());
        assert!(output.factors_json.exists());

        let series_csv = fs::read_to_string(&output.series_csv).unwrap();
        assert_eq!(series_csv.lines().count(), 5);
    }

    #[tokio::test]
    async fn analyze_partitions_capacity_bands() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let input = dir.path().join("reads.csv");
        fs::write(
            &input,
            "meter,date,time,kw\n\
             m1,2024-01-01,00:00:00.000,8.0\n\
             m1,2024-01-01,00:15:00.000,9.0\n\
             m1,2024-01-01,00:30:00.000,10.5\n\
             m1,2024-01-01,00:45:00.000,12.5\n",
        )
        .unwrap();

        let output = analyze(&cfg, &input, Some(10.0)).await.unwrap();
        let dist = output.capacity.unwrap();
        for band in dist.bands() {
            assert_eq!(band.percent, 25.0);
        }
        assert!(output.text.contains("Exceeds 120%"));
    }

    #[tokio::test]
    async fn analyze_fails_integrity_when_too_many_rows_drop() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let input = dir.path().join("reads.csv");
        let mut contents = String::from("meter,date,time,kw\n");
        contents.push_str("m1,2024-01-01,00:00:00.000,1.0\n");
        for i in 0..4 {
            contents.push_str(&format!("m1,2024-01-01,00:{:02}:00.000,bogus\n", 15 + i));
        }
        fs::write(&input, contents).unwrap();

        let err = analyze(&cfg, &input, None).await.unwrap_err();
        assert!(err.to_string().contains("integrity error"));
    }
}
