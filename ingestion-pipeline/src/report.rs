use std::{fs, io, path::Path};

use profile_core::domain::{CapacityDistribution, FactorReport, LoadSeries, SitePower, SystemPower};
use time::PrimitiveDateTime;

/// Canonical timestamp rendering for every file the pipeline writes.
pub fn stamp(ts: PrimitiveDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        ts.year(),
        u8::from(ts.month()),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second()
    )
}

fn csv_error(e: csv::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

/// The resampled system series as `datetime,total_kw`.
pub fn write_series_csv(path: &Path, series: &LoadSeries) -> io::Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
    writer
        .write_record(["datetime", "total_kw"])
        .map_err(csv_error)?;
    for bucket in series.buckets() {
        writer
            .write_record([stamp(bucket.start), bucket.total_kw.to_string()])
            .map_err(csv_error)?;
    }
    writer.flush()
}

/// One site's merged net-power series in engineering units.
pub fn write_site_csv(path: &Path, rows: &[SitePower]) -> io::Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
    writer
        .write_record([
            "datetime", "mw_del", "mw_rec", "mva_del", "mva_rec", "mw_net", "mva_net", "pf_net",
        ])
        .map_err(csv_error)?;
    for p in rows {
        writer
            .write_record([
                stamp(p.ts),
                format!("{:.6}", p.mw_del),
                format!("{:.6}", p.mw_rec),
                format!("{:.6}", p.mva_del),
                format!("{:.6}", p.mva_rec),
                format!("{:.6}", p.mw_net),
                format!("{:.6}", p.mva_net),
                format!("{:.6}", p.pf_net),
            ])
            .map_err(csv_error)?;
    }
    writer.flush()
}

/// The system-wide outer-joined series.
pub fn write_system_csv(path: &Path, rows: &[SystemPower]) -> io::Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
    writer
        .write_record(["datetime", "mw_net", "mva_net", "pf_net", "site_count"])
        .map_err(csv_error)?;
    for p in rows {
        writer
            .write_record([
                stamp(p.ts),
                format!("{:.6}", p.mw_net),
                format!("{:.6}", p.mva_net),
                format!("{:.6}", p.pf_net),
                p.site_count.to_string(),
            ])
            .map_err(csv_error)?;
    }
    writer.flush()
}

/// Structured factor report for programmatic collaborators.
pub fn write_factor_json(path: &Path, report: &FactorReport) -> io::Result<()> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    fs::write(path, json + "\n")
}

/// Dataset context rendered at the top of the text report.
#[derive(Debug, Clone)]
pub struct DatasetMeta {
    pub input: String,
    pub run_at: String,
    pub start: PrimitiveDateTime,
    pub end: PrimitiveDateTime,
    pub rows_read: usize,
    pub rows_dropped: usize,
}

const WIDTH: usize = 80;

fn rule(out: &mut String, ch: char) {
    out.push_str(&ch.to_string().repeat(WIDTH));
    out.push('\n');
}

fn title(out: &mut String, text: &str) {
    out.push_str(&format!("{text:^WIDTH$}\n"));
}

fn row(out: &mut String, label: &str, value: String) {
    out.push_str(&format!("{label:<37}{value}\n"));
}

/// The fixed-width text report consumed by human collaborators: dataset
/// parameters, results, factors, and (with a rating) the capacity table.
pub fn render_report(
    meta: &DatasetMeta,
    report: &FactorReport,
    capacity: Option<&CapacityDistribution>,
) -> String {
    let mut out = String::new();

    rule(&mut out, '=');
    title(&mut out, "Data Parameters");
    rule(&mut out, '=');
    row(&mut out, "Input file:", meta.input.clone());
    row(&mut out, "Report run (UTC):", meta.run_at.clone());
    row(&mut out, "Data start:", stamp(meta.start));
    row(&mut out, "Data end:", stamp(meta.end));
    row(&mut out, "Days in dataset:", report.num_days.to_string());
    row(&mut out, "Meters in dataset:", report.num_meters.to_string());
    row(&mut out, "Rows read:", meta.rows_read.to_string());
    row(&mut out, "Rows dropped:", meta.rows_dropped.to_string());

    rule(&mut out, '=');
    title(&mut out, "Results");
    rule(&mut out, '=');
    row(
        &mut out,
        "Peak load:",
        format!(
            "{:.2} KW on {}",
            report.peak_load,
            stamp(report.peak_timestamp)
        ),
    );
    row(
        &mut out,
        "Average load:",
        format!("{:.2} KW", report.average_load),
    );

    rule(&mut out, '=');
    title(&mut out, "Calculated Factors");
    rule(&mut out, '=');
    row(
        &mut out,
        "Load factor:",
        format!("{:.2}  = average_load / peak_load", report.load_factor),
    );
    row(
        &mut out,
        "Diversity factor:",
        format!(
            "{:.2}  = sum(individual maxima) / peak_load",
            report.diversity_factor
        ),
    );
    row(
        &mut out,
        "Coincidence factor:",
        format!(
            "{:.2}  = peak_load / sum(individual maxima)",
            report.coincidence_factor
        ),
    );
    row(
        &mut out,
        "Demand factor:",
        format!(
            "{:.2}  = peak_load / connected load ({})",
            report.demand_factor, report.demand_factor_basis
        ),
    );
    if report.violations.is_empty() {
        row(
            &mut out,
            "Reasonability:",
            "all factors within expected bounds".to_string(),
        );
    } else {
        for violation in &report.violations {
            row(&mut out, "Reasonability:", violation.to_string());
        }
    }
    rule(&mut out, '=');

    if let Some(dist) = capacity {
        title(&mut out, "Transformer Calculations and Capacity Distribution");
        rule(&mut out, '=');
        row(
            &mut out,
            "Total time:",
            format!(
                "{:.1} days ({:.2} hours)",
                dist.total_hours / 24.0,
                dist.total_hours
            ),
        );
        row(
            &mut out,
            "Transformer rating:",
            format!("{:.1} KVA", dist.transformer_kva),
        );
        rule(&mut out, '-');
        out.push_str(&format!(
            " {:<30}| {:^10} | {:^10} | {:^8}\n",
            "LOAD RANGE", "DAYS", "HOURS", "%"
        ));
        rule(&mut out, '-');
        for band in dist.bands() {
            out.push_str(&format!(
                " {:<30}| {:>10.2} | {:>10.2} | {:>8.2}\n",
                band.label, band.days, band.hours, band.percent
            ));
        }
        rule(&mut out, '=');
    }

    out
}
