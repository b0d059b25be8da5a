use std::{fs::File, path::PathBuf};

use csv::StringRecord;
use profile_core::domain::Reading;
use time::{macros::format_description, Date, PrimitiveDateTime, Time};

use crate::pipeline::{Envelope, FileBatch, PipelineError, Source};

/// Single-phase interval-read source.
///
/// Expected header columns (by name):
/// - meter
/// - date (YYYY-MM-DD)
/// - time (HH:MM:SS.fff; sub-seconds optional)
/// - kw
///
/// Cells that fail to parse drop their row; the drop count rides along in
/// the batch for the integrity budget.
pub struct IntervalCsvFileSource {
    path: PathBuf,
}

impl IntervalCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn parse_local_timestamp(date_str: &str, time_str: &str) -> Result<PrimitiveDateTime, String> {
    let date_format = format_description!("[year]-[month]-[day]");
    let time_subsecond = format_description!("[hour]:[minute]:[second].[subsecond]");
    let time_whole = format_description!("[hour]:[minute]:[second]");

    let date = Date::parse(date_str.trim(), &date_format)
        .map_err(|e| format!("invalid date '{date_str}': {e}"))?;
    let time_str = time_str.trim();
    let time = Time::parse(time_str, &time_subsecond)
        .or_else(|_| Time::parse(time_str, &time_whole))
        .map_err(|e| format!("invalid time '{time_str}': {e}"))?;
    Ok(PrimitiveDateTime::new(date, time))
}

fn joined_cells(record: &StringRecord) -> String {
    record
        .iter()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(",")
}

struct Columns {
    meter: usize,
    date: usize,
    time: usize,
    kw: usize,
}

impl Columns {
    fn locate(headers: &StringRecord, path: &PathBuf) -> Result<Self, PipelineError> {
        let find = |name: &str| -> Result<usize, PipelineError> {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
                .ok_or_else(|| PipelineError::Format {
                    path: path.clone(),
                    reason: format!("missing required column '{name}'"),
                })
        };
        Ok(Self {
            meter: find("meter")?,
            date: find("date")?,
            time: find("time")?,
            kw: find("kw")?,
        })
    }
}

fn record_to_reading(record: &StringRecord, columns: &Columns) -> Result<Reading, String> {
    let cell = |idx: usize| record.get(idx).unwrap_or("").trim();

    let meter_id = cell(columns.meter);
    if meter_id.is_empty() {
        return Err("empty meter cell".to_string());
    }

    let ts = parse_local_timestamp(cell(columns.date), cell(columns.time))?;

    let kw_str = cell(columns.kw);
    let kw: f64 = kw_str
        .parse()
        .map_err(|e| format!("invalid kw '{kw_str}': {e}"))?;

    Ok(Reading {
        meter_id: meter_id.to_string(),
        ts,
        kw,
    })
}

#[async_trait::async_trait]
impl Source<Reading> for IntervalCsvFileSource {
    async fn read(&self) -> Result<FileBatch<Reading>, PipelineError> {
        let file = File::open(&self.path).map_err(|e| PipelineError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        let headers = rdr
            .headers()
            .map_err(|e| PipelineError::Format {
                path: self.path.clone(),
                reason: format!("failed to read CSV headers: {e}"),
            })?
            .clone();
        let columns = Columns::locate(&headers, &self.path)?;

        let mut rows = Vec::new();
        let mut dropped = 0usize;
        let mut line = 0u64;
        for result in rdr.records() {
            let record = result.map_err(|e| PipelineError::Format {
                path: self.path.clone(),
                reason: format!("unreadable CSV record: {e}"),
            })?;
            line += 1;

            match record_to_reading(&record, &columns) {
                Ok(reading) => rows.push(Envelope {
                    payload: reading,
                    line,
                    raw: joined_cells(&record),
                }),
                Err(reason) => {
                    metrics::counter!("interval_csv_dropped_rows_total").increment(1);
                    tracing::debug!(path = %self.path.display(), line, reason, "dropped row");
                    dropped += 1;
                }
            }
        }

        Ok(FileBatch {
            path: self.path.clone(),
            rows,
            dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use time::macros::datetime;

    fn write_csv(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn parses_well_formed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "reads.csv",
            "meter,date,time,kw\n\
             85400796,2024-01-01,00:15:00.000,0.052\n\
             85400796,2024-01-01,00:30:00,1.5\n",
        );

        let batch = IntervalCsvFileSource::new(&path).read().await.unwrap();
        assert_eq!(batch.dropped, 0);
        assert_eq!(batch.rows.len(), 2);

        let first = &batch.rows[0];
        assert_eq!(first.line, 1);
        assert_eq!(first.payload.meter_id, "85400796");
        assert_eq!(first.payload.ts, datetime!(2024-01-01 00:15));
        assert_eq!(first.payload.kw, 0.052);
        assert_eq!(first.raw, "85400796,2024-01-01,00:15:00.000,0.052");
    }

    #[tokio::test]
    async fn header_mismatch_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "bad.csv", "meter,datetime,kw\n1,2024-01-01 00:00,1.0\n");

        let err = IntervalCsvFileSource::new(&path).read().await.unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }));
    }

    #[tokio::test]
    async fn unparsable_cells_drop_their_row_and_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "mixed.csv",
            "meter,date,time,kw\n\
             m1,2024-01-01,00:00:00.000,1.0\n\
             m1,2024-01-01,00:15:00.000,not-a-number\n\
             m1,not-a-date,00:30:00.000,2.0\n\
             m1,2024-01-01,00:45:00.000,3.0\n",
        );

        let batch = IntervalCsvFileSource::new(&path).read().await.unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.dropped, 2);
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let err = IntervalCsvFileSource::new("no-such-file.csv")
            .read()
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
