use std::{fs::File, path::PathBuf};

use csv::StringRecord;
use profile_core::domain::RegisterRead;
use time::{macros::format_description, Date, Month, PrimitiveDateTime, Time};

use crate::pipeline::{Envelope, FileBatch, PipelineError, Source};

/// Multi-phase register export source.
///
/// The export carries preamble lines ahead of a header row whose first cell
/// starts with `Record No.`; the positional channel markers `-1-` through
/// `-4-` in that row stand for kw_del, kw_rec, kva_del and kva_rec. Start
/// and end times sit in columns 2 and 3 as `MM/DD/YY HH:MM:SS`. Trailer rows
/// with blank time cells are skipped; rows whose cells fail to parse drop
/// with the count riding along in the batch.
pub struct RegisterCsvFileSource {
    path: PathBuf,
}

impl RegisterCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

const START_COLUMN: usize = 2;
const END_COLUMN: usize = 3;

fn rename_channel_marker(cell: &str) -> &str {
    match cell {
        "-1-" => "kw_del",
        "-2-" => "kw_rec",
        "-3-" => "kva_del",
        "-4-" => "kva_rec",
        other => other,
    }
}

/// `MM/DD/YY HH:MM:SS` with the strptime-style two-digit-year pivot:
/// 00–68 land in the 2000s, 69–99 in the 1900s.
fn parse_register_stamp(s: &str) -> Result<PrimitiveDateTime, String> {
    let s = s.trim();
    let (date_part, time_part) = s
        .split_once(' ')
        .ok_or_else(|| format!("invalid timestamp '{s}'"))?;

    let mut fields = date_part.split('/');
    let mut next_field = |name: &str| -> Result<&str, String> {
        fields
            .next()
            .ok_or_else(|| format!("invalid date '{date_part}': missing {name}"))
    };
    let month: u8 = next_field("month")?
        .parse()
        .map_err(|e| format!("invalid month in '{date_part}': {e}"))?;
    let day: u8 = next_field("day")?
        .parse()
        .map_err(|e| format!("invalid day in '{date_part}': {e}"))?;
    let short_year: i32 = next_field("year")?
        .parse()
        .map_err(|e| format!("invalid year in '{date_part}': {e}"))?;
    let year = if short_year >= 69 {
        1900 + short_year
    } else {
        2000 + short_year
    };

    let month = Month::try_from(month).map_err(|e| format!("invalid month in '{date_part}': {e}"))?;
    let date = Date::from_calendar_date(year, month, day)
        .map_err(|e| format!("invalid date '{date_part}': {e}"))?;

    let time_format = format_description!("[hour]:[minute]:[second]");
    let time = Time::parse(time_part.trim(), &time_format)
        .map_err(|e| format!("invalid time '{time_part}': {e}"))?;

    Ok(PrimitiveDateTime::new(date, time))
}

fn joined_cells(record: &StringRecord) -> String {
    record
        .iter()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(",")
}

struct Channels {
    kw_del: usize,
    kw_rec: usize,
    kva_del: usize,
    kva_rec: usize,
}

impl Channels {
    fn locate(header: &[String], path: &PathBuf) -> Result<Self, PipelineError> {
        let find = |name: &str| -> Result<usize, PipelineError> {
            header
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| PipelineError::Format {
                    path: path.clone(),
                    reason: format!("header has no '{name}' channel column"),
                })
        };
        Ok(Self {
            kw_del: find("kw_del")?,
            kw_rec: find("kw_rec")?,
            kva_del: find("kva_del")?,
            kva_rec: find("kva_rec")?,
        })
    }
}

fn record_to_register_read(
    record: &StringRecord,
    channels: &Channels,
) -> Result<RegisterRead, String> {
    let cell = |idx: usize| record.get(idx).unwrap_or("").trim();

    let start = parse_register_stamp(cell(START_COLUMN))?;
    let end = parse_register_stamp(cell(END_COLUMN))?;

    let power = |idx: usize, name: &str| -> Result<f64, String> {
        let s = cell(idx);
        s.parse()
            .map_err(|e| format!("invalid {name} '{s}': {e}"))
    };

    Ok(RegisterRead {
        record: cell(0).to_string(),
        start,
        end,
        kw_del: power(channels.kw_del, "kw_del")?,
        kw_rec: power(channels.kw_rec, "kw_rec")?,
        kva_del: power(channels.kva_del, "kva_del")?,
        kva_rec: power(channels.kva_rec, "kva_rec")?,
    })
}

#[async_trait::async_trait]
impl Source<RegisterRead> for RegisterCsvFileSource {
    async fn read(&self) -> Result<FileBatch<RegisterRead>, PipelineError> {
        let file = File::open(&self.path).map_err(|e| PipelineError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut records = rdr.records();

        // Skip the export preamble until the header row.
        let mut header: Option<Vec<String>> = None;
        for result in records.by_ref() {
            let record = result.map_err(|e| PipelineError::Format {
                path: self.path.clone(),
                reason: format!("unreadable CSV record: {e}"),
            })?;
            if record
                .get(0)
                .is_some_and(|cell| cell.trim().starts_with("Record No."))
            {
                header = Some(
                    record
                        .iter()
                        .map(|cell| rename_channel_marker(cell.trim()).to_string())
                        .collect(),
                );
                break;
            }
        }
        let header = header.ok_or_else(|| PipelineError::Format {
            path: self.path.clone(),
            reason: "no 'Record No.' header row found".to_string(),
        })?;
        let channels = Channels::locate(&header, &self.path)?;

        let mut rows = Vec::new();
        let mut dropped = 0usize;
        let mut line = 0u64;
        for result in records {
            let record = result.map_err(|e| PipelineError::Format {
                path: self.path.clone(),
                reason: format!("unreadable CSV record: {e}"),
            })?;
            line += 1;

            // Export trailers carry blank time cells; they are structure,
            // not lost data.
            let start_blank = record.get(START_COLUMN).map_or(true, |c| c.trim().is_empty());
            let end_blank = record.get(END_COLUMN).map_or(true, |c| c.trim().is_empty());
            if record.len() < 4 || start_blank || end_blank {
                continue;
            }

            match record_to_register_read(&record, &channels) {
                Ok(read) => rows.push(Envelope {
                    payload: read,
                    line,
                    raw: joined_cells(&record),
                }),
                Err(reason) => {
                    metrics::counter!("register_csv_dropped_rows_total").increment(1);
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

    const SAMPLE: &str = "\
Meter Data Export\n\
Some Utility,Interval,15\n\
Record No.,Meter,Start Time,End Time,-1-,-2-,-3-,-4-\n\
1,north-sub,01/01/24 00:00:00,01/01/24 00:15:00,200.0,0.0,210.0,0.0\n\
2,north-sub,01/01/24 00:15:00,01/01/24 00:30:00,190.0,0.0,200.0,0.0\n\
Totals,,,,390.0,0.0,410.0,0.0\n";

    fn write_csv(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn skips_preamble_and_renames_channel_markers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "north.csv", SAMPLE);

        let batch = RegisterCsvFileSource::new(&path).read().await.unwrap();
        assert_eq!(batch.dropped, 0);
        assert_eq!(batch.rows.len(), 2);

        let first = &batch.rows[0].payload;
        assert_eq!(first.record, "1");
        assert_eq!(first.start, datetime!(2024-01-01 00:00));
        assert_eq!(first.end, datetime!(2024-01-01 00:15));
        assert_eq!(first.kw_del, 200.0);
        assert_eq!(first.kva_del, 210.0);
    }

    #[tokio::test]
    async fn trailer_rows_with_blank_times_are_skipped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "north.csv", SAMPLE);

        let batch = RegisterCsvFileSource::new(&path).read().await.unwrap();
        // The Totals trailer is structure, not a dropped row.
        assert_eq!(batch.dropped, 0);
    }

    #[tokio::test]
    async fn malformed_cells_are_dropped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "north.csv",
            "Record No.,Meter,Start Time,End Time,-1-,-2-,-3-,-4-\n\
             1,n,01/01/24 00:00:00,01/01/24 00:15:00,200.0,0.0,210.0,0.0\n\
             2,n,01/01/24 00:15:00,01/01/24 00:30:00,bogus,0.0,200.0,0.0\n\
             3,n,13/41/24 00:30:00,01/01/24 00:45:00,180.0,0.0,190.0,0.0\n",
        );

        let batch = RegisterCsvFileSource::new(&path).read().await.unwrap();
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.dropped, 2);
    }

    #[tokio::test]
    async fn missing_header_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "junk.csv", "no header here\n1,2,3\n");

        let err = RegisterCsvFileSource::new(&path).read().await.unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }));
    }

    #[test]
    fn two_digit_years_pivot_like_strptime() {
        assert_eq!(
            parse_register_stamp("01/01/24 00:00:00").unwrap(),
            datetime!(2024-01-01 00:00)
        );
        assert_eq!(
            parse_register_stamp("06/15/99 12:30:00").unwrap(),
            datetime!(1999-06-15 12:30)
        );
    }
}
