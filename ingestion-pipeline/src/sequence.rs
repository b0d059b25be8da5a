use std::{fs, io, path::{Path, PathBuf}};

use profile_core::domain::RegisterRead;
use time::PrimitiveDateTime;

use crate::pipeline::{Envelope, FileBatch, PipelineError};
use crate::report::stamp;

/// Rows of context captured on either side of a violation.
const CONTEXT_ROWS: usize = 4;

/// Suffix marking a quarantined file, inserted ahead of the extension.
pub const QUARANTINE_SUFFIX: &str = "_SEQUENCE-ERROR";

#[derive(Debug, Clone)]
pub struct SequenceViolation {
    /// Index of the offending row within the batch.
    pub index: usize,
    pub record: String,
    pub expected: PrimitiveDateTime,
    pub actual: PrimitiveDateTime,
    /// `record, start -> end` lines for up to ±4 rows around the violation.
    pub context: Vec<String>,
}

impl SequenceViolation {
    pub fn to_error(&self, path: &Path) -> PipelineError {
        PipelineError::Sequence {
            path: path.to_path_buf(),
            record: self.record.clone(),
            expected: self.expected,
            actual: self.actual,
        }
    }
}

fn context_line(env: &Envelope<RegisterRead>) -> String {
    format!(
        "{}, {} -> {}",
        env.payload.record,
        stamp(env.payload.start),
        stamp(env.payload.end)
    )
}

/// Verify that each row's interval starts exactly where the previous one
/// ended: no gaps, no overlaps. All-or-nothing — the first violation
/// condemns the whole file.
pub fn check(batch: &FileBatch<RegisterRead>) -> Result<(), SequenceViolation> {
    for i in 1..batch.rows.len() {
        let prev = &batch.rows[i - 1].payload;
        let cur = &batch.rows[i].payload;
        if cur.start != prev.end {
            let lo = i.saturating_sub(CONTEXT_ROWS);
            let hi = (i + CONTEXT_ROWS + 1).min(batch.rows.len());
            let context = batch.rows[lo..hi].iter().map(context_line).collect();
            return Err(SequenceViolation {
                index: i,
                record: cur.record.clone(),
                expected: prev.end,
                actual: cur.start,
                context,
            });
        }
    }
    Ok(())
}

/// Move a condemned file into the quarantine directory under a marked name.
/// Rename can cross devices, so it falls back to copy-and-remove.
pub fn quarantine(path: &Path, quarantine_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(quarantine_dir)?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "quarantined".to_string());
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());
    let dest = quarantine_dir.join(format!("{stem}{QUARANTINE_SUFFIX}.{ext}"));

    if fs::rename(path, &dest).is_err() {
        fs::copy(path, &dest)?;
        fs::remove_file(path)?;
    }
    metrics::counter!("sequence_quarantined_files_total").increment(1);
    Ok(dest)
}
