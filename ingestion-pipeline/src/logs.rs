use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::Path,
};

use time::PrimitiveDateTime;

use crate::dedup::RowClass;
use crate::report::stamp;
use crate::sequence::SequenceViolation;

/// Per-run merge logs: duplicate classifications and per-file errors.
///
/// Both files are truncated when the run starts and appended while it runs,
/// so a re-run over unchanged inputs reproduces them byte for byte — that is
/// the observable half of the idempotence contract. Lines deliberately carry
/// no wall-clock stamps for the same reason.
pub struct RunLogs {
    duplicates: File,
    errors: File,
}

impl RunLogs {
    pub fn create(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let mut duplicates = File::create(dir.join("duplicates.log"))?;
        writeln!(duplicates, "=== Duplicate Data Rows ===")?;
        let mut errors = File::create(dir.join("errors.log"))?;
        writeln!(errors, "=== Errors During Processing ===")?;
        Ok(Self { duplicates, errors })
    }

    pub fn duplicate(
        &mut self,
        key: &str,
        ts: PrimitiveDateTime,
        source: &Path,
        class: RowClass,
        raw: &str,
    ) -> io::Result<()> {
        writeln!(
            self.duplicates,
            "{key},{},{},{class} ROW: {raw}",
            stamp(ts),
            source.display()
        )
    }

    pub fn error(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.errors, "{message}")
    }
}

/// Append-only journal of intake admissions and quarantines. Unlike the
/// merge logs this one accumulates across runs, so entries carry the
/// file's data span rather than depending on ordering.
pub struct IntakeLog {
    file: File,
}

impl IntakeLog {
    pub fn open(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("intake.log"))?;
        Ok(Self { file })
    }

    pub fn admitted(
        &mut self,
        source: &Path,
        dest: &Path,
        first: PrimitiveDateTime,
        last: PrimitiveDateTime,
    ) -> io::Result<()> {
        writeln!(
            self.file,
            "Moved: '{}' | Start: {} | End: {} | Dest: {}",
            source.display(),
            stamp(first),
            stamp(last),
            dest.display()
        )
    }

    /// The full quarantine diagnostic: offending record, expected vs actual
    /// timestamps, destination, and the surrounding rows.
    pub fn quarantined(
        &mut self,
        source: &Path,
        violation: &SequenceViolation,
        moved_to: &Path,
    ) -> io::Result<()> {
        writeln!(
            self.file,
            "[ERROR] Non-sequential timestamps in '{}'",
            source.display()
        )?;
        writeln!(
            self.file,
            "  At Record: {} | Expected: {} | Actual: {}",
            violation.record,
            stamp(violation.expected),
            stamp(violation.actual)
        )?;
        writeln!(self.file, "  File moved to: {}", moved_to.display())?;
        writeln!(self.file, "  Context:")?;
        for line in &violation.context {
            writeln!(self.file, "    {line}")?;
        }
        Ok(())
    }

    pub fn skipped(&mut self, source: &Path, reason: &str) -> io::Result<()> {
        writeln!(self.file, "Skipped: '{}' | {reason}", source.display())
    }
}
