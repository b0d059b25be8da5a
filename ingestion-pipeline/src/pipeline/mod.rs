use std::{path::PathBuf, sync::Arc};

use time::PrimitiveDateTime;

/// A parsed row carrying enough source context to classify and log it later
/// in the run.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    /// 1-based data row number within the source file.
    pub line: u64,
    /// Trimmed source cells joined with commas; duplicate classification
    /// compares these, and the logs quote them.
    pub raw: String,
}

/// Everything a source produced from one file. Admission is all-or-nothing
/// per file, so sources read to the end before anything flows downstream.
#[derive(Debug)]
pub struct FileBatch<T> {
    pub path: PathBuf,
    pub rows: Vec<Envelope<T>>,
    /// Rows dropped for unparsable cells, checked against the run budget.
    pub dropped: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("format error in {path}: {reason}")]
    Format { path: PathBuf, reason: String },
    #[error("integrity error in {path}: {dropped} rows dropped, budget is {budget}")]
    Integrity {
        path: PathBuf,
        dropped: usize,
        budget: usize,
    },
    #[error(
        "sequence error in {path} at record {record}: interval starts at {actual}, expected {expected}"
    )]
    Sequence {
        path: PathBuf,
        record: String,
        expected: PrimitiveDateTime,
        actual: PrimitiveDateTime,
    },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("hash cache {path}: {reason}")]
    Cache { path: PathBuf, reason: String },
    #[error("row rejected: {0}")]
    Rejected(String),
}

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn read(&self) -> Result<FileBatch<T>, PipelineError>;
}

/// Row-level validation. An `Err` drops the row and counts it against the
/// file's budget; it does not fail the file by itself.
#[async_trait::async_trait]
pub trait Transform<T>: Send + Sync {
    async fn apply(&self, input: Envelope<T>) -> Result<Envelope<T>, PipelineError>;
}

pub struct Pipeline<S, T> {
    pub source: S,
    pub transforms: Vec<Arc<dyn Transform<T> + Send + Sync>>,
    /// Per-file budget for dropped rows. Exceeding it fails the file with an
    /// integrity error rather than silently losing data.
    pub max_dropped: usize,
}

impl<S, T> Pipeline<S, T>
where
    S: Source<T> + Send + Sync,
    T: Send + 'static,
{
    pub async fn run(&self) -> Result<FileBatch<T>, PipelineError> {
        let mut batch = self.source.read().await?;

        let rows = std::mem::take(&mut batch.rows);
        let mut kept = Vec::with_capacity(rows.len());
        'rows: for mut env in rows {
            for transform in &self.transforms {
                match transform.apply(env).await {
                    Ok(next) => env = next,
                    Err(e) => {
                        tracing::debug!(path = %batch.path.display(), error = %e, "dropped row");
                        batch.dropped += 1;
                        continue 'rows;
                    }
                }
            }
            kept.push(env);
        }
        batch.rows = kept;

        if batch.dropped > self.max_dropped {
            return Err(PipelineError::Integrity {
                path: batch.path,
                dropped: batch.dropped,
                budget: self.max_dropped,
            });
        }

        Ok(batch)
    }
}
