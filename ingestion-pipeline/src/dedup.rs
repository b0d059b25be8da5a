use std::{
    collections::{btree_map, BTreeMap, HashMap},
    fmt, fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use time::PrimitiveDateTime;

use crate::pipeline::{Envelope, PipelineError};

/// Stable content digest over a file's full byte stream.
pub fn file_digest(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Persisted record of which source files have been ingested, keyed by
/// content hash. The one piece of state that outlives a run: loaded (or
/// started empty) at run start, merged and rewritten at run end. A file that
/// failed to parse is never recorded, so the next run retries it.
#[derive(Debug, Default)]
pub struct HashCache {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl HashCache {
    pub fn load_or_empty<P: Into<PathBuf>>(path: P) -> Result<Self, PipelineError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                entries: HashMap::new(),
            });
        }
        let contents = fs::read_to_string(&path).map_err(|e| PipelineError::Cache {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let entries: HashMap<String, String> =
            serde_json::from_str(&contents).map_err(|e| PipelineError::Cache {
                path: path.clone(),
                reason: format!("corrupt cache: {e}"),
            })?;
        Ok(Self { path, entries })
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.entries.contains_key(digest)
    }

    pub fn record(&mut self, digest: String, source: &Path) {
        self.entries.insert(digest, source.display().to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite the cache file. Entries serialize in sorted key order so a
    /// re-run over unchanged inputs reproduces the file byte for byte.
    pub fn persist(&self) -> Result<(), PipelineError> {
        let sorted: BTreeMap<&String, &String> = self.entries.iter().collect();
        let contents =
            serde_json::to_string_pretty(&sorted).map_err(|e| PipelineError::Cache {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        fs::write(&self.path, contents).map_err(|e| PipelineError::Cache {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }
}

/// Classification of a second row seen for the same (key, timestamp):
/// byte-identical resubmissions are benign overlaps, differing content is a
/// conflicting duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowClass {
    Overlap,
    Duplicate,
}

impl fmt::Display for RowClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowClass::Overlap => write!(f, "OVERLAP"),
            RowClass::Duplicate => write!(f, "DUPLICATE"),
        }
    }
}

/// First-seen-wins row store for one merge run. Keys are (series key,
/// interval start) where the series key is the meter or site name.
#[derive(Debug, Default)]
pub struct RowLedger<T> {
    rows: BTreeMap<(String, PrimitiveDateTime), Envelope<T>>,
}

impl<T> RowLedger<T> {
    pub fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }

    /// Insert a row, keeping the first-seen on collision. Returns the
    /// classification and the rejected incoming envelope when the key was
    /// already present.
    pub fn insert(
        &mut self,
        key: &str,
        ts: PrimitiveDateTime,
        env: Envelope<T>,
    ) -> Option<(RowClass, Envelope<T>)> {
        match self.rows.entry((key.to_string(), ts)) {
            btree_map::Entry::Occupied(existing) => {
                let class = if existing.get().raw == env.raw {
                    RowClass::Overlap
                } else {
                    RowClass::Duplicate
                };
                Some((class, env))
            }
            btree_map::Entry::Vacant(slot) => {
                slot.insert(env);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Consume the ledger into per-key series, each sorted by timestamp.
    pub fn into_series(self) -> BTreeMap<String, Vec<Envelope<T>>> {
        let mut series: BTreeMap<String, Vec<Envelope<T>>> = BTreeMap::new();
        for ((key, _ts), env) in self.rows {
            series.entry(key).or_default().push(env);
        }
        series
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn env(raw: &str) -> Envelope<u32> {
        Envelope {
            payload: 0,
            line: 1,
            raw: raw.to_string(),
        }
    }

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, "meter,date,time,kw\n").unwrap();
        fs::write(&b, "meter,date,time,kw\n").unwrap();

        let da = file_digest(&a).unwrap();
        assert_eq!(da, file_digest(&a).unwrap());
        assert_eq!(da, file_digest(&b).unwrap());

        fs::write(&b, "meter,date,time,kw\nx,y,z,1\n").unwrap();
        assert_ne!(da, file_digest(&b).unwrap());
    }

    #[test]
    fn cache_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join(".processed-hashes.json");

        let mut cache = HashCache::load_or_empty(&cache_path).unwrap();
        assert!(cache.is_empty());
        cache.record("abc123".to_string(), Path::new("data/kw/north.csv"));
        cache.persist().unwrap();

        let reloaded = HashCache::load_or_empty(&cache_path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains("abc123"));
    }

    #[test]
    fn persisted_cache_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join(".processed-hashes.json");

        let mut cache = HashCache::load_or_empty(&cache_path).unwrap();
        cache.record("bbb".to_string(), Path::new("b.csv"));
        cache.record("aaa".to_string(), Path::new("a.csv"));
        cache.persist().unwrap();
        let first = fs::read_to_string(&cache_path).unwrap();

        let mut again = HashCache::load_or_empty(&cache_path).unwrap();
        again.record("aaa".to_string(), Path::new("a.csv"));
        again.record("bbb".to_string(), Path::new("b.csv"));
        again.persist().unwrap();
        assert_eq!(first, fs::read_to_string(&cache_path).unwrap());
    }

    #[test]
    fn identical_resubmission_classifies_as_overlap() {
        let mut ledger = RowLedger::new();
        let ts = datetime!(2024-01-01 00:15);

        assert!(ledger.insert("north", ts, env("1,a,b")).is_none());
        let (class, _) = ledger.insert("north", ts, env("1,a,b")).unwrap();
        assert_eq!(class, RowClass::Overlap);
    }

    #[test]
    fn conflicting_content_classifies_as_duplicate_and_first_seen_wins() {
        let mut ledger = RowLedger::new();
        let ts = datetime!(2024-01-01 00:15);

        assert!(ledger.insert("north", ts, env("1,a,b")).is_none());
        let (class, rejected) = ledger.insert("north", ts, env("1,a,DIFFERENT")).unwrap();
        assert_eq!(class, RowClass::Duplicate);
        assert_eq!(rejected.raw, "1,a,DIFFERENT");

        let series = ledger.into_series();
        assert_eq!(series["north"].len(), 1);
        assert_eq!(series["north"][0].raw, "1,a,b");
    }

    #[test]
    fn series_come_back_sorted_by_timestamp() {
        let mut ledger = RowLedger::new();
        ledger.insert("north", datetime!(2024-01-01 00:30), env("later"));
        ledger.insert("north", datetime!(2024-01-01 00:00), env("earlier"));
        ledger.insert("south", datetime!(2024-01-01 00:15), env("other"));

        let series = ledger.into_series();
        assert_eq!(series.len(), 2);
        assert_eq!(series["north"][0].raw, "earlier");
        assert_eq!(series["north"][1].raw, "later");
    }
}
