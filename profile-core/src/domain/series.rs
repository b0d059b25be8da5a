use serde::{Deserialize, Serialize};
use time::{Duration, PrimitiveDateTime};

/// One occupied fixed-width interval of a resampled series.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalBucket {
    pub start: PrimitiveDateTime,
    pub total_kw: f64,
    /// Number of distinct meters that contributed at least one read.
    pub meter_count: u32,
}

/// A resampled load series: buckets sorted by start, no duplicate starts,
/// one entry per occupied interval. Gaps are never synthesized; they are a
/// data-quality signal surfaced by the capacity analysis, not interpolated.
#[derive(Debug, Clone)]
pub struct LoadSeries {
    interval: Duration,
    buckets: Vec<IntervalBucket>,
}

impl LoadSeries {
    /// Buckets must already be sorted by start with no duplicates; the
    /// resampler builds them out of an ordered map, which guarantees both.
    pub(crate) fn from_sorted(interval: Duration, buckets: Vec<IntervalBucket>) -> Self {
        Self { interval, buckets }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn buckets(&self) -> &[IntervalBucket] {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn first_start(&self) -> Option<PrimitiveDateTime> {
        self.buckets.first().map(|b| b.start)
    }

    pub fn last_start(&self) -> Option<PrimitiveDateTime> {
        self.buckets.last().map(|b| b.start)
    }

    /// The bucket with the highest total. Ties resolve to the earliest
    /// bucket, so a flat peak reports its first occurrence.
    pub fn peak(&self) -> Option<&IntervalBucket> {
        let mut peak: Option<&IntervalBucket> = None;
        for bucket in &self.buckets {
            match peak {
                Some(p) if bucket.total_kw <= p.total_kw => {}
                _ => peak = Some(bucket),
            }
        }
        peak
    }

    pub fn mean(&self) -> Option<f64> {
        if self.buckets.is_empty() {
            return None;
        }
        let sum: f64 = self.buckets.iter().map(|b| b.total_kw).sum();
        Some(sum / self.buckets.len() as f64)
    }
}

/// Sign convention for a site's received-energy channels. Resolved once from
/// configuration at ingestion time; row signs are never inspected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    /// Received values are carried as recorded.
    #[default]
    Load,
    /// A generation site: received magnitudes are negated so net power
    /// subtracts what the site exports.
    Generation,
}

/// Per-site conversion from raw register units to engineering units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteScaling {
    /// CT/PT multiplier applied to raw kW/kVA register values.
    pub multiplier: f64,
    pub polarity: Polarity,
}

/// One site interval after unit conversion and netting.
#[derive(Debug, Clone, PartialEq)]
pub struct SitePower {
    pub ts: PrimitiveDateTime,
    pub mw_del: f64,
    pub mw_rec: f64,
    pub mva_del: f64,
    pub mva_rec: f64,
    pub mw_net: f64,
    pub mva_net: f64,
    pub pf_net: f64,
}

/// One system interval: the outer join of all site series on the bucket
/// start. A site with no read in an interval contributes zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemPower {
    pub ts: PrimitiveDateTime,
    pub mw_net: f64,
    pub mva_net: f64,
    pub pf_net: f64,
    /// Number of sites that actually had a read in this interval.
    pub site_count: u32,
}
