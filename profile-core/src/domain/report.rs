use std::fmt;

use serde::Serialize;
use time::PrimitiveDateTime;

/// How total connected load is derived for the demand factor.
///
/// The metering exports carry no nameplate data, so connected load is either
/// taken as the sum of each meter's own non-coincident maximum, or estimated
/// from the system peak with a caller-supplied scale factor (commercial
/// 1.1–1.2, residential 1.2–1.3, lighting 1.5–2.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DemandFactorPolicy {
    SumOfMaxima,
    ScaledEstimate { scale: f64 },
}

impl DemandFactorPolicy {
    pub fn basis(&self) -> String {
        match self {
            Self::SumOfMaxima => "sum of individual maxima".to_string(),
            Self::ScaledEstimate { scale } => format!("peak x {scale:.2} estimate"),
        }
    }
}

/// A derived factor that violated its expected bound. Recorded in the
/// report; the caller decides whether to treat it as fatal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reasonability {
    pub metric: String,
    pub value: f64,
    pub constraint: String,
}

impl Reasonability {
    pub fn new(metric: &str, value: f64, constraint: &str) -> Self {
        Self {
            metric: metric.to_string(),
            value,
            constraint: constraint.to_string(),
        }
    }
}

impl fmt::Display for Reasonability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {:.4} {}", self.metric, self.value, self.constraint)
    }
}

/// The per-run factor summary. Recomputed whole on every run, never patched.
#[derive(Debug, Clone, Serialize)]
pub struct FactorReport {
    pub num_days: i64,
    pub num_meters: usize,
    pub average_load: f64,
    pub peak_load: f64,
    pub peak_timestamp: PrimitiveDateTime,
    pub load_factor: f64,
    pub diversity_factor: f64,
    pub coincidence_factor: f64,
    pub demand_factor: f64,
    pub demand_factor_basis: String,
    /// Bound violations found while deriving the factors. Empty when every
    /// factor landed in its expected range.
    pub violations: Vec<Reasonability>,
}

/// One band of the capacity distribution table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityBand {
    pub label: String,
    pub hours: f64,
    pub days: f64,
    pub percent: f64,
}

/// Time-in-band partition of a load series against a transformer rating.
#[derive(Debug, Clone, Serialize)]
pub struct CapacityDistribution {
    pub transformer_kva: f64,
    /// Elapsed time covered by the series: first bucket start through the
    /// end of the last bucket. Gaps make band percentages sum below 100.
    pub total_hours: f64,
    pub below_85: CapacityBand,
    pub from_85_to_100: CapacityBand,
    pub from_100_to_120: CapacityBand,
    pub above_120: CapacityBand,
}

impl CapacityDistribution {
    pub fn bands(&self) -> [&CapacityBand; 4] {
        [
            &self.below_85,
            &self.from_85_to_100,
            &self.from_100_to_120,
            &self.above_120,
        ]
    }
}
