use std::collections::BTreeMap;

use crate::analysis::AnalysisError;
use crate::domain::{DemandFactorPolicy, FactorReport, LoadSeries, Reasonability};

/// Diversity and coincidence factors are reciprocals by construction; the
/// cross-check is advisory and tolerates float rounding on large datasets.
pub const RECIPROCAL_TOLERANCE: f64 = 1e-6;

/// Derive the classical loading ratios from a system-level series and the
/// per-meter non-coincident maxima for the same period.
///
/// Bound violations do not fail the calculation: an out-of-range factor can
/// mean bad data or an unusual but real operating condition, and a human
/// analyst makes that call. They are recorded in the report instead.
pub fn calculate(
    series: &LoadSeries,
    individual_maxima: &BTreeMap<String, f64>,
    policy: &DemandFactorPolicy,
) -> Result<FactorReport, AnalysisError> {
    let peak = series.peak().ok_or(AnalysisError::EmptySeries)?;
    if peak.total_kw <= 0.0 {
        return Err(AnalysisError::NonPositivePeak(peak.total_kw));
    }
    if individual_maxima.is_empty() {
        return Err(AnalysisError::NoMeterMaxima);
    }

    let peak_load = peak.total_kw;
    let peak_timestamp = peak.start;
    let average_load = series.mean().ok_or(AnalysisError::EmptySeries)?;
    let sum_individual_maxima: f64 = individual_maxima.values().sum();

    let load_factor = average_load / peak_load;
    let coincidence_factor = peak_load / sum_individual_maxima;
    let diversity_factor = sum_individual_maxima / peak_load;

    let total_connected_load = match policy {
        DemandFactorPolicy::SumOfMaxima => sum_individual_maxima,
        DemandFactorPolicy::ScaledEstimate { scale } => {
            if !(1.0..=2.0).contains(scale) {
                return Err(AnalysisError::ScaleOutOfRange(*scale));
            }
            peak_load * scale
        }
    };
    let demand_factor = peak_load / total_connected_load;

    let mut violations = Vec::new();
    if load_factor > 1.0 {
        violations.push(Reasonability::new("load_factor", load_factor, "must be <= 1"));
    }
    if coincidence_factor > 1.0 {
        violations.push(Reasonability::new(
            "coincidence_factor",
            coincidence_factor,
            "must be <= 1",
        ));
    }
    if diversity_factor < 1.0 {
        violations.push(Reasonability::new(
            "diversity_factor",
            diversity_factor,
            "must be >= 1",
        ));
    }
    if demand_factor > 1.0 {
        violations.push(Reasonability::new(
            "demand_factor",
            demand_factor,
            "must be <= 1",
        ));
    }
    let reciprocal_gap = (diversity_factor - 1.0 / coincidence_factor).abs();
    if reciprocal_gap > RECIPROCAL_TOLERANCE {
        violations.push(Reasonability::new(
            "diversity_vs_coincidence",
            reciprocal_gap,
            "reciprocal mismatch beyond tolerance",
        ));
    }

    // Both are Some: peak() already proved the series non-empty.
    let first = series.first_start().ok_or(AnalysisError::EmptySeries)?;
    let last = series.last_start().ok_or(AnalysisError::EmptySeries)?;
    let num_days = (last - first).whole_days() + 1;

    Ok(FactorReport {
        num_days,
        num_meters: individual_maxima.len(),
        average_load,
        peak_load,
        peak_timestamp,
        load_factor,
        diversity_factor,
        coincidence_factor,
        demand_factor,
        demand_factor_basis: policy.basis(),
        violations,
    })
}
