use crate::analysis::AnalysisError;
use crate::domain::{CapacityBand, CapacityDistribution, LoadSeries};

/// Partition a series' elapsed time by load as a percentage of a transformer
/// rating: below 85%, 85–100%, 100–120%, and above 120%.
///
/// Band hours are bucket counts times the interval width. The percentage
/// denominator is the elapsed span from the first bucket start through the
/// end of the last bucket, so gaps in the data show up as band percentages
/// summing below 100 instead of silently shrinking the denominator.
pub fn distribution(
    series: &LoadSeries,
    transformer_kva: f64,
) -> Result<CapacityDistribution, AnalysisError> {
    if transformer_kva <= 0.0 {
        return Err(AnalysisError::NonPositiveRating(transformer_kva));
    }
    let first = series.first_start().ok_or(AnalysisError::EmptySeries)?;
    let last = series.last_start().ok_or(AnalysisError::EmptySeries)?;

    let interval_hours = series.interval().whole_seconds() as f64 / 3600.0;
    let total_hours = (last - first).whole_seconds() as f64 / 3600.0 + interval_hours;

    let mut counts = [0usize; 4];
    for bucket in series.buckets() {
        let load_percentage = bucket.total_kw / transformer_kva * 100.0;
        let band = if load_percentage < 85.0 {
            0
        } else if load_percentage < 100.0 {
            1
        } else if load_percentage < 120.0 {
            2
        } else {
            3
        };
        counts[band] += 1;
    }

    let band = |label: &str, count: usize| {
        let hours = count as f64 * interval_hours;
        CapacityBand {
            label: label.to_string(),
            hours,
            days: hours / 24.0,
            percent: hours / total_hours * 100.0,
        }
    };

    Ok(CapacityDistribution {
        transformer_kva,
        total_hours,
        below_85: band("Below 85%", counts[0]),
        from_85_to_100: band("Between 85% and 100%", counts[1]),
        from_100_to_120: band("Between 100% and 120%", counts[2]),
        above_120: band("Exceeds 120%", counts[3]),
    })
}
