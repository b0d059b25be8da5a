pub mod capacity;
pub mod factors;
pub mod resample;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("resampling produced an empty series")]
    EmptySeries,
    #[error("peak load {0} is not positive; factors are undefined")]
    NonPositivePeak(f64),
    #[error("no per-meter maxima available; factors are undefined")]
    NoMeterMaxima,
    #[error("transformer rating {0} must be positive")]
    NonPositiveRating(f64),
    #[error("connected-load scale {0} outside the supported 1.0..=2.0 range")]
    ScaleOutOfRange(f64),
}
