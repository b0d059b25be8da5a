pub mod analysis;
pub mod domain;

pub use analysis::AnalysisError;
pub use domain::{FactorReport, LoadSeries};
