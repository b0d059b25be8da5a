pub mod reading;
pub mod report;
pub mod series;

pub use reading::{Reading, RegisterRead};
pub use report::{
    CapacityBand, CapacityDistribution, DemandFactorPolicy, FactorReport, Reasonability,
};
pub use series::{
    IntervalBucket, LoadSeries, Polarity, SitePower, SiteScaling, SystemPower,
};
