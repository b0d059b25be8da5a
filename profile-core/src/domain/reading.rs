use time::PrimitiveDateTime;

/// One single-phase interval read: real power over a fixed window, stamped
/// with the window start. Timestamps are naive local time, matching the
/// metering head-end exports.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub meter_id: String,
    pub ts: PrimitiveDateTime,
    pub kw: f64,
}

/// One multi-phase register row for a metered site: delivered and received
/// real/apparent power over the `[start, end)` window, in raw register units
/// (scaled to engineering units only at conversion time).
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterRead {
    /// Record identifier from the export, kept verbatim for diagnostics.
    pub record: String,
    pub start: PrimitiveDateTime,
    pub end: PrimitiveDateTime,
    pub kw_del: f64,
    pub kw_rec: f64,
    pub kva_del: f64,
    pub kva_rec: f64,
}
