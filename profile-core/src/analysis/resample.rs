use std::collections::{BTreeMap, BTreeSet};

use time::{Duration, PrimitiveDateTime, Time};

use crate::domain::{
    IntervalBucket, LoadSeries, Polarity, Reading, RegisterRead, SitePower, SiteScaling,
    SystemPower,
};

/// Floor a timestamp to the start of its fixed-width interval. The width is
/// measured from midnight, so it must divide a day evenly (15 minutes, one
/// hour, and the like).
pub fn floor_to_interval(ts: PrimitiveDateTime, interval: Duration) -> PrimitiveDateTime {
    let width = interval.whole_seconds().max(1);
    let since_midnight =
        i64::from(ts.hour()) * 3600 + i64::from(ts.minute()) * 60 + i64::from(ts.second());
    let floored = since_midnight - since_midnight % width;
    PrimitiveDateTime::new(ts.date(), Time::MIDNIGHT + Duration::seconds(floored))
}

/// Bucket readings into fixed-width intervals, summing power within each
/// bucket. Two reads landing in one bucket add, the way sub-metered reads
/// combine into a single system reading. Buckets are only produced for
/// occupied intervals.
pub fn resample(readings: &[Reading], interval: Duration) -> LoadSeries {
    let mut sums: BTreeMap<PrimitiveDateTime, (f64, BTreeSet<&str>)> = BTreeMap::new();
    for r in readings {
        let start = floor_to_interval(r.ts, interval);
        let entry = sums.entry(start).or_default();
        entry.0 += r.kw;
        entry.1.insert(r.meter_id.as_str());
    }

    let buckets = sums
        .into_iter()
        .map(|(start, (total_kw, meters))| IntervalBucket {
            start,
            total_kw,
            meter_count: meters.len() as u32,
        })
        .collect();
    LoadSeries::from_sorted(interval, buckets)
}

/// Each meter's own non-coincident maximum demand: the highest bucket of the
/// meter's individual resampled series, on the same interval grid as the
/// system series.
pub fn per_meter_maxima(readings: &[Reading], interval: Duration) -> BTreeMap<String, f64> {
    let mut per_meter: BTreeMap<&str, BTreeMap<PrimitiveDateTime, f64>> = BTreeMap::new();
    for r in readings {
        let start = floor_to_interval(r.ts, interval);
        *per_meter
            .entry(r.meter_id.as_str())
            .or_default()
            .entry(start)
            .or_insert(0.0) += r.kw;
    }

    per_meter
        .into_iter()
        .map(|(meter, buckets)| {
            let max = buckets.values().copied().fold(f64::NEG_INFINITY, f64::max);
            (meter.to_string(), max)
        })
        .collect()
}

/// Convert one site's deduplicated register rows to engineering units and
/// net them. Power factor is defined as exactly 0.0 when net apparent power
/// is zero.
pub fn site_net_series(rows: &[RegisterRead], scaling: &SiteScaling) -> Vec<SitePower> {
    let to_mw = scaling.multiplier / 1_000_000.0;
    let received_sign = match scaling.polarity {
        Polarity::Load => 1.0,
        Polarity::Generation => -1.0,
    };

    rows.iter()
        .map(|r| {
            let mw_del = r.kw_del * to_mw;
            let mw_rec = r.kw_rec * to_mw * received_sign;
            let mva_del = r.kva_del * to_mw;
            let mva_rec = r.kva_rec * to_mw * received_sign;
            let mw_net = mw_del + mw_rec;
            let mva_net = mva_del + mva_rec;
            let pf_net = if mva_net == 0.0 { 0.0 } else { mw_net / mva_net };
            SitePower {
                ts: r.start,
                mw_del,
                mw_rec,
                mva_del,
                mva_rec,
                mw_net,
                mva_net,
                pf_net,
            }
        })
        .collect()
}

/// Merge site series into a system series, outer-joined on the interval
/// start: a site with no read in an interval contributes zero instead of
/// dropping the row.
pub fn aggregate_sites(sites: &[Vec<SitePower>]) -> Vec<SystemPower> {
    let mut sums: BTreeMap<PrimitiveDateTime, (f64, f64, u32)> = BTreeMap::new();
    for series in sites {
        for p in series {
            let entry = sums.entry(p.ts).or_default();
            entry.0 += p.mw_net;
            entry.1 += p.mva_net;
            entry.2 += 1;
        }
    }

    sums.into_iter()
        .map(|(ts, (mw_net, mva_net, site_count))| SystemPower {
            ts,
            mw_net,
            mva_net,
            pf_net: if mva_net == 0.0 { 0.0 } else { mw_net / mva_net },
            site_count,
        })
        .collect()
}
