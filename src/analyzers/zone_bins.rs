//! Zone/time aggregation: distinct vehicles and mean speed per fixed bin.
//!
//! Every bin of the day is materialized, empty ones with count 0 and speed 0,
//! so each zone always yields a series of the same length.

use crate::analyzers::utility::ratio_or;
use crate::model::{
    CoarseFlowDensity, IntervalWidth, ProbePoint, VehicleId, Zone, ZoneBinRow, ZoneId, ZoneTimeBin,
};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Default)]
struct Bucket {
    vehicles: BTreeSet<VehicleId>,
    speed_sum: f64,
    samples: usize,
}

/// Bins `points` of one zone over the full grid of `date`. Points that fall
/// outside the day are ignored.
pub fn bin_zone<'a>(
    zone_id: ZoneId,
    points: impl IntoIterator<Item = &'a ProbePoint>,
    date: NaiveDate,
    interval: IntervalWidth,
) -> Vec<ZoneTimeBin> {
    let mut buckets: BTreeMap<NaiveDateTime, Bucket> = BTreeMap::new();
    for point in points {
        let bucket = buckets.entry(interval.floor(point.timestamp)).or_default();
        bucket.vehicles.insert(point.vehicle_id);
        bucket.speed_sum += point.velocity;
        bucket.samples += 1;
    }

    interval
        .day_grid(date)
        .into_iter()
        .map(|interval_start| match buckets.get(&interval_start) {
            Some(bucket) => ZoneTimeBin {
                zone_id,
                interval_start,
                vehicle_count: bucket.vehicles.len() as u32,
                mean_speed: ratio_or(bucket.speed_sum, bucket.samples as f64, 0.0),
            },
            None => ZoneTimeBin {
                zone_id,
                interval_start,
                vehicle_count: 0,
                mean_speed: 0.0,
            },
        })
        .collect()
}

/// Zone-length estimator: `density = count * scale_factor / zone_length`,
/// `flow = density * mean_speed`. A non-positive length gives zeros.
pub fn coarse_flow_density(bin: &ZoneTimeBin, zone_length: f64, scale_factor: f64) -> CoarseFlowDensity {
    let density = ratio_or(bin.vehicle_count as f64 * scale_factor, zone_length, 0.0);
    let flow = density * bin.mean_speed;
    CoarseFlowDensity {
        density,
        flow: if flow.is_finite() { flow } else { 0.0 },
    }
}

/// Full day of output rows for one zone.
pub fn aggregate_zone_day<'a>(
    zone: &Zone,
    points: impl IntoIterator<Item = &'a ProbePoint>,
    date: NaiveDate,
    interval: IntervalWidth,
    scale_factor: f64,
) -> Vec<ZoneBinRow> {
    bin_zone(zone.zone_id, points, date, interval)
        .iter()
        .map(|bin| ZoneBinRow::new(bin, zone.length, coarse_flow_density(bin, zone.length, scale_factor)))
        .collect()
}
