//! Link-weighted FCD estimator (speed, flow, density per zone interval).
//!
//! For each interval:
//! - speed is the mean of per-link average speeds weighted by link length;
//! - each link contributes `max(vehicles * length_km, avg_speed * width_h)`,
//!   and flow is the sum of contributions over `sum(length_km) * width_h`;
//! - density is flow / speed, or [`DENSITY_SENTINEL`] when speed is not
//!   positive.
//!
//! The `avg_speed * width_h` term mixes units (km vs veh*km). It is kept as is
//! so the output stays comparable with historical FCD files.

use crate::analyzers::utility::{ratio_or, weighted_mean};
use crate::model::{FlowDensityRecord, IntervalWidth, LinkId, ProbePoint, VehicleId, ZoneId};
use crate::reference::LinkTable;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Density reported when the interval speed is zero or negative.
pub const DENSITY_SENTINEL: f64 = 143.0;

#[derive(Default)]
struct LinkInterval {
    speed_sum: f64,
    samples: usize,
    vehicles: BTreeSet<VehicleId>,
}

/// Per-link statistics of one interval, joined with the link length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkSample {
    pub link_id: LinkId,
    pub avg_speed: f64,
    pub vehicle_count: usize,
    pub length_meters: f64,
}

impl LinkSample {
    /// Lower-bound flow contribution of the link.
    pub fn estimator(&self, interval: IntervalWidth) -> f64 {
        let length_km = self.length_meters / 1000.0;
        (self.vehicle_count as f64 * length_km).max(self.avg_speed * interval.hours())
    }
}

/// Combines the link samples of one interval into a record.
pub fn interval_record(zone_id: ZoneId, start: NaiveDateTime, links: &[LinkSample], interval: IntervalWidth) -> FlowDensityRecord {
    let fcd_speed = weighted_mean(links.iter().map(|l| (l.avg_speed, l.length_meters)));

    let estimator_sum: f64 = links.iter().map(|l| l.estimator(interval)).sum();
    let length_km_sum: f64 = links.iter().map(|l| l.length_meters / 1000.0).sum();
    let fcd_flow = ratio_or(estimator_sum, length_km_sum * interval.hours(), 0.0);

    let fcd_density = if fcd_speed > 0.0 {
        ratio_or(fcd_flow, fcd_speed, DENSITY_SENTINEL)
    } else {
        DENSITY_SENTINEL
    };

    FlowDensityRecord {
        zone_id,
        interval: start,
        fcd_speed,
        fcd_flow,
        fcd_density,
    }
}

/// Estimates one record per interval of `date` that has at least one point
/// on a link of known length. Intervals without such points are absent.
pub fn estimate_zone_day<'a>(
    zone_id: ZoneId,
    points: impl IntoIterator<Item = &'a ProbePoint>,
    date: NaiveDate,
    links: &LinkTable,
    interval: IntervalWidth,
) -> Vec<FlowDensityRecord> {
    let mut grouped: BTreeMap<NaiveDateTime, BTreeMap<LinkId, LinkInterval>> = BTreeMap::new();
    let mut unknown_links = 0usize;

    for point in points {
        if point.timestamp.date() != date {
            continue;
        }
        if links.length_meters(point.link_id).is_none() {
            unknown_links += 1;
            continue;
        }
        let acc = grouped
            .entry(interval.floor(point.timestamp))
            .or_default()
            .entry(point.link_id)
            .or_default();
        acc.speed_sum += point.velocity;
        acc.samples += 1;
        acc.vehicles.insert(point.vehicle_id);
    }

    if unknown_links > 0 {
        debug!(zone_id, unknown_links, "Points on links without length were skipped");
    }

    grouped
        .into_iter()
        .map(|(start, per_link)| {
            let samples: Vec<LinkSample> = per_link
                .into_iter()
                .filter_map(|(link_id, acc)| {
                    Some(LinkSample {
                        link_id,
                        avg_speed: ratio_or(acc.speed_sum, acc.samples as f64, 0.0),
                        vehicle_count: acc.vehicles.len(),
                        length_meters: links.length_meters(link_id)?,
                    })
                })
                .collect();
            interval_record(zone_id, start, &samples, interval)
        })
        .collect()
}
