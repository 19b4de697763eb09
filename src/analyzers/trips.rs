//! Trip segmentation and origin/destination extraction.
//!
//! Points are stably sorted by `(vehicle_id, timestamp)`. A point opens a new
//! trip when it is the first of its vehicle or follows the previous point of
//! the same vehicle by strictly more than the gap threshold. Raw trip ids are
//! the running count of those boundaries. Trips with a single point are then
//! dropped and the survivors renumbered so ids stay contiguous.

use crate::model::{OriginDestinationRecord, ProbePoint, TripId, VehicleId};
use std::ops::Range;

/// Default gap, in seconds, above which a new trip starts.
pub const DEFAULT_TRIP_GAP_SECONDS: i64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripSegmenter {
    gap_seconds: i64,
}

impl Default for TripSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_TRIP_GAP_SECONDS)
    }
}

/// Result of segmenting one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segmentation {
    /// Points of surviving trips, tagged with their trip id, in
    /// `(vehicle_id, timestamp)` order.
    pub points: Vec<ProbePoint>,
    /// One record per surviving trip, in trip id order.
    pub origin_destination: Vec<OriginDestinationRecord>,
    /// Points dropped because their trip had a single point.
    pub discarded_points: usize,
    /// Id to hand to the next batch so ids stay unique across batches.
    pub next_trip_id: TripId,
}

impl TripSegmenter {
    pub fn new(gap_seconds: i64) -> Self {
        Self { gap_seconds }
    }

    /// Boundary flag per point of an already sorted slice.
    pub fn boundaries(&self, sorted: &[ProbePoint]) -> Vec<bool> {
        let gap_ms = self.gap_seconds * 1000;
        sorted
            .iter()
            .enumerate()
            .map(|(i, point)| match i.checked_sub(1).map(|p| &sorted[p]) {
                Some(prev) if prev.vehicle_id == point.vehicle_id => {
                    (point.timestamp - prev.timestamp).num_milliseconds() > gap_ms
                }
                _ => true,
            })
            .collect()
    }

    /// Splits `points` into trips and numbers the survivors from
    /// `first_trip_id` upwards.
    pub fn segment(&self, mut points: Vec<ProbePoint>, first_trip_id: TripId) -> Segmentation {
        points.sort_by(|a, b| {
            a.vehicle_id
                .cmp(&b.vehicle_id)
                .then(a.timestamp.cmp(&b.timestamp))
        });

        let flags = self.boundaries(&points);
        let raw_ids: Vec<TripId> = flags
            .iter()
            .scan(0, |count, &flag| {
                *count += TripId::from(flag);
                Some(*count)
            })
            .collect();

        let mut next_trip_id = first_trip_id;
        let mut discarded_points = 0;
        let mut origin_destination = Vec::new();
        let mut kept = vec![false; points.len()];

        for run in runs(&raw_ids) {
            if run.len() < 2 {
                discarded_points += run.len();
                continue;
            }
            let trip_id = next_trip_id;
            next_trip_id += 1;
            for idx in run.clone() {
                points[idx].trip_id = Some(trip_id);
                kept[idx] = true;
            }
            origin_destination.push(od_record(&points[run.start], &points[run.end - 1], run.len(), trip_id));
        }

        let points = points
            .into_iter()
            .zip(kept)
            .filter_map(|(p, keep)| keep.then_some(p))
            .collect();

        Segmentation {
            points,
            origin_destination,
            discarded_points,
            next_trip_id,
        }
    }
}

/// Contiguous index ranges sharing the same raw trip id.
fn runs(ids: &[TripId]) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = 0;
    for i in 1..=ids.len() {
        if i == ids.len() || ids[i] != ids[start] {
            out.push(start..i);
            start = i;
        }
    }
    out
}

fn od_record(first: &ProbePoint, last: &ProbePoint, point_count: usize, trip_id: TripId) -> OriginDestinationRecord {
    OriginDestinationRecord {
        gid: first.gid,
        direction: first.direction,
        velocity: first.velocity,
        started_at: first.timestamp,
        status: first.status,
        vehicle_id: first.vehicle_id,
        vehicle_class: first.vehicle_class.clone(),
        zone_id: first.zone_id,
        link_id: first.link_id,
        x1: first.x,
        y1: first.y,
        x2: last.x,
        y2: last.y,
        origin_zone: first.zone_id,
        destination_zone: last.zone_id,
        ended_at: last.timestamp,
        point_count,
        trip_id,
    }
}

/// Distinct trip ids recorded for a vehicle, ascending.
pub fn vehicle_trip_ids(points: &[ProbePoint], vehicle_id: VehicleId) -> Vec<TripId> {
    let mut ids: Vec<TripId> = points
        .iter()
        .filter(|p| p.vehicle_id == vehicle_id)
        .filter_map(|p| p.trip_id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}
