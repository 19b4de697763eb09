//! Read-only point projection for map clients: points of one vehicle,
//! optionally one trip, as a GeoJSON feature collection.

use crate::analyzers::trips::vehicle_trip_ids;
use crate::model::{LinkId, ProbePoint, TripId, VehicleId, ZoneId};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointQuery {
    pub vehicle_id: VehicleId,
    pub trip_id: Option<TripId>,
}

impl PointQuery {
    pub fn matches(&self, point: &ProbePoint) -> bool {
        point.vehicle_id == self.vehicle_id
            && self.trip_id.is_none_or(|t| point.trip_id == Some(t))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub geometry: Geometry,
    pub properties: PointProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointProperties {
    pub gid: Option<i64>,
    pub direction: f64,
    pub velocity: f64,
    pub dt: NaiveDateTime,
    pub status: i32,
    pub vehicle_id: VehicleId,
    pub vehicle_class: String,
    pub zone_id: ZoneId,
    pub trip_id: Option<TripId>,
    pub fid: LinkId,
    pub ts_insert: Option<NaiveDateTime>,
}

impl From<&ProbePoint> for Feature {
    fn from(p: &ProbePoint) -> Self {
        Feature {
            kind: "Feature",
            geometry: Geometry {
                kind: "Point",
                coordinates: [p.x, p.y],
            },
            properties: PointProperties {
                gid: p.gid,
                direction: p.direction,
                velocity: p.velocity,
                dt: p.timestamp,
                status: p.status,
                vehicle_id: p.vehicle_id,
                vehicle_class: p.vehicle_class.clone(),
                zone_id: p.zone_id,
                trip_id: p.trip_id,
                fid: p.link_id,
                ts_insert: p.inserted_at,
            },
        }
    }
}

/// Features of the points matching `query`, in time order. `None` when
/// nothing matches.
pub fn project(points: &[ProbePoint], query: PointQuery) -> Option<FeatureCollection> {
    let mut selected: Vec<&ProbePoint> = points.iter().filter(|p| query.matches(p)).collect();
    if selected.is_empty() {
        return None;
    }
    selected.sort_by_key(|p| p.timestamp);
    Some(FeatureCollection {
        kind: "FeatureCollection",
        features: selected.into_iter().map(Feature::from).collect(),
    })
}

/// Body of the trips lookup: `{"trips": [..]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripList {
    pub vehicle_id: VehicleId,
    pub trips: Vec<TripId>,
}

pub fn trip_list(points: &[ProbePoint], vehicle_id: VehicleId) -> TripList {
    TripList {
        vehicle_id,
        trips: vehicle_trip_ids(points, vehicle_id),
    }
}

/// Distinct vehicles present in `points`, ascending.
pub fn vehicle_ids(points: &[ProbePoint]) -> Vec<VehicleId> {
    let set: BTreeSet<VehicleId> = points.iter().map(|p| p.vehicle_id).collect();
    set.into_iter().collect()
}
