//! Trait and types for the probe point storage the pipeline runs against.

use crate::model::{ProbePoint, ZoneId};
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::BTreeSet;

/// Row filter applied when loading a day: one vehicle class, optionally
/// restricted to the zones of the reference table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointFilter {
    pub vehicle_class: Option<String>,
    pub zones: Option<BTreeSet<ZoneId>>,
}

impl PointFilter {
    pub fn new(vehicle_class: impl Into<String>, zones: impl IntoIterator<Item = ZoneId>) -> Self {
        Self {
            vehicle_class: Some(vehicle_class.into()),
            zones: Some(zones.into_iter().collect()),
        }
    }

    pub fn matches(&self, point: &ProbePoint) -> bool {
        let class_ok = self
            .vehicle_class
            .as_deref()
            .is_none_or(|c| c == point.vehicle_class);
        let zone_ok = self
            .zones
            .as_ref()
            .is_none_or(|zones| zones.contains(&point.zone_id));
        class_ok && zone_ok
    }
}

/// Abstraction over the store holding ingested probe points (a CSV partition
/// directory or a relational database).
#[async_trait::async_trait]
pub trait ProbeStore: Send + Sync {
    /// Inserts cleaned points and returns how many were written.
    async fn insert_points(&self, points: &[ProbePoint]) -> Result<usize>;

    /// Returns every point of `date` accepted by `filter`, ordered by time.
    async fn load_day(&self, date: NaiveDate, filter: &PointFilter) -> Result<Vec<ProbePoint>>;
}
