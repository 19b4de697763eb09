//! Origin/destination matrix, zone traffic totals and ranking.

use crate::analyzers::types::ZoneRank;
use crate::model::{OriginDestinationRecord, ZoneId};
use std::collections::{BTreeMap, BTreeSet};

/// Default number of zones shown in the top matrix.
pub const DEFAULT_TOP_ZONES: usize = 10;

/// Trip counts keyed by `(origin_zone, destination_zone)`. Only non-zero cells
/// are stored, so all-zero rows and columns never show up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OdMatrix {
    cells: BTreeMap<(ZoneId, ZoneId), u64>,
}

impl OdMatrix {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a OriginDestinationRecord>) -> Self {
        let mut cells = BTreeMap::new();
        for record in records {
            *cells
                .entry((record.origin_zone, record.destination_zone))
                .or_insert(0) += 1;
        }
        Self { cells }
    }

    pub fn count(&self, origin: ZoneId, destination: ZoneId) -> u64 {
        self.cells.get(&(origin, destination)).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn total_trips(&self) -> u64 {
        self.cells.values().sum()
    }

    /// Zones with at least one outgoing trip, ascending.
    pub fn origins(&self) -> Vec<ZoneId> {
        let set: BTreeSet<ZoneId> = self.cells.keys().map(|(o, _)| *o).collect();
        set.into_iter().collect()
    }

    /// Zones with at least one incoming trip, ascending.
    pub fn destinations(&self) -> Vec<ZoneId> {
        let set: BTreeSet<ZoneId> = self.cells.keys().map(|(_, d)| *d).collect();
        set.into_iter().collect()
    }

    /// `(outgoing, incoming)` per zone. A trip that starts and ends in the
    /// same zone counts on both sides.
    pub fn zone_traffic(&self) -> BTreeMap<ZoneId, (u64, u64)> {
        let mut traffic: BTreeMap<ZoneId, (u64, u64)> = BTreeMap::new();
        for (&(origin, destination), &count) in &self.cells {
            traffic.entry(origin).or_default().0 += count;
            traffic.entry(destination).or_default().1 += count;
        }
        traffic
    }

    /// Zones by total traffic, descending; ties by ascending zone id.
    pub fn ranking(&self) -> Vec<ZoneRank> {
        let mut zones: Vec<(ZoneId, u64, u64)> = self
            .zone_traffic()
            .into_iter()
            .map(|(zone_id, (outgoing, incoming))| (zone_id, outgoing, incoming))
            .collect();
        zones.sort_by(|a, b| (b.1 + b.2).cmp(&(a.1 + a.2)).then(a.0.cmp(&b.0)));

        zones
            .into_iter()
            .enumerate()
            .map(|(i, (zone_id, outgoing, incoming))| ZoneRank {
                rank: i + 1,
                zone_id,
                outgoing,
                incoming,
                total: outgoing + incoming,
            })
            .collect()
    }

    /// Square matrix over the `k` highest ranked zones, in ranking order.
    pub fn top_k(&self, k: usize) -> (Vec<ZoneId>, Vec<Vec<u64>>) {
        let zones: Vec<ZoneId> = self.ranking().into_iter().take(k).map(|r| r.zone_id).collect();
        let rows = zones
            .iter()
            .map(|&o| zones.iter().map(|&d| self.count(o, d)).collect())
            .collect();
        (zones, rows)
    }

    /// Pruned matrix as CSV header and rows: one row per origin, one column
    /// per destination.
    pub fn to_table(&self) -> (Vec<String>, Vec<Vec<String>>) {
        let destinations = self.destinations();
        let rows = self
            .origins()
            .into_iter()
            .map(|o| {
                std::iter::once(o.to_string())
                    .chain(destinations.iter().map(|&d| self.count(o, d).to_string()))
                    .collect()
            })
            .collect();
        (table_header(&destinations), rows)
    }
}

/// Top-K matrix in the same layout as [`OdMatrix::to_table`].
pub fn top_k_table(zones: &[ZoneId], rows: &[Vec<u64>]) -> (Vec<String>, Vec<Vec<String>>) {
    let body = zones
        .iter()
        .zip(rows)
        .map(|(zone, counts)| {
            std::iter::once(zone.to_string())
                .chain(counts.iter().map(|c| c.to_string()))
                .collect()
        })
        .collect();
    (table_header(zones), body)
}

fn table_header(destinations: &[ZoneId]) -> Vec<String> {
    std::iter::once("origin_zone".to_string())
        .chain(destinations.iter().map(|d| d.to_string()))
        .collect()
}
