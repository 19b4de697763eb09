//! Data types produced by the analysis pipeline.

use crate::model::ZoneId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One of the most sampled zones of a day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseZone {
    pub date: NaiveDate,
    pub zone_id: ZoneId,
    pub count: usize,
}

/// Position of a zone in the traffic ranking (incoming + outgoing trips).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRank {
    pub rank: usize,
    pub zone_id: ZoneId,
    pub outgoing: u64,
    pub incoming: u64,
    pub total: u64,
}

/// Least-squares fundamental diagram of one zone.
///
/// `flow = flow_a * k^2 + flow_b * k + flow_c` and
/// `speed = speed_slope * k + speed_intercept`, with `k` the FCD density.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramFit {
    pub zone_id: ZoneId,
    pub samples: usize,
    pub flow_a: f64,
    pub flow_b: f64,
    pub flow_c: f64,
    /// Spread of the flow residuals around the fitted parabola.
    pub flow_residual_stddev: f64,
    pub speed_slope: f64,
    pub speed_intercept: f64,
    /// Density at the top of the flow parabola, when it opens downwards.
    pub critical_density: Option<f64>,
    /// Flow at the critical density.
    pub capacity: Option<f64>,
    /// Density at which the linear speed model reaches zero.
    pub jam_density: Option<f64>,
}

/// Per-day outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub points: usize,
    pub zones_with_data: usize,
    pub fcd_records: usize,
    pub trips: usize,
    pub discarded_points: usize,
}

/// Written as `run_summary.json`. Carries no wall-clock timestamps so that
/// re-running the same window reproduces it exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub interval: String,
    pub trip_gap_seconds: i64,
    pub vehicle_type: Option<String>,
    pub days: Vec<DaySummary>,
    pub skipped_days: Vec<NaiveDate>,
    pub total_points: usize,
    pub total_trips: usize,
    pub ranked_zones: usize,
}
