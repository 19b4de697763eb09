//! Records flowing through the pipeline.
//!
//! Probe points are produced by ingestion and never mutated afterwards except
//! for the trip id tag. Everything else is derived per run.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type VehicleId = i64;
pub type ZoneId = i64;
pub type LinkId = i64;
pub type TripId = i64;

const SECONDS_PER_DAY: i64 = 86_400;

/// One cleaned probe ping. Column names follow the stored table layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbePoint {
    pub gid: Option<i64>,
    pub x: f64,
    pub y: f64,
    pub direction: f64,
    pub velocity: f64,
    #[serde(rename = "dt")]
    pub timestamp: NaiveDateTime,
    pub status: i32,
    pub vehicle_id: VehicleId,
    pub vehicle_class: String,
    pub zone_id: ZoneId,
    pub trip_id: Option<TripId>,
    #[serde(rename = "fid")]
    pub link_id: LinkId,
    #[serde(rename = "ts_insert")]
    pub inserted_at: Option<NaiveDateTime>,
}

/// Distinct-vehicle count and mean speed for one zone and one interval.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneTimeBin {
    pub zone_id: ZoneId,
    pub interval_start: NaiveDateTime,
    pub vehicle_count: u32,
    pub mean_speed: f64,
}

/// Zone-length based density/flow pair. Not to be confused with the
/// link-weighted [`FlowDensityRecord`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoarseFlowDensity {
    pub density: f64,
    pub flow: f64,
}

/// Output row of the zone/time aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneBinRow {
    pub zone_id: ZoneId,
    pub interval_start: NaiveDateTime,
    pub vehicle_count: u32,
    pub mean_speed: f64,
    pub zone_length: f64,
    pub coarse_density: f64,
    pub coarse_flow: f64,
}

impl ZoneBinRow {
    pub fn new(bin: &ZoneTimeBin, zone_length: f64, coarse: CoarseFlowDensity) -> Self {
        Self {
            zone_id: bin.zone_id,
            interval_start: bin.interval_start,
            vehicle_count: bin.vehicle_count,
            mean_speed: bin.mean_speed,
            zone_length,
            coarse_density: coarse.density,
            coarse_flow: coarse.flow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkSegment {
    pub link_id: LinkId,
    pub length_meters: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Zone {
    pub zone_id: ZoneId,
    pub length: f64,
}

/// Link-weighted FCD estimate for one zone interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDensityRecord {
    pub zone_id: ZoneId,
    pub interval: NaiveDateTime,
    pub fcd_speed: f64,
    pub fcd_flow: f64,
    pub fcd_density: f64,
}

/// Origin and destination of one surviving trip. Trip attributes come from
/// the first point; `x2`/`y2`/`destination_zone`/`ended_at` from the last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginDestinationRecord {
    pub gid: Option<i64>,
    pub direction: f64,
    pub velocity: f64,
    #[serde(rename = "dt")]
    pub started_at: NaiveDateTime,
    pub status: i32,
    pub vehicle_id: VehicleId,
    pub vehicle_class: String,
    pub zone_id: ZoneId,
    #[serde(rename = "fid")]
    pub link_id: LinkId,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub origin_zone: ZoneId,
    pub destination_zone: ZoneId,
    pub ended_at: NaiveDateTime,
    pub point_count: usize,
    pub trip_id: TripId,
}

/// Fixed bin width used by the aggregator and the FCD estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalWidth {
    seconds: i64,
}

impl IntervalWidth {
    pub fn from_seconds(seconds: i64) -> Option<Self> {
        (seconds > 0).then_some(Self { seconds })
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Width expressed as a fraction of an hour (5 min -> 1/12).
    pub fn hours(&self) -> f64 {
        self.seconds as f64 / 3600.0
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds)
    }

    /// Floors `ts` to the start of its bin, bins aligned to midnight.
    pub fn floor(&self, ts: NaiveDateTime) -> NaiveDateTime {
        let midnight = ts.date().and_time(NaiveTime::MIN);
        let since = (ts - midnight).num_seconds();
        midnight + Duration::seconds(since - since.rem_euclid(self.seconds))
    }

    /// Every bin start of `date`, including bins no data will fall into.
    pub fn day_grid(&self, date: NaiveDate) -> Vec<NaiveDateTime> {
        let midnight = date.and_time(NaiveTime::MIN);
        let count = (SECONDS_PER_DAY + self.seconds - 1) / self.seconds;
        (0..count)
            .map(|k| midnight + Duration::seconds(k * self.seconds))
            .collect()
    }
}

impl Default for IntervalWidth {
    fn default() -> Self {
        Self { seconds: 300 }
    }
}

impl fmt::Display for IntervalWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.seconds % 3600 == 0 {
            write!(f, "{}h", self.seconds / 3600)
        } else if self.seconds % 60 == 0 {
            write!(f, "{}min", self.seconds / 60)
        } else {
            write!(f, "{}s", self.seconds)
        }
    }
}

impl FromStr for IntervalWidth {
    type Err = String;

    /// Accepts pandas-style frequency strings: `30s`, `5min`, `5T`, `1h`, `1H`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (digits, unit) = s.split_at(split);
        let amount: i64 = if digits.is_empty() {
            1
        } else {
            digits
                .parse()
                .map_err(|e| format!("invalid interval '{s}': {e}"))?
        };
        let factor = match unit {
            "s" | "S" | "sec" => 1,
            "min" | "T" | "m" => 60,
            "h" | "H" => 3600,
            other => return Err(format!("unsupported interval unit '{other}' in '{s}'")),
        };
        IntervalWidth::from_seconds(amount * factor)
            .ok_or_else(|| format!("interval '{s}' must be positive"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 9, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_parse_interval_units() {
        assert_eq!("5min".parse::<IntervalWidth>().unwrap().seconds(), 300);
        assert_eq!("5T".parse::<IntervalWidth>().unwrap().seconds(), 300);
        assert_eq!("1h".parse::<IntervalWidth>().unwrap().seconds(), 3600);
        assert_eq!("30s".parse::<IntervalWidth>().unwrap().seconds(), 30);
        assert_eq!("min".parse::<IntervalWidth>().unwrap().seconds(), 60);
        assert!("0min".parse::<IntervalWidth>().is_err());
        assert!("5 parsecs".parse::<IntervalWidth>().is_err());
    }

    #[test]
    fn test_interval_hours() {
        let width: IntervalWidth = "5min".parse().unwrap();
        assert!((width.hours() - 1.0 / 12.0).abs() < 1e-12);
        assert_eq!(width.to_string(), "5min");
    }

    #[test]
    fn test_floor_to_bin() {
        let width = IntervalWidth::default();
        assert_eq!(width.floor(at(10, 7, 59)), at(10, 5, 0));
        assert_eq!(width.floor(at(10, 5, 0)), at(10, 5, 0));
        assert_eq!(width.floor(at(0, 0, 1)), at(0, 0, 0));
    }

    #[test]
    fn test_day_grid_is_complete() {
        let date = NaiveDate::from_ymd_opt(2019, 9, 1).unwrap();
        let grid = IntervalWidth::default().day_grid(date);
        assert_eq!(grid.len(), 288);
        assert_eq!(grid[0], at(0, 0, 0));
        assert_eq!(grid[287], at(23, 55, 0));

        let hourly: IntervalWidth = "1h".parse().unwrap();
        assert_eq!(hourly.day_grid(date).len(), 24);
    }
}
