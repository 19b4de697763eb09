use crate::analyzers::dense_zones::dense_zones;
use crate::analyzers::diagram::fit_all;
use crate::analyzers::fcd::estimate_zone_day;
use crate::analyzers::od_matrix::{OdMatrix, top_k_table};
use crate::analyzers::trips::{Segmentation, TripSegmenter};
use crate::analyzers::types::{DaySummary, DenseZone, DiagramFit, RunSummary, ZoneRank};
use crate::analyzers::zone_bins::aggregate_zone_day;
use crate::config::AnalysisSettings;
use crate::model::{FlowDensityRecord, OriginDestinationRecord, ProbePoint, TripId, ZoneBinRow, ZoneId};
use crate::output::{read_records, write_records, write_table};
use crate::reference::ReferenceTables;
use crate::services::probe_store::{PointFilter, ProbeStore};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const FCD_DIR: &str = "fcd";
pub const ORIGIN_DESTINATION_FILE: &str = "origin_destination.csv";
pub const TRIP_POINTS_FILE: &str = "trip_points.csv";
pub const OD_MATRIX_FILE: &str = "od_matrix.csv";
pub const OD_MATRIX_TOP_FILE: &str = "od_matrix_top.csv";
pub const ZONE_RANKING_FILE: &str = "zone_ranking.csv";
pub const DENSE_ZONES_FILE: &str = "dense_zones.csv";
pub const FUNDAMENTAL_DIAGRAM_FILE: &str = "fundamental_diagram.csv";
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

/// Everything derived from one day of points.
#[derive(Debug, Clone)]
pub struct DayAnalysis {
    pub date: NaiveDate,
    pub points: usize,
    pub zone_rows: Vec<ZoneBinRow>,
    pub fcd: BTreeMap<ZoneId, Vec<FlowDensityRecord>>,
    pub trips: Segmentation,
    pub dense: Vec<DenseZone>,
}

impl DayAnalysis {
    pub fn summary(&self) -> DaySummary {
        DaySummary {
            date: self.date,
            points: self.points,
            zones_with_data: self.fcd.len(),
            fcd_records: self.fcd.values().map(Vec::len).sum(),
            trips: self.trips.origin_destination.len(),
            discarded_points: self.trips.discarded_points,
        }
    }
}

/// Where a run writes its artifacts.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub dir: PathBuf,
    pub filename: String,
}

impl OutputLayout {
    pub fn new(dir: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            filename: filename.into(),
        }
    }

    pub fn zone_bins(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}_{}.csv", date.format("%Y-%m-%d"), self.filename))
    }

    pub fn fcd(&self, zone_id: ZoneId, date: NaiveDate) -> PathBuf {
        self.dir
            .join(FCD_DIR)
            .join(format!("fcd_{}_{}.csv", zone_id, date.format("%Y-%m-%d")))
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

/// Runs every per-day stage on the points of `date`. Pure: the result only
/// depends on the inputs.
pub fn analyze_day(
    date: NaiveDate,
    points: Vec<ProbePoint>,
    refs: &ReferenceTables,
    settings: &AnalysisSettings,
    first_trip_id: TripId,
) -> DayAnalysis {
    let mut by_zone: BTreeMap<ZoneId, Vec<&ProbePoint>> = BTreeMap::new();
    for point in points.iter().filter(|p| p.timestamp.date() == date) {
        by_zone.entry(point.zone_id).or_default().push(point);
    }

    let mut zone_rows = Vec::new();
    let mut fcd = BTreeMap::new();
    for zone in &refs.zones {
        let zone_points = by_zone.get(&zone.zone_id).map(Vec::as_slice).unwrap_or_default();
        zone_rows.extend(aggregate_zone_day(
            zone,
            zone_points.iter().copied(),
            date,
            settings.interval,
            settings.vehicle_scale_factor,
        ));

        let records = estimate_zone_day(
            zone.zone_id,
            zone_points.iter().copied(),
            date,
            &refs.links,
            settings.interval,
        );
        if !records.is_empty() {
            fcd.insert(zone.zone_id, records);
        }
    }

    let dense = dense_zones(&points, date, settings.dense_zones);
    let count = points.len();
    let trips = TripSegmenter::new(settings.trip_gap_seconds).segment(points, first_trip_id);

    DayAnalysis {
        date,
        points: count,
        zone_rows,
        fcd,
        trips,
        dense,
    }
}

fn point_filter(refs: &ReferenceTables, settings: &AnalysisSettings) -> PointFilter {
    PointFilter {
        vehicle_class: (!settings.vehicle_type.is_empty()).then(|| settings.vehicle_type.clone()),
        zones: Some(refs.zone_ids().into_iter().collect()),
    }
}

/// Loads and analyzes every day of `days`, writing all artifacts under
/// `layout.dir`. A day whose points cannot be loaded is logged and skipped.
/// Trip ids continue from one day to the next.
#[tracing::instrument(skip_all, fields(days = days.len(), output_dir = %layout.dir.display()))]
pub async fn run_window<S: ProbeStore + ?Sized>(
    store: &S,
    refs: &ReferenceTables,
    settings: &AnalysisSettings,
    layout: &OutputLayout,
    days: &[NaiveDate],
) -> Result<RunSummary> {
    fs::create_dir_all(&layout.dir)?;
    let filter = point_filter(refs, settings);

    let trip_points_path = layout.file(TRIP_POINTS_FILE);
    let mut trip_points = csv::Writer::from_path(&trip_points_path)
        .with_context(|| format!("cannot create {}", trip_points_path.display()))?;

    let mut next_trip_id: TripId = 1;
    let mut day_summaries = Vec::new();
    let mut skipped_days = Vec::new();
    let mut origin_destination: Vec<OriginDestinationRecord> = Vec::new();
    let mut dense: Vec<DenseZone> = Vec::new();
    let mut fcd_all: Vec<FlowDensityRecord> = Vec::new();

    for &date in days {
        let points = match store.load_day(date, &filter).await {
            Ok(points) => points,
            Err(e) => {
                warn!(date = %date, error = %e, "Skipping day, points unavailable");
                skipped_days.push(date);
                continue;
            }
        };
        info!(date = %date, points = points.len(), "Day loaded");

        let day = analyze_day(date, points, refs, settings, next_trip_id);
        next_trip_id = day.trips.next_trip_id;

        let bins_path = layout.zone_bins(date);
        if let Err(e) = write_records(&bins_path, &day.zone_rows) {
            error!(date = %date, error = %e, "Failed to write zone bins");
        }

        write_day_fcd(layout, &day, refs);

        for point in &day.trips.points {
            trip_points.serialize(point)?;
        }

        let summary = day.summary();
        info!(
            date = %date,
            trips = summary.trips,
            discarded = summary.discarded_points,
            fcd_records = summary.fcd_records,
            "Day analyzed"
        );
        day_summaries.push(summary);

        fcd_all.extend(day.fcd.into_values().flatten());
        origin_destination.extend(day.trips.origin_destination);
        dense.extend(day.dense);
    }
    trip_points.flush()?;

    write_records(&layout.file(ORIGIN_DESTINATION_FILE), &origin_destination)?;
    write_records(&layout.file(DENSE_ZONES_FILE), &dense)?;
    let ranking = write_od_outputs(&layout.dir, &origin_destination, settings.top_zones)?;
    write_diagram(&layout.dir, &fcd_all)?;

    let summary = RunSummary {
        interval: settings.interval.to_string(),
        trip_gap_seconds: settings.trip_gap_seconds,
        vehicle_type: filter.vehicle_class.clone(),
        total_points: day_summaries.iter().map(|d| d.points).sum(),
        total_trips: origin_destination.len(),
        ranked_zones: ranking.len(),
        days: day_summaries,
        skipped_days,
    };
    let json = serde_json::to_string_pretty(&summary)?;
    fs::write(layout.file(RUN_SUMMARY_FILE), json)?;

    info!(
        days = summary.days.len(),
        skipped = summary.skipped_days.len(),
        trips = summary.total_trips,
        "Run complete"
    );
    Ok(summary)
}

/// Writes one FCD file per zone with records and removes the file of every
/// other reference zone, so a rerun leaves nothing from the previous one.
fn write_day_fcd(layout: &OutputLayout, day: &DayAnalysis, refs: &ReferenceTables) {
    for zone in &refs.zones {
        let path = layout.fcd(zone.zone_id, day.date);
        let result = match day.fcd.get(&zone.zone_id) {
            Some(records) => write_records(&path, records),
            None if path.exists() => fs::remove_file(&path).map_err(Into::into),
            None => Ok(()),
        };
        if let Err(e) = result {
            error!(date = %day.date, zone_id = zone.zone_id, error = %e, "Failed to write FCD records");
        }
    }
}

/// Writes the pruned OD matrix, the top-K matrix and the zone ranking.
pub fn write_od_outputs(dir: &Path, records: &[OriginDestinationRecord], top_zones: usize) -> Result<Vec<ZoneRank>> {
    let matrix = OdMatrix::from_records(records);

    let (header, rows) = matrix.to_table();
    write_table(&dir.join(OD_MATRIX_FILE), &header, &rows)?;

    let (zones, counts) = matrix.top_k(top_zones);
    let (header, rows) = top_k_table(&zones, &counts);
    write_table(&dir.join(OD_MATRIX_TOP_FILE), &header, &rows)?;

    let ranking = matrix.ranking();
    write_records(&dir.join(ZONE_RANKING_FILE), &ranking)?;
    debug!(trips = matrix.total_trips(), zones = ranking.len(), "OD outputs written");
    Ok(ranking)
}

/// Recomputes the OD outputs from a previously written origin/destination file.
pub fn rebuild_od_outputs(dir: &Path, top_zones: usize) -> Result<Vec<ZoneRank>> {
    let records: Vec<OriginDestinationRecord> = read_records(&dir.join(ORIGIN_DESTINATION_FILE))?;
    write_od_outputs(dir, &records, top_zones)
}

pub fn write_diagram(dir: &Path, records: &[FlowDensityRecord]) -> Result<Vec<DiagramFit>> {
    let fits = fit_all(records);
    write_records(&dir.join(FUNDAMENTAL_DIAGRAM_FILE), &fits)?;
    Ok(fits)
}

/// Reads every `fcd/fcd_*.csv` file under `dir`, in file name order.
pub fn load_fcd_records(dir: &Path) -> Result<Vec<FlowDensityRecord>> {
    let fcd_dir = dir.join(FCD_DIR);
    let mut paths = Vec::new();
    for entry in fs::read_dir(&fcd_dir).with_context(|| format!("cannot read {}", fcd_dir.display()))? {
        let path = entry?.path();
        let is_fcd = path.extension().and_then(|e| e.to_str()) == Some("csv")
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("fcd_"));
        if is_fcd {
            paths.push(path);
        }
    }
    paths.sort();

    let mut records = Vec::new();
    for path in paths {
        if fs::metadata(&path)?.len() == 0 {
            continue;
        }
        let rows: Vec<FlowDensityRecord> = read_records(&path)?;
        records.extend(rows);
    }
    Ok(records)
}
