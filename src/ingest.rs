//! Raw probe normalization and chunked ingestion.
//!
//! Rows missing a required field are dropped, numeric identifiers are coerced
//! to `i64` (unparseable -> absent), and timestamps that cannot be parsed mark
//! the row invalid. A chunk whose insert fails contributes nothing to the
//! total but does not stop the job.

use crate::config::RawColumns;
use crate::error::PipelineError;
use crate::model::ProbePoint;
use crate::services::probe_store::ProbeStore;
use chrono::{DateTime, NaiveDateTime};
use csv::StringRecord;
use std::io::Read;
use tracing::{debug, error, info, warn};

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Coerces a raw identifier to `i64`. Integral floats such as `"42.0"` are
/// accepted; anything else yields `None` instead of an error.
pub fn safe_bigint(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(v) = value.parse::<i64>() {
        return Some(v);
    }
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e18 => Some(f as i64),
        _ => None,
    }
}

/// Parses the timestamp layouts seen in probe exports. RFC 3339 values are
/// converted to their UTC wall-clock time.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Some(ts);
        }
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.naive_utc())
}

/// Positions of the configured columns inside the raw header.
#[derive(Debug, Clone)]
pub struct ColumnIndex {
    gid: Option<usize>,
    x: usize,
    y: usize,
    direction: usize,
    velocity: usize,
    timestamp: usize,
    status: usize,
    vehicle_id: usize,
    vehicle_class: usize,
    zone_id: usize,
    link_id: usize,
    inserted_at: Option<usize>,
}

impl ColumnIndex {
    pub fn resolve(headers: &StringRecord, columns: &RawColumns) -> Result<Self, PipelineError> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| PipelineError::MissingColumn {
                column: name.to_string(),
            })
        };
        Ok(Self {
            gid: find(&columns.gid),
            x: require(&columns.x)?,
            y: require(&columns.y)?,
            direction: require(&columns.direction)?,
            velocity: require(&columns.velocity)?,
            timestamp: require(&columns.timestamp)?,
            status: require(&columns.status)?,
            vehicle_id: require(&columns.vehicle_id)?,
            vehicle_class: require(&columns.vehicle_class)?,
            zone_id: require(&columns.zone_id)?,
            link_id: require(&columns.link_id)?,
            inserted_at: find(&columns.inserted_at),
        })
    }
}

/// Why a row was left out.
#[derive(Debug)]
pub enum Rejection {
    Missing(&'static str),
    Malformed(PipelineError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub rows: usize,
    pub accepted: usize,
    pub dropped_missing: usize,
    pub dropped_malformed: usize,
}

impl NormalizeReport {
    fn record(&mut self, outcome: &Result<ProbePoint, Rejection>) {
        self.rows += 1;
        match outcome {
            Ok(_) => self.accepted += 1,
            Err(Rejection::Missing(_)) => self.dropped_missing += 1,
            Err(Rejection::Malformed(_)) => self.dropped_malformed += 1,
        }
    }

    fn merge(&mut self, other: &NormalizeReport) {
        self.rows += other.rows;
        self.accepted += other.accepted;
        self.dropped_missing += other.dropped_missing;
        self.dropped_malformed += other.dropped_malformed;
    }
}

fn required<'r>(record: &'r StringRecord, idx: usize, field: &'static str) -> Result<&'r str, Rejection> {
    match record.get(idx).map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Rejection::Missing(field)),
    }
}

fn malformed(row: u64, field: &'static str, raw: &str) -> Rejection {
    Rejection::Malformed(PipelineError::MalformedInput {
        row,
        field,
        message: format!("cannot parse '{raw}'"),
    })
}

fn float(record: &StringRecord, idx: usize, field: &'static str, row: u64) -> Result<f64, Rejection> {
    let raw = required(record, idx, field)?;
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| malformed(row, field, raw))
}

fn bigint(record: &StringRecord, idx: usize, field: &'static str, row: u64) -> Result<i64, Rejection> {
    let raw = required(record, idx, field)?;
    safe_bigint(raw).ok_or_else(|| malformed(row, field, raw))
}

/// Turns one raw row into a [`ProbePoint`].
pub fn normalize_record(record: &StringRecord, index: &ColumnIndex, row: u64) -> Result<ProbePoint, Rejection> {
    // presence is checked for every required field before any parsing
    for (idx, field) in [
        (index.x, "x"),
        (index.y, "y"),
        (index.direction, "direction"),
        (index.velocity, "velocity"),
        (index.timestamp, "timestamp"),
        (index.status, "status"),
        (index.vehicle_id, "vehicle_id"),
        (index.vehicle_class, "vehicle_class"),
        (index.zone_id, "zone_id"),
        (index.link_id, "link_id"),
    ] {
        required(record, idx, field)?;
    }

    let velocity = float(record, index.velocity, "velocity", row)?;
    if velocity < 0.0 {
        return Err(malformed(row, "velocity", &velocity.to_string()));
    }
    let raw_ts = required(record, index.timestamp, "timestamp")?;
    let timestamp = parse_timestamp(raw_ts).ok_or_else(|| malformed(row, "timestamp", raw_ts))?;
    let status = bigint(record, index.status, "status", row)?;

    Ok(ProbePoint {
        gid: index.gid.and_then(|i| record.get(i)).and_then(safe_bigint),
        x: float(record, index.x, "x", row)?,
        y: float(record, index.y, "y", row)?,
        direction: float(record, index.direction, "direction", row)?,
        velocity,
        timestamp,
        status: i32::try_from(status).map_err(|_| malformed(row, "status", &status.to_string()))?,
        vehicle_id: bigint(record, index.vehicle_id, "vehicle_id", row)?,
        vehicle_class: required(record, index.vehicle_class, "vehicle_class")?.to_string(),
        zone_id: bigint(record, index.zone_id, "zone_id", row)?,
        trip_id: None,
        link_id: bigint(record, index.link_id, "link_id", row)?,
        inserted_at: index
            .inserted_at
            .and_then(|i| record.get(i))
            .and_then(parse_timestamp),
    })
}

/// Normalizes a chunk of raw rows. `first_row` is the 1-based row number of
/// the first record, used in diagnostics.
pub fn normalize_chunk(records: &[StringRecord], index: &ColumnIndex, first_row: u64) -> (Vec<ProbePoint>, NormalizeReport) {
    let mut report = NormalizeReport::default();
    let mut points = Vec::with_capacity(records.len());
    for (offset, record) in records.iter().enumerate() {
        let outcome = normalize_record(record, index, first_row + offset as u64);
        report.record(&outcome);
        match outcome {
            Ok(point) => points.push(point),
            Err(Rejection::Malformed(e)) => debug!(error = %e, "Dropping malformed row"),
            Err(Rejection::Missing(field)) => {
                debug!(row = first_row + offset as u64, field, "Dropping incomplete row")
            }
        }
    }
    (points, report)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub chunks: usize,
    pub failed_chunks: usize,
    pub inserted: usize,
    pub unreadable_rows: usize,
    pub rows: NormalizeReport,
}

/// Reads raw CSV in chunks of `chunk_size` rows and inserts the cleaned
/// points chunk by chunk. Insert failures are logged and skipped.
#[tracing::instrument(skip(reader, columns, store))]
pub async fn ingest_csv<R, S>(
    reader: R,
    columns: &RawColumns,
    chunk_size: usize,
    store: &S,
) -> anyhow::Result<IngestSummary>
where
    R: Read,
    S: ProbeStore + ?Sized,
{
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = rdr.headers()?.clone();
    let index = ColumnIndex::resolve(&headers, columns)?;

    let mut summary = IngestSummary::default();
    let mut records = rdr.records();
    let mut next_row: u64 = 1;
    let chunk_size = chunk_size.max(1);

    loop {
        let mut chunk = Vec::with_capacity(chunk_size);
        let first_row = next_row;
        for result in records.by_ref().take(chunk_size) {
            next_row += 1;
            match result {
                Ok(record) => chunk.push(record),
                Err(e) => {
                    summary.unreadable_rows += 1;
                    debug!(error = %e, "Unreadable raw row");
                }
            }
        }
        if next_row == first_row {
            break;
        }

        summary.chunks += 1;
        let (points, report) = normalize_chunk(&chunk, &index, first_row);
        summary.rows.merge(&report);

        let inserted = if points.is_empty() {
            0
        } else {
            match store.insert_points(&points).await {
                Ok(n) => n,
                Err(e) => {
                    summary.failed_chunks += 1;
                    error!(chunk = summary.chunks, error = %e, "Error processing chunk");
                    0
                }
            }
        };
        summary.inserted += inserted;
        info!(
            chunk = summary.chunks,
            inserted,
            dropped_missing = report.dropped_missing,
            dropped_malformed = report.dropped_malformed,
            "Chunk {}: Inserted {} records",
            summary.chunks,
            inserted
        );
    }

    if summary.failed_chunks > 0 {
        warn!(failed_chunks = summary.failed_chunks, "Some chunks were not inserted");
    }
    info!(
        inserted = summary.inserted,
        chunks = summary.chunks,
        "Completed importing data: {} total records inserted in {} chunks",
        summary.inserted,
        summary.chunks
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::probe_store::PointFilter;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    const HEADER: &str = "gid,x,y,dir,vel,dt,stato,id_veicolo,classe_veicolo,mm_id_zona,mm_fid,ts_insert";

    fn index() -> ColumnIndex {
        let headers = StringRecord::from(HEADER.split(',').collect::<Vec<_>>());
        ColumnIndex::resolve(&headers, &RawColumns::default()).unwrap()
    }

    fn record(line: &str) -> StringRecord {
        StringRecord::from(line.split(',').collect::<Vec<_>>())
    }

    #[test]
    fn test_safe_bigint() {
        assert_eq!(safe_bigint("42"), Some(42));
        assert_eq!(safe_bigint(" 42.0 "), Some(42));
        assert_eq!(safe_bigint("42.5"), None);
        assert_eq!(safe_bigint(""), None);
        assert_eq!(safe_bigint("abc"), None);
        assert_eq!(safe_bigint("1e30"), None);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2019, 9, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2019-09-01 08:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2019-09-01T08:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2019-09-01 08:30:00.000"), Some(expected));
        assert_eq!(parse_timestamp("2019-09-01T10:30:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("not a date"), None);
    }

    #[test]
    fn test_normalize_valid_row() {
        let point = normalize_record(
            &record("7,12.5,41.9,90,35.5,2019-09-01 08:30:00,1,1001,A,5,77,2019-09-02 00:00:00"),
            &index(),
            1,
        )
        .unwrap();
        assert_eq!(point.gid, Some(7));
        assert_eq!(point.vehicle_id, 1001);
        assert_eq!(point.vehicle_class, "A");
        assert_eq!(point.zone_id, 5);
        assert_eq!(point.link_id, 77);
        assert_eq!(point.velocity, 35.5);
        assert_eq!(point.trip_id, None);
        assert!(point.inserted_at.is_some());
    }

    #[test]
    fn test_normalize_drops_and_counts() {
        let rows = vec![
            record("1,12.5,41.9,90,35,2019-09-01 08:30:00,1,1001,A,5,77,"),
            // missing velocity
            record("2,12.5,41.9,90,,2019-09-01 08:30:00,1,1001,A,5,77,"),
            // unparseable timestamp
            record("3,12.5,41.9,90,35,yesterday,1,1001,A,5,77,"),
            // unparseable zone id
            record("4,12.5,41.9,90,35,2019-09-01 08:30:00,1,1001,A,zone5,77,"),
            // negative velocity
            record("5,12.5,41.9,90,-3,2019-09-01 08:30:00,1,1001,A,5,77,"),
            // unparseable gid is tolerated
            record("x,12.5,41.9,90,35,2019-09-01 08:31:00,1,1001,A,5,77,"),
        ];
        let (points, report) = normalize_chunk(&rows, &index(), 1);
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].gid, None);
        assert_eq!(
            report,
            NormalizeReport {
                rows: 6,
                accepted: 2,
                dropped_missing: 1,
                dropped_malformed: 3,
            }
        );
    }

    #[test]
    fn test_missing_required_header() {
        let headers = StringRecord::from(vec!["gid", "x", "y"]);
        let err = ColumnIndex::resolve(&headers, &RawColumns::default()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { .. }));
    }

    /// Store that refuses every `fail_on`-th insert call.
    struct FlakyStore {
        calls: Mutex<usize>,
        fail_on: usize,
        stored: Mutex<Vec<ProbePoint>>,
    }

    #[async_trait]
    impl ProbeStore for FlakyStore {
        async fn insert_points(&self, points: &[ProbePoint]) -> anyhow::Result<usize> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if call == self.fail_on {
                anyhow::bail!("connection reset");
            }
            self.stored.lock().unwrap().extend_from_slice(points);
            Ok(points.len())
        }

        async fn load_day(&self, _date: NaiveDate, _filter: &PointFilter) -> anyhow::Result<Vec<ProbePoint>> {
            Ok(self.stored.lock().unwrap().clone())
        }
    }

    #[tokio::test]
    async fn test_failed_chunk_is_isolated() {
        let mut csv_text = format!("{HEADER}\n");
        for i in 0..5 {
            csv_text.push_str(&format!(
                "{i},12.5,41.9,90,35,2019-09-01 08:3{i}:00,1,1001,A,5,77,\n"
            ));
        }
        // bad row lands in the last chunk
        csv_text.push_str("9,12.5,41.9,90,35,never,1,1001,A,5,77,\n");

        let store = FlakyStore {
            calls: Mutex::new(0),
            fail_on: 2,
            stored: Mutex::new(Vec::new()),
        };
        let summary = ingest_csv(csv_text.as_bytes(), &RawColumns::default(), 2, &store)
            .await
            .unwrap();

        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.failed_chunks, 1);
        assert_eq!(summary.rows.rows, 6);
        assert_eq!(summary.rows.dropped_malformed, 1);
        // chunk 1 (2 rows) + chunk 3 (1 good row), chunk 2 lost
        assert_eq!(summary.inserted, 3);
        assert_eq!(store.stored.lock().unwrap().len(), 3);
    }
}
