use crate::config::TableName;
use crate::error::PipelineError;
use crate::model::ProbePoint;
use crate::output::{append_records, read_records};
use crate::services::probe_store::{PointFilter, ProbeStore};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// Day-partitioned CSV store: points of 2019-09-01 live in
/// `<root>/data_2019_09_01.csv`.
pub struct CsvProbeStore {
    root: PathBuf,
    naming: TableName,
}

impl CsvProbeStore {
    pub fn new(root: impl Into<PathBuf>, naming: TableName) -> Self {
        Self {
            root: root.into(),
            naming,
        }
    }

    pub fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{}.csv", self.naming.day_table(date)))
    }
}

#[async_trait]
impl ProbeStore for CsvProbeStore {
    async fn insert_points(&self, points: &[ProbePoint]) -> Result<usize> {
        std::fs::create_dir_all(&self.root)?;

        let mut by_day: BTreeMap<NaiveDate, Vec<&ProbePoint>> = BTreeMap::new();
        for point in points {
            by_day.entry(point.timestamp.date()).or_default().push(point);
        }
        for (date, rows) in &by_day {
            let path = self.partition_path(*date);
            append_records(&path, rows)?;
            debug!(date = %date, rows = rows.len(), "Partition appended");
        }
        Ok(points.len())
    }

    async fn load_day(&self, date: NaiveDate, filter: &PointFilter) -> Result<Vec<ProbePoint>> {
        let path = self.partition_path(date);
        if !path.exists() {
            return Err(PipelineError::UpstreamUnavailable {
                unit: format!("day table {}", self.naming.day_table(date)),
                message: format!("{} does not exist", path.display()),
            }
            .into());
        }
        let mut points: Vec<ProbePoint> = read_records(&path)?;
        points.retain(|p| filter.matches(p));
        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn point(vehicle_id: i64, class: &str, zone_id: i64, ts: &str) -> ProbePoint {
        ProbePoint {
            gid: Some(vehicle_id * 10),
            x: 12.0,
            y: 41.0,
            direction: 0.0,
            velocity: 30.0,
            timestamp: NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S").unwrap(),
            status: 1,
            vehicle_id,
            vehicle_class: class.to_string(),
            zone_id,
            trip_id: None,
            link_id: 5,
            inserted_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_partitions_by_day_and_filters_on_load() {
        let root = std::env::temp_dir().join("fcd_pipeline_test_csv_store");
        let _ = std::fs::remove_dir_all(&root);
        let store = CsvProbeStore::new(&root, TableName::parse("data_2019_09").unwrap());

        let points = vec![
            point(1, "A", 1, "2019-09-01 10:00:00"),
            point(2, "C", 1, "2019-09-01 09:00:00"),
            point(3, "A", 2, "2019-09-01 08:00:00"),
            point(4, "A", 1, "2019-09-02 08:00:00"),
        ];
        assert_eq!(store.insert_points(&points).await.unwrap(), 4);

        let day1 = NaiveDate::from_ymd_opt(2019, 9, 1).unwrap();
        assert!(store.partition_path(day1).ends_with("data_2019_09_01.csv"));

        let all = store.load_day(day1, &PointFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        // sorted by time
        assert_eq!(all[0].vehicle_id, 3);
        assert_eq!(all[0], points[2]);

        let filtered = store.load_day(day1, &PointFilter::new("A", [1])).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].vehicle_id, 1);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn test_missing_partition_is_upstream_unavailable() {
        let store = CsvProbeStore::new(
            "/nonexistent/fcd_pipeline_store",
            TableName::parse("data_2019_09").unwrap(),
        );
        let day = NaiveDate::from_ymd_opt(2019, 9, 3).unwrap();
        let err = store.load_day(day, &PointFilter::default()).await.unwrap_err();
        let err = err.downcast::<PipelineError>().unwrap();
        assert!(matches!(err, PipelineError::UpstreamUnavailable { .. }));
    }
}
