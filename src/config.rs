//! Run configuration loaded from a JSON file.
//!
//! The file mirrors the layout used by the data team:
//! ```json
//! {
//!   "database":   { "dbname": "fcd", "user": "postgres", "password": "...",
//!                   "host": "localhost", "port": 5432, "schema": "data",
//!                   "table_name": "data_2019_09" },
//!   "input_data": { "data_name": "probes.csv", "chunk_size": 100000,
//!                   "zone_filename": "zones.csv", "zone_column": "Zone ID" },
//!   "operation":  { "time_interval": "5min", "vehicle_id_column": "vehicle_id",
//!                   "zone_id_column": "zone_id", "fid_column": "fid",
//!                   "vehicle_class_column": "vehicle_class", "vehicle_type": "A",
//!                   "velocity_column": "velocity" },
//!   "output_data": { "output_filename": "zone_intervals" }
//! }
//! ```
//! The loaded [`PipelineConfig`] is immutable and handed to each stage.

use crate::error::PipelineError;
use crate::model::IntervalWidth;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub input_data: InputConfig,
    pub operation: OperationConfig,
    pub output_data: OutputConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub dbname: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub host: String,
    pub port: u16,
    pub schema: String,
    /// Month table such as `data_2019_09`; day tables append `_DD`.
    pub table_name: String,
    #[serde(default = "default_insert_table")]
    pub insert_table: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub data_name: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    pub zone_filename: String,
    pub zone_column: String,
    #[serde(default = "default_zone_length_column")]
    pub zone_length_column: String,
    #[serde(default = "default_links_filename")]
    pub links_filename: String,
    #[serde(default = "default_link_id_column")]
    pub link_id_column: String,
    #[serde(default = "default_link_length_column")]
    pub link_length_column: String,
    #[serde(default)]
    pub columns: RawColumns,
}

/// Header names of the raw probe export.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawColumns {
    pub gid: String,
    pub x: String,
    pub y: String,
    pub direction: String,
    pub velocity: String,
    pub timestamp: String,
    pub status: String,
    pub vehicle_id: String,
    pub vehicle_class: String,
    pub zone_id: String,
    pub link_id: String,
    pub inserted_at: String,
}

impl Default for RawColumns {
    fn default() -> Self {
        Self {
            gid: "gid".into(),
            x: "x".into(),
            y: "y".into(),
            direction: "dir".into(),
            velocity: "vel".into(),
            timestamp: "dt".into(),
            status: "stato".into(),
            vehicle_id: "id_veicolo".into(),
            vehicle_class: "classe_veicolo".into(),
            zone_id: "mm_id_zona".into(),
            link_id: "mm_fid".into(),
            inserted_at: "ts_insert".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationConfig {
    pub time_interval: String,
    pub vehicle_id_column: String,
    pub zone_id_column: String,
    pub fid_column: String,
    pub vehicle_class_column: String,
    pub vehicle_type: String,
    pub velocity_column: String,
    #[serde(default = "default_trip_gap_seconds")]
    pub trip_gap_seconds: i64,
    #[serde(default = "default_vehicle_scale_factor")]
    pub vehicle_scale_factor: f64,
    #[serde(default = "default_top_zones")]
    pub top_zones: usize,
    #[serde(default = "default_dense_zones")]
    pub dense_zones: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub output_filename: String,
    #[serde(default = "default_data_dir")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Csv,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Csv,
            root: PathBuf::from("data/store"),
        }
    }
}

fn default_insert_table() -> String {
    "data".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_chunk_size() -> usize {
    100_000
}
fn default_zone_length_column() -> String {
    "Length(Sum)".into()
}
fn default_links_filename() -> String {
    "links.csv".into()
}
fn default_link_id_column() -> String {
    "ID".into()
}
fn default_link_length_column() -> String {
    "Length".into()
}
fn default_trip_gap_seconds() -> i64 {
    600
}
fn default_vehicle_scale_factor() -> f64 {
    20.0
}
fn default_top_zones() -> usize {
    10
}
fn default_dense_zones() -> usize {
    5
}

/// Knobs the analysis stages need, resolved once from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSettings {
    pub interval: IntervalWidth,
    pub vehicle_scale_factor: f64,
    pub trip_gap_seconds: i64,
    pub top_zones: usize,
    pub dense_zones: usize,
    pub vehicle_type: String,
}

impl PipelineConfig {
    /// Reads and validates the configuration file. Both a missing file and
    /// an unparseable one are fatal.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| PipelineError::ConfigurationMissing {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Self::from_json(&content, path)
    }

    pub fn from_json(content: &str, origin: &Path) -> Result<Self, PipelineError> {
        let config: PipelineConfig =
            serde_json::from_str(content).map_err(|e| PipelineError::InvalidConfiguration {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;
        config.validate(origin)?;
        Ok(config)
    }

    fn validate(&self, origin: &Path) -> Result<(), PipelineError> {
        let invalid = |message: String| PipelineError::InvalidConfiguration {
            path: origin.to_path_buf(),
            message,
        };
        self.interval().map_err(invalid)?;
        self.table_name()?;
        if self.input_data.chunk_size == 0 {
            return Err(invalid("input_data.chunk_size must be positive".into()));
        }
        if self.operation.trip_gap_seconds <= 0 {
            return Err(invalid("operation.trip_gap_seconds must be positive".into()));
        }
        Ok(())
    }

    pub fn interval(&self) -> Result<IntervalWidth, String> {
        self.operation.time_interval.parse()
    }

    pub fn table_name(&self) -> Result<TableName, PipelineError> {
        TableName::parse(&self.database.table_name)
    }

    pub fn analysis_settings(&self) -> Result<AnalysisSettings, PipelineError> {
        let interval = self
            .interval()
            .map_err(|message| PipelineError::InvalidConfiguration {
                path: PathBuf::from("operation.time_interval"),
                message,
            })?;
        Ok(AnalysisSettings {
            interval,
            vehicle_scale_factor: self.operation.vehicle_scale_factor,
            trip_gap_seconds: self.operation.trip_gap_seconds,
            top_zones: self.operation.top_zones,
            dense_zones: self.operation.dense_zones,
            vehicle_type: self.operation.vehicle_type.clone(),
        })
    }

    pub fn zone_path(&self) -> PathBuf {
        self.input_data.data_dir.join(&self.input_data.zone_filename)
    }

    pub fn links_path(&self) -> PathBuf {
        self.input_data.data_dir.join(&self.input_data.links_filename)
    }

    /// Default raw input, used when `ingest` is not given an explicit source.
    pub fn raw_input_path(&self) -> Option<PathBuf> {
        self.input_data
            .data_name
            .as_ref()
            .map(|name| self.input_data.data_dir.join(name))
    }
}

/// A month table name such as `data_2019_09`, split into its base name and
/// the month it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub base: String,
    pub year: i32,
    pub month: u32,
}

impl TableName {
    pub fn parse(name: &str) -> Result<Self, PipelineError> {
        let invalid = || PipelineError::InvalidConfiguration {
            path: PathBuf::from("database.table_name"),
            message: format!("expected '<base>_<YYYY>_<MM>', got '{name}'"),
        };
        let mut parts = name.rsplitn(3, '_');
        let month: u32 = parts
            .next()
            .and_then(|m| m.parse().ok())
            .ok_or_else(invalid)?;
        let year: i32 = parts
            .next()
            .and_then(|y| y.parse().ok())
            .ok_or_else(invalid)?;
        let base = parts.next().filter(|b| !b.is_empty()).ok_or_else(invalid)?;
        NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        Ok(Self {
            base: base.to_string(),
            year,
            month,
        })
    }

    /// Day table holding the probes of `date`, e.g. `data_2019_09_01`.
    pub fn day_table(&self, date: NaiveDate) -> String {
        format!("{}_{}", self.base, date.format("%Y_%m_%d"))
    }

    /// Every calendar day of the month, in order.
    pub fn days(&self) -> Vec<NaiveDate> {
        let Some(first) = NaiveDate::from_ymd_opt(self.year, self.month, 1) else {
            return Vec::new();
        };
        first
            .iter_days()
            .take_while(|d| d.month() == self.month)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "database": { "dbname": "fcd", "user": "postgres", "password": "admin",
                      "host": "localhost", "port": 5432, "schema": "data",
                      "table_name": "data_2019_09" },
        "input_data": { "data_name": "probes.csv", "chunk_size": 1000,
                        "zone_filename": "zones.csv", "zone_column": "Zone ID" },
        "operation": { "time_interval": "5min", "vehicle_id_column": "vehicle_id",
                       "zone_id_column": "zone_id", "fid_column": "fid",
                       "vehicle_class_column": "vehicle_class", "vehicle_type": "A",
                       "velocity_column": "velocity" },
        "output_data": { "output_filename": "zone_intervals" }
    }"#;

    #[test]
    fn test_parse_sample_with_defaults() {
        let config = PipelineConfig::from_json(SAMPLE, Path::new("config.json")).unwrap();
        assert_eq!(config.database.insert_table, "data");
        assert_eq!(config.input_data.zone_length_column, "Length(Sum)");
        assert_eq!(config.input_data.columns.velocity, "vel");
        assert_eq!(config.operation.trip_gap_seconds, 600);
        assert_eq!(config.operation.top_zones, 10);
        assert_eq!(config.storage.backend, StorageBackend::Csv);
        assert_eq!(config.interval().unwrap().seconds(), 300);
        assert_eq!(
            config.raw_input_path(),
            Some(PathBuf::from("data/probes.csv"))
        );
    }

    #[test]
    fn test_missing_file_is_configuration_missing() {
        let err = PipelineConfig::load("/nonexistent/fcd_pipeline/config.json").unwrap_err();
        assert!(matches!(err, PipelineError::ConfigurationMissing { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_bad_interval_is_rejected() {
        let content = SAMPLE.replace("\"5min\"", "\"5 fortnights\"");
        let err = PipelineConfig::from_json(&content, Path::new("config.json")).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_table_name_days() {
        let table = TableName::parse("data_2019_09").unwrap();
        assert_eq!(table.base, "data");
        let days = table.days();
        assert_eq!(days.len(), 30);
        assert_eq!(table.day_table(days[0]), "data_2019_09_01");
        assert_eq!(table.day_table(days[29]), "data_2019_09_30");
    }

    #[test]
    fn test_table_name_with_underscored_base() {
        let table = TableName::parse("fcd_raw_2020_02").unwrap();
        assert_eq!(table.base, "fcd_raw");
        assert_eq!(table.days().len(), 29);
        assert!(TableName::parse("data").is_err());
        assert!(TableName::parse("data_2019_13").is_err());
    }
}
