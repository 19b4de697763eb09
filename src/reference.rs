//! Zone and link reference tables.
//!
//! Both are read once per run and shared read-only by every stage. A missing
//! file aborts the run; a row whose id or length cannot be read is skipped.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::{LinkId, LinkSegment, Zone, ZoneId};
use csv::StringRecord;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use tracing::{info, warn};

/// Link lengths in meters keyed by link id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkTable {
    lengths: BTreeMap<LinkId, f64>,
}

impl LinkTable {
    pub fn length_meters(&self, link_id: LinkId) -> Option<f64> {
        self.lengths.get(&link_id).copied()
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }
}

impl FromIterator<LinkSegment> for LinkTable {
    fn from_iter<I: IntoIterator<Item = LinkSegment>>(iter: I) -> Self {
        Self {
            lengths: iter
                .into_iter()
                .map(|l| (l.link_id, l.length_meters))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceTables {
    pub zones: Vec<Zone>,
    pub links: LinkTable,
}

impl ReferenceTables {
    pub fn load(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let input = &config.input_data;
        let zones = load_zones(
            &config.zone_path(),
            &input.zone_column,
            &input.zone_length_column,
        )?;
        let links = load_links(
            &config.links_path(),
            &input.link_id_column,
            &input.link_length_column,
        )?;
        info!(zones = zones.len(), links = links.len(), "Reference tables loaded");
        Ok(Self { zones, links })
    }

    pub fn zone_ids(&self) -> Vec<ZoneId> {
        self.zones.iter().map(|z| z.zone_id).collect()
    }
}

pub fn load_zones(path: &Path, id_column: &str, length_column: &str) -> Result<Vec<Zone>, PipelineError> {
    let pairs = read_pairs(path, id_column, length_column)?;
    Ok(pairs
        .into_iter()
        .map(|(zone_id, length)| Zone { zone_id, length })
        .collect())
}

pub fn load_links(path: &Path, id_column: &str, length_column: &str) -> Result<LinkTable, PipelineError> {
    let pairs = read_pairs(path, id_column, length_column)?;
    Ok(pairs
        .into_iter()
        .map(|(link_id, length_meters)| LinkSegment {
            link_id,
            length_meters,
        })
        .collect())
}

fn read_pairs(path: &Path, id_column: &str, value_column: &str) -> Result<Vec<(i64, f64)>, PipelineError> {
    let missing = |message: String| PipelineError::ConfigurationMissing {
        path: path.to_path_buf(),
        message,
    };
    let file = File::open(path).map_err(|e| missing(e.to_string()))?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers().map_err(|e| missing(e.to_string()))?.clone();
    let id_idx = column_index(&headers, id_column)?;
    let value_idx = column_index(&headers, value_column)?;

    let mut pairs = Vec::new();
    let mut skipped = 0usize;
    for record in rdr.records() {
        let Ok(record) = record else {
            skipped += 1;
            continue;
        };
        let id = record
            .get(id_idx)
            .and_then(crate::ingest::safe_bigint);
        let value = record
            .get(value_idx)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite());
        match (id, value) {
            (Some(id), Some(value)) => pairs.push((id, value)),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(path = %path.display(), skipped, "Skipped unreadable reference rows");
    }
    Ok(pairs)
}

fn column_index(headers: &StringRecord, column: &str) -> Result<usize, PipelineError> {
    headers
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| PipelineError::MissingColumn {
            column: column.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> std::path::PathBuf {
        env::temp_dir().join(name)
    }

    #[test]
    fn test_load_zones_and_links() {
        let zones_path = temp_path("fcd_pipeline_test_zones.csv");
        let links_path = temp_path("fcd_pipeline_test_links.csv");
        fs::write(&zones_path, "Zone ID,Length(Sum)\n1,2.5\n2,4\nbad,1\n").unwrap();
        fs::write(&links_path, "ID,Length,name\n10,1000,a\n11,250.5,b\n").unwrap();

        let zones = load_zones(&zones_path, "Zone ID", "Length(Sum)").unwrap();
        assert_eq!(
            zones,
            vec![
                Zone { zone_id: 1, length: 2.5 },
                Zone { zone_id: 2, length: 4.0 }
            ]
        );

        let links = load_links(&links_path, "ID", "Length").unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links.length_meters(11), Some(250.5));
        assert_eq!(links.length_meters(12), None);

        fs::remove_file(&zones_path).unwrap();
        fs::remove_file(&links_path).unwrap();
    }

    #[test]
    fn test_missing_reference_file_is_fatal() {
        let err = load_links(Path::new("/nonexistent/links.csv"), "ID", "Length").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_reference_column() {
        let path = temp_path("fcd_pipeline_test_links_nocol.csv");
        fs::write(&path, "ID,meters\n10,1000\n").unwrap();
        let err = load_links(&path, "ID", "Length").unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { .. }));
        fs::remove_file(&path).unwrap();
    }
}
