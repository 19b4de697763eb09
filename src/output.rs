//! CSV persistence for pipeline artifacts.
//!
//! Analysis artifacts are always written as full replacements so that
//! re-running a window yields identical files. Appending is only used by the
//! CSV probe store during ingestion.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::debug;

/// Appends rows to a CSV file, writing the header only when the file is new.
pub fn append_records<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let file_exists = path.exists() && path.metadata()?.len() > 0;
    debug!(path = %path.display(), file_exists, rows = rows.len(), "Appending CSV records");

    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("cannot open {}", path.display()))?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}

/// Writes rows to a fresh CSV file, replacing any previous content.
pub fn write_records<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    let mut writer = WriterBuilder::new().from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    debug!(path = %path.display(), rows = rows.len(), "CSV written");
    Ok(())
}

/// Reads every row of a CSV file produced by [`write_records`] or
/// [`append_records`].
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut rdr = csv::Reader::from_reader(file);
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let record: T = result.with_context(|| format!("bad row in {}", path.display()))?;
        rows.push(record);
    }
    Ok(rows)
}

/// Writes a header plus raw string rows, for tables whose columns are only
/// known at runtime (matrices).
pub fn write_table(path: &Path, header: &[String], rows: &[Vec<String>]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::env;
    use std::fs;
    use std::path::PathBuf;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        zone_id: i64,
        speed: f64,
    }

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join(name)
    }

    #[test]
    fn test_append_records_writes_header_once() {
        let path = temp_path("fcd_pipeline_test_append.csv");
        let _ = fs::remove_file(&path);

        append_records(&path, &[Row { zone_id: 1, speed: 2.0 }]).unwrap();
        append_records(&path, &[Row { zone_id: 2, speed: 3.5 }]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let header_count = content.lines().filter(|l| l.contains("zone_id")).count();
        assert_eq!(header_count, 1);
        assert_eq!(content.lines().count(), 3);

        let rows: Vec<Row> = read_records(&path).unwrap();
        assert_eq!(rows[1], Row { zone_id: 2, speed: 3.5 });

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_records_replaces_content() {
        let path = temp_path("fcd_pipeline_test_replace.csv");
        write_records(&path, &[Row { zone_id: 1, speed: 2.0 }, Row { zone_id: 2, speed: 2.0 }]).unwrap();
        write_records(&path, &[Row { zone_id: 3, speed: 1.0 }]).unwrap();

        let rows: Vec<Row> = read_records(&path).unwrap();
        assert_eq!(rows, vec![Row { zone_id: 3, speed: 1.0 }]);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_table() {
        let path = temp_path("fcd_pipeline_test_table.csv");
        write_table(
            &path,
            &["origin_zone".to_string(), "7".to_string()],
            &[vec!["7".to_string(), "2".to_string()]],
        )
        .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "origin_zone,7\n7,2\n");
        fs::remove_file(&path).unwrap();
    }
}
