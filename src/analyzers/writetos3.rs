use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Serializes a value to JSON and uploads it to an S3 bucket with `application/json` content type.
pub async fn write_json_to_s3(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    value: &impl Serialize,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec_pretty(value)?;

    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(body.into())
        .content_type("application/json")
        .send()
        .await?;

    Ok(())
}

#[derive(Debug, Serialize)]
struct PublishManifest<'a> {
    prefix: &'a str,
    gzip: bool,
    keys: &'a [String],
}

/// CSV and JSON artifacts under `dir` and its `fcd/` subdirectory, relative to
/// `dir` and sorted.
pub fn collect_artifacts(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for sub in [PathBuf::new(), PathBuf::from(super::pipeline::FCD_DIR)] {
        let full = dir.join(&sub);
        if !full.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(&full)? {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if path.is_file() && matches!(ext, Some("csv") | Some("json")) {
                if let Some(name) = path.file_name() {
                    found.push(sub.join(name));
                }
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Object key of an artifact: `<prefix>/<relative path>[.gz]`.
pub fn artifact_key(prefix: &str, relative: &Path, gzip: bool) -> String {
    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    let prefix = prefix.trim_end_matches('/');
    let key = if prefix.is_empty() {
        relative
    } else {
        format!("{prefix}/{relative}")
    };
    if gzip { format!("{key}.gz") } else { key }
}

pub fn gzip_bytes(contents: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(contents)?;
    Ok(encoder.finish()?)
}

/// Uploads every artifact of `dir`, optionally gzip-compressed, followed by a
/// `manifest.json` listing the uploaded keys. Returns the number of files.
#[tracing::instrument(skip(client, dir), fields(dir = %dir.display()))]
pub async fn publish_outputs(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    prefix: &str,
    dir: &Path,
    gzip: bool,
) -> Result<usize> {
    let mut keys = Vec::new();

    for relative in collect_artifacts(dir)? {
        let path = dir.join(&relative);
        let file_contents =
            std::fs::read(&path).with_context(|| format!("cannot read {}", path.display()))?;

        let body = if gzip { gzip_bytes(&file_contents)? } else { file_contents };
        let key = artifact_key(prefix, &relative, gzip);

        client
            .put_object()
            .bucket(bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .send()
            .await?;
        debug!(key = %key, "Artifact uploaded");
        keys.push(key);
    }

    let manifest = PublishManifest {
        prefix,
        gzip,
        keys: &keys,
    };
    write_json_to_s3(client, bucket, &artifact_key(prefix, Path::new("manifest.json"), false), &manifest)
        .await?;

    info!(upload_count = keys.len(), bucket, "S3 upload complete");
    Ok(keys.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_artifact_key() {
        assert_eq!(artifact_key("runs/2019_09/", Path::new("od_matrix.csv"), false), "runs/2019_09/od_matrix.csv");
        assert_eq!(
            artifact_key("runs", &Path::new("fcd").join("fcd_1_2019-09-01.csv"), true),
            "runs/fcd/fcd_1_2019-09-01.csv.gz"
        );
        assert_eq!(artifact_key("", Path::new("run_summary.json"), false), "run_summary.json");
    }

    #[test]
    fn test_collect_artifacts() {
        let dir = std::env::temp_dir().join("fcd_pipeline_test_publish");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(dir.join("fcd")).unwrap();
        std::fs::write(dir.join("od_matrix.csv"), "x").unwrap();
        std::fs::write(dir.join("run_summary.json"), "{}").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.join("fcd").join("fcd_3_2019-09-01.csv"), "x").unwrap();

        let found = collect_artifacts(&dir).unwrap();
        assert_eq!(
            found,
            vec![
                Path::new("fcd").join("fcd_3_2019-09-01.csv"),
                PathBuf::from("od_matrix.csv"),
                PathBuf::from("run_summary.json"),
            ]
        );
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_gzip_bytes() {
        let packed = gzip_bytes(b"zone_id,count\n1,2\n").unwrap();
        let mut out = String::new();
        GzDecoder::new(packed.as_slice()).read_to_string(&mut out).unwrap();
        assert_eq!(out, "zone_id,count\n1,2\n");
    }
}
