//! Loading raw probe exports from disk or over HTTP.

mod basic;
mod client;
pub mod auth;

pub use auth::ApiKey;
pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result};
use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info};

/// Bearer token sent with HTTP downloads when set.
pub const TOKEN_ENV: &str = "PROBE_SOURCE_TOKEN";

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Bytes> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?)
}

pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Inflates gzip payloads, recognized by a `.gz` suffix or the gzip magic
/// bytes. Anything else is returned untouched.
pub fn decode(source: &str, bytes: Bytes) -> Result<Bytes> {
    if !source.ends_with(".gz") && !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(bytes);
    }
    let mut out = Vec::new();
    GzDecoder::new(bytes.as_ref())
        .read_to_end(&mut out)
        .with_context(|| format!("cannot decompress {source}"))?;
    debug!(compressed = bytes.len(), inflated = out.len(), "Source decompressed");
    Ok(Bytes::from(out))
}

/// Loads a raw export from a local path or an HTTP(S) URL, then decompresses
/// it if needed.
#[tracing::instrument(skip_all, fields(source = %source))]
pub async fn load_source(source: &str) -> Result<Bytes> {
    let bytes = if is_remote(source) {
        let client = BasicClient::with_timeout(DOWNLOAD_TIMEOUT)?;
        match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.is_empty() => {
                fetch_bytes(&ApiKey::bearer(client, &token)?, source).await?
            }
            _ => fetch_bytes(&client, source).await?,
        }
    } else {
        Bytes::from(std::fs::read(source).with_context(|| format!("cannot read {source}"))?)
    };
    info!(bytes = bytes.len(), "Source loaded");
    decode(source, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn gz(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_decode_plain_and_gzip() {
        let plain = Bytes::from_static(b"gid,x\n1,2\n");
        assert_eq!(decode("raw.csv", plain.clone()).unwrap(), plain);

        // magic bytes win even without the suffix
        let packed = Bytes::from(gz(b"gid,x\n1,2\n"));
        assert_eq!(decode("raw.csv", packed.clone()).unwrap(), plain);
        assert_eq!(decode("raw.csv.gz", packed).unwrap(), plain);

        assert!(decode("raw.csv.gz", Bytes::from_static(b"not gzip")).is_err());
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://example.org/raw.csv"));
        assert!(!is_remote("data/raw.csv"));
    }

    #[tokio::test]
    async fn test_load_local_gzip_file() {
        let path = std::env::temp_dir().join("fcd_pipeline_test_source.csv.gz");
        std::fs::write(&path, gz(b"a,b\n1,2\n")).unwrap();
        let bytes = load_source(path.to_str().unwrap()).await.unwrap();
        assert_eq!(bytes.as_ref(), b"a,b\n1,2\n");
        std::fs::remove_file(&path).unwrap();
    }
}
