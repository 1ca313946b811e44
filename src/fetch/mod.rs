//! HTTP retrieval of feed slices.
//!
//! [`Fetcher::fetch`] streams one resource to a side path next to the
//! destination. Plain bodies are then renamed into place; resources named
//! `*.gz` are gunzipped into the destination, or written through unchanged
//! when the body turns out not to be gzip.

mod basic;
mod client;
mod error;
mod user_agent;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use error::FetchError;
pub use user_agent::{DEFAULT_USER_AGENT, UserAgent};

use flate2::read::GzDecoder;
use futures_util::StreamExt;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const COMPRESSED_SUFFIX: &str = ".gz";
const PARTIAL_SUFFIX: &str = ".part";

pub struct Fetcher<C> {
    client: C,
}

impl<C: HttpClient> Fetcher<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Downloads `url` into `destination`, overwriting any previous content.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] for transport failures and non-2xx
    /// responses (check [`FetchError::is_not_found`] for missing slices) and
    /// [`FetchError::Io`] when the destination cannot be written.
    #[tracing::instrument(skip(self, destination), fields(dest = %destination.display()))]
    pub async fn fetch(&self, url: &str, destination: &Path) -> Result<PathBuf, FetchError> {
        let resp = self.client.get(url).await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Network {
                url: url.to_string(),
                status: Some(status),
                detail: format!("HTTP {status}"),
            });
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| FetchError::io(parent, e))?;
        }

        // The body lands on a side path so an interrupted transfer never
        // leaves a truncated file at `destination`.
        let compressed = is_compressed(url);
        let side_path = side_channel_path(destination, compressed);
        let result = match stream_to_file(url, resp, &side_path).await {
            Ok(written) if compressed => {
                debug!(bytes = written, "Compressed slice saved");
                gunzip_or_copy(&side_path, destination)
            }
            Ok(written) => {
                debug!(bytes = written, "Slice saved");
                fs::rename(&side_path, destination).map_err(|e| FetchError::io(destination, e))
            }
            Err(e) => Err(e),
        };

        if side_path.exists() {
            if let Err(e) = fs::remove_file(&side_path) {
                debug!(path = %side_path.display(), error = %e, "Could not remove side-channel file");
            }
        }

        result.map(|()| destination.to_path_buf())
    }
}

fn is_compressed(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.ends_with(COMPRESSED_SUFFIX)
}

fn side_channel_path(destination: &Path, compressed: bool) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(if compressed { COMPRESSED_SUFFIX } else { PARTIAL_SUFFIX });
    PathBuf::from(name)
}

async fn stream_to_file(
    url: &str,
    resp: reqwest::Response,
    path: &Path,
) -> Result<u64, FetchError> {
    let mut file = File::create(path).map_err(|e| FetchError::io(path, e))?;
    let mut written = 0u64;
    let mut stream = resp.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::transport(url, e))?;
        file.write_all(&chunk).map_err(|e| FetchError::io(path, e))?;
        written += chunk.len() as u64;
    }

    file.flush().map_err(|e| FetchError::io(path, e))?;
    Ok(written)
}

/// Some upstream `.gz` files are served uncompressed, so a failed gunzip
/// falls back to the raw bytes instead of failing the slice.
fn gunzip_or_copy(compressed: &Path, destination: &Path) -> Result<(), FetchError> {
    let raw = fs::read(compressed).map_err(|e| FetchError::io(compressed, e))?;

    let mut decoded = Vec::new();
    let body = match GzDecoder::new(raw.as_slice()).read_to_end(&mut decoded) {
        Ok(_) => decoded,
        Err(e) => {
            warn!(path = %destination.display(), error = %e, "Decompression failed, keeping raw payload");
            raw
        }
    };

    fs::write(destination, body).map_err(|e| FetchError::io(destination, e))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::HttpClient;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned bodies by URL and 404 for anything else.
    #[derive(Default)]
    pub struct StubClient {
        routes: HashMap<String, (u16, Vec<u8>)>,
        pub requests: Mutex<Vec<String>>,
    }

    impl StubClient {
        pub fn with(mut self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
            self.routes.insert(url.to_string(), (status, body.into()));
            self
        }
    }

    #[async_trait]
    impl HttpClient for StubClient {
        async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            let url = req.url().to_string();
            self.requests.lock().unwrap().push(url.clone());
            let (status, body) = self
                .routes
                .get(&url)
                .cloned()
                .unwrap_or((404, b"not found".to_vec()));
            let resp = http::Response::builder()
                .status(status)
                .body(body)
                .unwrap();
            Ok(reqwest::Response::from(resp))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::StubClient;
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;

    const XML: &str = "<ETagPairLiveList><UpdateTime>2025-04-01T08:05:00+08:00</UpdateTime></ETagPairLiveList>";

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn test_fetch_decompresses_gzip_payload() {
        let url = "https://host/history/motc20/ETag/20250401/ETagPairLive_0805.xml.gz";
        let fetcher = Fetcher::new(StubClient::default().with(url, 200, gzip(XML.as_bytes())));
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("ETag/20250401/ETagPairLive_0805.xml");

        let path = fetcher.fetch(url, &dest).await.unwrap();

        assert_eq!(path, dest);
        assert_eq!(fs::read_to_string(&dest).unwrap(), XML);
        assert!(!side_channel_path(&dest, true).exists());
    }

    #[tokio::test]
    async fn test_fetch_falls_back_to_raw_body_when_not_gzip() {
        let url = "https://host/history/motc20/VD/20250401/VDLive_0805.xml.gz";
        let fetcher = Fetcher::new(StubClient::default().with(url, 200, XML));
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("VDLive_0805.xml");

        fetcher.fetch(url, &dest).await.unwrap();

        assert_eq!(fs::read(&dest).unwrap(), XML.as_bytes());
        assert!(!side_channel_path(&dest, true).exists());
    }

    #[tokio::test]
    async fn test_fetch_uncompressed_resource_written_as_is() {
        let url = "https://host/history/TDCS/M03A/20250401/08/TDCS_M03A_20250401_080500.csv";
        let fetcher = Fetcher::new(StubClient::default().with(url, 200, "a,b\n1,2\n"));
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("nested/dir/out.csv");

        fetcher.fetch(url, &dest).await.unwrap();

        assert_eq!(fs::read_to_string(&dest).unwrap(), "a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_fetch_overwrites_previous_content() {
        let url = "https://host/file.xml";
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("file.xml");
        fs::write(&dest, "stale content that is longer than the new body").unwrap();

        let fetcher = Fetcher::new(StubClient::default().with(url, 200, "fresh"));
        fetcher.fetch(url, &dest).await.unwrap();

        assert_eq!(fs::read_to_string(&dest).unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_fetch_missing_slice_is_not_found() {
        let fetcher = Fetcher::new(StubClient::default());
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("missing.xml");

        let err = fetcher
            .fetch("https://host/missing.xml.gz", &dest)
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_fetch_server_error_is_network_error() {
        let url = "https://host/broken.xml";
        let fetcher = Fetcher::new(StubClient::default().with(url, 503, "busy"));
        let dir = TempDir::new().unwrap();

        let err = fetcher.fetch(url, &dir.path().join("x.xml")).await.unwrap_err();

        assert!(!err.is_not_found());
        match err {
            FetchError::Network { status, .. } => {
                assert_eq!(status, Some(reqwest::StatusCode::SERVICE_UNAVAILABLE))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_rejects_invalid_url() {
        let fetcher = Fetcher::new(StubClient::default());
        let dir = TempDir::new().unwrap();

        let err = fetcher
            .fetch("not a url", &dir.path().join("x.xml"))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }

    /// Yields one chunk, then fails the connection.
    struct TruncatingClient;

    #[async_trait::async_trait]
    impl HttpClient for TruncatingClient {
        async fn execute(&self, _req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            let chunks: Vec<Result<bytes::Bytes, std::io::Error>> = vec![
                Ok(bytes::Bytes::from_static(b"<VDLiveList><VDLive>")),
                Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            ];
            let body = reqwest::Body::wrap_stream(futures_util::stream::iter(chunks));
            Ok(reqwest::Response::from(http::Response::new(body)))
        }
    }

    #[tokio::test]
    async fn test_interrupted_transfer_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let fetcher = Fetcher::new(TruncatingClient);

        for url in ["https://host/VDLive_0805.xml", "https://host/VDLive_0805.xml.gz"] {
            let dest = dir.path().join("VD/20250401/VDLive_0805.xml");

            let err = fetcher.fetch(url, &dest).await.unwrap_err();

            assert!(matches!(err, FetchError::Network { .. }), "{url}");
            assert!(!dest.exists(), "{url}");
            assert!(!side_channel_path(&dest, false).exists(), "{url}");
            assert!(!side_channel_path(&dest, true).exists(), "{url}");
        }
    }
}
