//! Storage backends serving published JSON files by relative path.

use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::error::{Result, StoreError};

/// Read-only source of static JSON documents.
pub trait StorageBackend: Send + Sync + 'static {
    fn fetch(&self, path: &str) -> impl Future<Output = Result<serde_json::Value>> + Send;
}

/// Files under a local data directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

impl StorageBackend for FsStorage {
    async fn fetch(&self, path: &str) -> Result<serde_json::Value> {
        let full = self.root.join(path);
        let bytes = match tokio::fs::read(&full).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(full.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        decode(&full.display().to_string(), &bytes)
    }
}

/// Parse a fetched body. `location` is the full path or URL, as in `NotFound`.
fn decode(location: &str, bytes: &[u8]) -> Result<serde_json::Value> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Decode {
        path: location.to_string(),
        source: e.into(),
    })
}

/// Plain GET against a static file server. No auth.
#[derive(Debug, Clone)]
pub struct HttpStorage {
    client: reqwest::Client,
    base: String,
}

impl HttpStorage {
    pub fn new(base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Use a preconfigured client (timeouts, proxy settings).
    pub fn with_client(base: &str, client: reqwest::Client) -> Self {
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }
}

impl StorageBackend for HttpStorage {
    async fn fetch(&self, path: &str) -> Result<serde_json::Value> {
        let url = self.url(path);
        tracing::debug!(%url, "GET");
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(url));
        }
        if !status.is_success() {
            return Err(StoreError::Status {
                path: url,
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await?;
        decode(&url, &body)
    }
}

/// Backend chosen from a configured data root: `http(s)://` URLs go over
/// HTTP, anything else is a local directory.
#[derive(Debug, Clone)]
pub enum Storage {
    Fs(FsStorage),
    Http(HttpStorage),
}

impl Storage {
    pub fn from_root(root: &str) -> Self {
        if root.starts_with("http://") || root.starts_with("https://") {
            Storage::Http(HttpStorage::new(root))
        } else {
            Storage::Fs(FsStorage::new(root))
        }
    }
}

impl StorageBackend for Storage {
    async fn fetch(&self, path: &str) -> Result<serde_json::Value> {
        match self {
            Storage::Fs(fs) => fs.fetch(path).await,
            Storage::Http(http) => http.fetch(path).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_fs_fetch_json() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/b.json"), r#"[{"x": 1}]"#).unwrap();

        let storage = FsStorage::new(dir.path());
        let value = storage.fetch("a/b.json").await.unwrap();
        assert_eq!(value[0]["x"], 1);
    }

    #[tokio::test]
    async fn test_fs_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = FsStorage::new(dir.path()).fetch("nope.json").await.unwrap_err();
        let expected = dir.path().join("nope.json").display().to_string();
        assert!(matches!(err, StoreError::NotFound(ref path) if *path == expected));
    }

    #[tokio::test]
    async fn test_fs_bad_json_is_decode_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        let err = FsStorage::new(dir.path()).fetch("bad.json").await.unwrap_err();
        let expected = dir.path().join("bad.json").display().to_string();
        assert!(matches!(err, StoreError::Decode { ref path, .. } if *path == expected));
    }

    #[test]
    fn test_storage_from_root() {
        assert!(matches!(Storage::from_root("https://example.org/data"), Storage::Http(_)));
        assert!(matches!(Storage::from_root("./data"), Storage::Fs(_)));
    }

    #[test]
    fn test_http_url_joining() {
        let http = HttpStorage::new("http://localhost:8000/data/");
        assert_eq!(http.url("/geojson/world.json"), "http://localhost:8000/data/geojson/world.json");
    }

    /// Serve canned responses by request path on an ephemeral port.
    /// Returns the base URL.
    async fn serve(routes: Vec<(&'static str, u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&request);
                let target = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = routes
                    .iter()
                    .find(|(route, _, _)| *route == target)
                    .map(|(_, status, body)| (*status, *body))
                    .unwrap_or((404, "not found"));
                let response = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/data")
    }

    fn local_http(base: &str) -> HttpStorage {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        HttpStorage::with_client(base, client)
    }

    #[tokio::test]
    async fn test_http_fetch_json_array() {
        let base = serve(vec![("/data/a/b.json", 200, r#"[{"ID": 1}, {"ID": 2}]"#)]).await;
        let value = local_http(&base).fetch("a/b.json").await.unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        assert_eq!(value[1]["ID"], 2);
    }

    #[tokio::test]
    async fn test_http_404_is_not_found() {
        let base = serve(vec![]).await;
        let err = local_http(&base).fetch("missing.json").await.unwrap_err();
        let expected = format!("{base}/missing.json");
        assert!(matches!(err, StoreError::NotFound(ref url) if *url == expected));
    }

    #[tokio::test]
    async fn test_http_server_error_is_status() {
        let base = serve(vec![("/data/boom.json", 500, "oops")]).await;
        let err = local_http(&base).fetch("boom.json").await.unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_http_bad_body_is_decode_error() {
        let base = serve(vec![("/data/bad.json", 200, "{not json")]).await;
        let err = local_http(&base).fetch("bad.json").await.unwrap_err();
        let expected = format!("{base}/bad.json");
        assert!(matches!(err, StoreError::Decode { ref path, .. } if *path == expected));
    }
}
