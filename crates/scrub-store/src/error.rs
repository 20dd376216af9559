use std::fmt;
use std::sync::Arc;

/// Storage and broker failures.
///
/// `Clone` so that one shared in-flight fetch can hand the same failure to
/// every waiter; foreign error sources are held behind `Arc`.
#[derive(Debug, Clone)]
pub enum StoreError {
    NotFound(String),
    Io(Arc<std::io::Error>),
    Http(Arc<reqwest::Error>),
    Status { path: String, status: u16 },
    Decode { path: String, source: Arc<serde_json::Error> },
    Config(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(path) => write!(f, "not found: {path}"),
            StoreError::Io(e) => write!(f, "I/O error: {e}"),
            StoreError::Http(e) => write!(f, "HTTP error: {e}"),
            StoreError::Status { path, status } => write!(f, "HTTP {status} for {path}"),
            StoreError::Decode { path, source } => write!(f, "invalid JSON in {path}: {source}"),
            StoreError::Config(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e.as_ref()),
            StoreError::Http(e) => Some(e.as_ref()),
            StoreError::Decode { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Http(Arc::new(e))
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(e: toml::de::Error) -> Self {
        StoreError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
