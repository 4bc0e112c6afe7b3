//! Error types for the asset cache

use std::fmt;
use std::sync::Arc;

/// Asset cache errors
///
/// `Clone` so one de-duplicated fetch outcome can be delivered to every
/// caller waiting on the same asset.
#[derive(Debug, Clone)]
pub enum AssetError {
    /// The request failed before a response arrived
    Fetch(String),
    /// The server answered with a non-success status
    Http { status: u16, url: String },
    /// 401/403; never cached
    Unauthorized { status: u16, url: String },
    /// The response had no body; zero-length payloads are never stored
    EmptyPayload(String),
    /// The binary store rejected an operation
    Store(String),
    Io(Arc<std::io::Error>),
    Serialization(Arc<serde_json::Error>),
}

impl AssetError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AssetError::Unauthorized { .. })
    }
}

impl fmt::Display for AssetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetError::Fetch(msg) => write!(f, "Fetch error: {}", msg),
            AssetError::Http { status, url } => write!(f, "HTTP {} fetching {}", status, url),
            AssetError::Unauthorized { status, url } => {
                write!(f, "Authentication required ({}) fetching {}", status, url)
            }
            AssetError::EmptyPayload(url) => write!(f, "Empty payload from {}", url),
            AssetError::Store(msg) => write!(f, "Store error: {}", msg),
            AssetError::Io(err) => write!(f, "IO error: {}", err),
            AssetError::Serialization(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl std::error::Error for AssetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AssetError::Io(err) => Some(err.as_ref()),
            AssetError::Serialization(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AssetError {
    fn from(err: std::io::Error) -> Self {
        AssetError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for AssetError {
    fn from(err: serde_json::Error) -> Self {
        AssetError::Serialization(Arc::new(err))
    }
}

impl From<reqwest::Error> for AssetError {
    fn from(err: reqwest::Error) -> Self {
        AssetError::Fetch(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AssetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_display() {
        let err = AssetError::Http {
            status: 404,
            url: "https://cdn.example.com/hero.mp4".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "HTTP 404 fetching https://cdn.example.com/hero.mp4"
        );
    }

    #[test]
    fn test_unauthorized_display() {
        let err = AssetError::Unauthorized {
            status: 401,
            url: "https://cdn.example.com/private.jpg".to_string(),
        };
        assert!(err.is_unauthorized());
        assert!(format!("{}", err).starts_with("Authentication required"));
    }

    #[test]
    fn test_io_error_has_source() {
        let err = AssetError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(format!("{}", err).contains("disk full"));
    }
}
