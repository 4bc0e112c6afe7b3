//! Error types for the tiered cache

use crate::types::StorageTier;
use std::fmt;

/// Errors raised by a single storage backend
///
/// These never reach callers of [`crate::CacheManager`]; the manager logs
/// them and degrades to another tier.
#[derive(Debug)]
pub enum BackendError {
    QuotaExceeded {
        tier: StorageTier,
        needed: u64,
        available: u64,
    },
    Unavailable(StorageTier),
    Io(Box<std::io::Error>),
    Serialization(serde_json::Error),
}

impl BackendError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, BackendError::QuotaExceeded { .. })
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::QuotaExceeded {
                tier,
                needed,
                available,
            } => write!(
                f,
                "Quota exceeded in {} storage: needed {} bytes, {} available",
                tier, needed, available
            ),
            BackendError::Unavailable(tier) => write!(f, "{} storage is unavailable", tier),
            BackendError::Io(err) => write!(f, "IO error: {}", err),
            BackendError::Serialization(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackendError::Io(err) => Some(err.as_ref()),
            BackendError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Serialization(err)
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Failure reported by a user-supplied fetcher
///
/// `Clone` so one de-duplicated fetch outcome can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The request never produced a response
    Network(String),
    /// The server answered with a non-success status
    Http { status: u16, message: String },
    /// 401/403: the response depends on credentials and must not be cached
    AuthRequired(String),
    /// The response body could not be decoded
    Decode(String),
}

impl FetchError {
    /// Classify an HTTP status, mapping 401 and 403 to [`FetchError::AuthRequired`]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => FetchError::AuthRequired(message),
            _ => FetchError::Http { status, message },
        }
    }

    /// Build an error from a bare message, recognizing auth failures by text
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains("Authentication required") {
            FetchError::AuthRequired(message)
        } else {
            FetchError::Network(message)
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::AuthRequired(_))
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Network(msg) => write!(f, "Network error: {}", msg),
            FetchError::Http { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            FetchError::AuthRequired(msg) => write!(f, "Authentication required: {}", msg),
            FetchError::Decode(msg) => write!(f, "Decode error: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}
