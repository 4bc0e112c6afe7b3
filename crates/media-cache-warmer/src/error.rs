//! Error types for the media cache warmer

use std::fmt;

#[derive(Debug)]
pub enum WarmerError {
    Config(String),
    /// Every configured URL failed to fetch
    NothingWarmed { failed: usize },
    Asset(asset_cache::AssetError),
    Io(Box<std::io::Error>),
}

impl fmt::Display for WarmerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarmerError::Config(msg) => write!(f, "Configuration error: {}", msg),
            WarmerError::NothingWarmed { failed } => {
                write!(f, "None of the {} configured URLs could be fetched", failed)
            }
            WarmerError::Asset(err) => write!(f, "Asset cache error: {}", err),
            WarmerError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for WarmerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WarmerError::Asset(err) => Some(err),
            WarmerError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<asset_cache::AssetError> for WarmerError {
    fn from(err: asset_cache::AssetError) -> Self {
        WarmerError::Asset(err)
    }
}

impl From<std::io::Error> for WarmerError {
    fn from(err: std::io::Error) -> Self {
        WarmerError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for WarmerError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        WarmerError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WarmerError>;
