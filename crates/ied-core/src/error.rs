use std::path::PathBuf;
use thiserror::Error;

/// Core error type for configuration and setup.
///
/// Failures during installation are reported as [`crate::pkg::PkgError`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read config at {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Missing registry URL")]
    MissingRegistry,

    #[error("Invalid registry URL '{url}': {source}")]
    InvalidRegistry {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Home directory not found")]
    HomeNotFound,
}
