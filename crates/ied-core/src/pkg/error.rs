//! Package installation error types.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Package installation error codes.
pub mod codes {
    pub const PKG_SPEC_INVALID: &str = "PKG_SPEC_INVALID";
    pub const PKG_UNRESOLVED: &str = "PKG_UNRESOLVED";
    pub const PKG_REGISTRY_ERROR: &str = "PKG_REGISTRY_ERROR";
    pub const PKG_METADATA_INVALID: &str = "PKG_METADATA_INVALID";
    pub const PKG_DOWNLOAD_FAILED: &str = "PKG_DOWNLOAD_FAILED";
    pub const PKG_CORRUPTED: &str = "PKG_CORRUPTED";
    pub const PKG_EXTRACT_FAILED: &str = "PKG_EXTRACT_FAILED";
    pub const PKG_LINK_CONFLICT: &str = "PKG_LINK_CONFLICT";
    pub const PKG_IO_ERROR: &str = "PKG_IO_ERROR";
    pub const PKG_TASK_FAILED: &str = "PKG_TASK_FAILED";
    pub const PKG_INSTALL_FAILED: &str = "PKG_INSTALL_FAILED";
}

/// Package installation error.
#[derive(Error, Debug)]
pub enum PkgError {
    #[error("Invalid package spec: {0}")]
    Spec(String),

    /// No resolver produced a package for this name and version spec.
    #[error("failed to resolve {name}@{version}")]
    Unresolved { name: String, version: String },

    #[error("Invalid registry URL '{url}': {message}")]
    InvalidRegistry { url: String, message: String },

    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Registry returned status {status} for {url}")]
    RegistryStatus { url: String, status: u16 },

    #[error("Invalid metadata for {name}@{version}: {message}")]
    InvalidMetadata {
        name: String,
        version: String,
        message: String,
    },

    #[error("Tarball too large: {size} bytes (max: {max}) from {url}")]
    TooLarge { url: String, size: u64, max: u64 },

    #[error("shasum mismatch while downloading {tarball}: {actual} <-> {expected}")]
    Corrupted {
        tarball: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to extract into {}: {message}", .path.display())]
    Extract { path: PathBuf, message: String },

    #[error("{} already exists and does not link to {}", .link.display(), .expected.display())]
    LinkConflict { link: PathBuf, expected: PathBuf },

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Install task failed: {0}")]
    TaskFailed(String),

    /// Every failure collected from the concurrent units of one install.
    #[error("{} error(s) occurred:\n{}", .0.len(), format_list(.0))]
    Aggregate(Vec<PkgError>),
}

fn format_list(errors: &[PkgError]) -> String {
    errors
        .iter()
        .map(|e| format!("* {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl PkgError {
    /// Get the stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Spec(_) => codes::PKG_SPEC_INVALID,
            Self::Unresolved { .. } => codes::PKG_UNRESOLVED,
            Self::InvalidRegistry { .. } | Self::Http { .. } | Self::RegistryStatus { .. } => {
                codes::PKG_REGISTRY_ERROR
            }
            Self::InvalidMetadata { .. } => codes::PKG_METADATA_INVALID,
            Self::TooLarge { .. } => codes::PKG_DOWNLOAD_FAILED,
            Self::Corrupted { .. } => codes::PKG_CORRUPTED,
            Self::Extract { .. } => codes::PKG_EXTRACT_FAILED,
            Self::LinkConflict { .. } => codes::PKG_LINK_CONFLICT,
            Self::Io { .. } => codes::PKG_IO_ERROR,
            Self::TaskFailed(_) => codes::PKG_TASK_FAILED,
            Self::Aggregate(_) => codes::PKG_INSTALL_FAILED,
        }
    }

    /// Create a spec invalid error.
    pub fn spec_invalid(msg: impl Into<String>) -> Self {
        Self::Spec(msg.into())
    }

    /// Create an unresolved dependency error.
    #[must_use]
    pub fn unresolved(name: &str, version: &str) -> Self {
        Self::Unresolved {
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    /// Create an extraction failed error.
    pub fn extract_failed(path: &Path, msg: impl Into<String>) -> Self {
        Self::Extract {
            path: path.to_path_buf(),
            message: msg.into(),
        }
    }

    /// Attach a path to an IO error.
    #[must_use]
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Combine outcomes into one error, flattening nested aggregates.
    ///
    /// Returns `None` when there is nothing to report.
    #[must_use]
    pub fn aggregate(errors: impl IntoIterator<Item = PkgError>) -> Option<Self> {
        let mut flat = Vec::new();
        for err in errors {
            match err {
                Self::Aggregate(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.is_empty() {
            None
        } else {
            Some(Self::Aggregate(flat))
        }
    }

    /// The individual failures behind this error.
    #[must_use]
    pub fn errors(&self) -> &[PkgError] {
        match self {
            Self::Aggregate(inner) => inner,
            other => std::slice::from_ref(other),
        }
    }
}
