//! Already-installed packages.
//!
//! A dependency counts as installed when its link exists and the linked
//! content directory holds a readable `package.json`. A link without metadata
//! (content not downloaded yet) is reported as not found so the next resolver
//! can take over.

use super::error::PkgError;
use super::package::{Dependencies, Package, PackageRef};
use super::resolver::Resolver;
use async_trait::async_trait;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Metadata file at the root of an installed package.
pub const PACKAGE_JSON: &str = "package.json";

/// A package whose content is already present on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPackage {
    id: String,
    dependencies: Dependencies,
}

#[derive(Deserialize)]
struct Manifest {
    #[serde(default)]
    dependencies: Option<Dependencies>,
}

impl LocalPackage {
    #[must_use]
    pub fn new(id: impl Into<String>, dependencies: Dependencies) -> Self {
        Self {
            id: id.into(),
            dependencies,
        }
    }

    /// Build a package from the metadata found at a link's target.
    ///
    /// The id is the name of the content-addressed directory holding `target`
    /// (`<root>/<id>/package`), since local metadata carries no content hash.
    pub fn from_manifest(target: &Path, raw: &[u8]) -> Result<Option<Self>, serde_json::Error> {
        let manifest: Manifest = serde_json::from_slice(raw)?;
        let Some(id) = target
            .parent()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
        else {
            return Ok(None);
        };

        Ok(Some(Self::new(id, manifest.dependencies.unwrap_or_default())))
    }
}

#[async_trait]
impl Package for LocalPackage {
    fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch_into(&self, _root: &Path) -> Result<(), PkgError> {
        Ok(())
    }
}

/// Outcome of inspecting a link on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    NotFound,
    Found(LocalPackage),
}

/// Inspect the filesystem entry at `link`.
#[must_use]
pub fn probe(link: &Path) -> Probe {
    let Ok(target) = fs::read_link(link) else {
        return Probe::NotFound;
    };
    let target = absolutize(link, target);

    let Ok(raw) = fs::read(target.join(PACKAGE_JSON)) else {
        debug!(link = %link.display(), "link present but content missing");
        return Probe::NotFound;
    };

    match LocalPackage::from_manifest(&target, &raw) {
        Ok(Some(pkg)) => Probe::Found(pkg),
        Ok(None) => Probe::NotFound,
        Err(e) => {
            warn!(link = %link.display(), error = %e, "unreadable package.json, refetching");
            Probe::NotFound
        }
    }
}

fn absolutize(link: &Path, target: PathBuf) -> PathBuf {
    if target.is_absolute() {
        return target;
    }
    match link.parent() {
        Some(parent) => parent.join(target),
        None => target,
    }
}

/// Resolves dependencies that are already installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalResolver;

impl LocalResolver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Resolver for LocalResolver {
    async fn resolve(
        &self,
        link: &Path,
        _name: &str,
        _version: &str,
    ) -> Result<Option<PackageRef>, PkgError> {
        let link = link.to_path_buf();
        let probed = tokio::task::spawn_blocking(move || probe(&link))
            .await
            .map_err(|e| PkgError::TaskFailed(e.to_string()))?;

        Ok(match probed {
            Probe::Found(pkg) => Some(Arc::new(pkg)),
            Probe::NotFound => None,
        })
    }
}
