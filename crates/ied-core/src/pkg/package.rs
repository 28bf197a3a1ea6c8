//! The package abstraction shared by every resolver.

use super::error::PkgError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Dependency name to version spec (range or tag).
pub type Dependencies = BTreeMap<String, String>;

/// Shared handle to a resolved package.
pub type PackageRef = Arc<dyn Package>;

/// A resolved dependency.
///
/// A package is identified by its *content* ([`Package::id`]), not by its name
/// or version: two resolutions yielding identical content are installed once.
#[async_trait]
pub trait Package: Send + Sync + fmt::Debug {
    /// Sub-dependencies of this package.
    fn dependencies(&self) -> &Dependencies;

    /// Unique identifier of this package's content.
    fn id(&self) -> &str;

    /// Materialize the package's files under `<root>/<id>`.
    ///
    /// Must be safe to call on content that is already present.
    async fn fetch_into(&self, root: &Path) -> Result<(), PkgError>;
}
