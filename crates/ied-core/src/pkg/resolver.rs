//! Resolution strategies and the chain that orders them.

use super::error::PkgError;
use super::package::PackageRef;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// A strategy for turning a dependency request into a package.
#[async_trait]
pub trait Resolver: Send + Sync + fmt::Debug {
    /// Resolve `name@version` as requested at `link`.
    ///
    /// `Ok(None)` means this strategy has nothing for the request and the next
    /// one should be consulted. Errors are hard failures.
    async fn resolve(
        &self,
        link: &Path,
        name: &str,
        version: &str,
    ) -> Result<Option<PackageRef>, PkgError>;
}

/// Tries its resolvers in order until one produces a package.
///
/// The first error aborts the chain without consulting later resolvers.
#[derive(Debug, Clone, Default)]
pub struct ChainResolver {
    resolvers: Vec<Arc<dyn Resolver>>,
}

impl ChainResolver {
    #[must_use]
    pub fn new(resolvers: Vec<Arc<dyn Resolver>>) -> Self {
        Self { resolvers }
    }

    /// Append a resolver to the end of the chain.
    #[must_use]
    pub fn with(mut self, resolver: impl Resolver + 'static) -> Self {
        self.resolvers.push(Arc::new(resolver));
        self
    }
}

#[async_trait]
impl Resolver for ChainResolver {
    async fn resolve(
        &self,
        link: &Path,
        name: &str,
        version: &str,
    ) -> Result<Option<PackageRef>, PkgError> {
        for resolver in &self.resolvers {
            if let Some(pkg) = resolver.resolve(link, name, version).await? {
                return Ok(Some(pkg));
            }
        }
        Ok(None)
    }
}
