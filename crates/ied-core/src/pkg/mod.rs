//! Package installation.
//!
//! Provides:
//! - The [`Package`] and [`Resolver`] abstractions
//! - Local (already installed) and registry resolution, ordered by [`ChainResolver`]
//! - Tarball download, verification and extraction
//! - Links from `node_modules` paths to content directories
//! - The [`Store`] that ties them together into a concurrent recursive install

pub mod error;
pub mod extract;
pub mod link;
pub mod local;
pub mod package;
pub mod registry;
pub mod resolver;
pub mod spec;
pub mod store;

pub use error::{codes as pkg_codes, PkgError};
pub use extract::{extract_tgz_atomic, unpack, unpack_tgz};
pub use link::{link_package, LinkOutcome};
pub use local::{probe, LocalPackage, LocalResolver, Probe, PACKAGE_JSON};
pub use package::{Dependencies, Package, PackageRef};
pub use registry::{
    verify_shasum, Dist, RegistryClient, RegistryPackage, RegistryResolver, VersionManifest,
    MAX_TARBALL_SIZE,
};
pub use resolver::{ChainResolver, Resolver};
pub use spec::{PackageSpec, ANY_VERSION};
pub use store::{Store, NODE_MODULES, PACKAGE_DIR};
