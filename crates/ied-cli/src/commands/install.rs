//! `ied install`: install packages into `<cwd>/node_modules`.

use futures::future::join_all;
use ied_core::pkg::{
    ChainResolver, LocalResolver, PackageSpec, PkgError, RegistryClient, RegistryResolver, Store,
    NODE_MODULES,
};
use ied_core::Config;
use miette::{miette, IntoDiagnostic, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Build a store over `root` that prefers packages already on disk.
pub fn build_store(
    root: &Path,
    config: &Config,
    concurrency: Option<usize>,
) -> Result<Store, PkgError> {
    let client = RegistryClient::new(&config.registry)?;
    let chain = ChainResolver::default()
        .with(LocalResolver::new())
        .with(RegistryResolver::new(client));

    let store = Store::new(root, Arc::new(chain));
    Ok(match concurrency {
        Some(limit) => store.with_concurrency_limit(limit),
        None => store,
    })
}

/// Run the install command.
///
/// Every top-level spec is installed concurrently against one store. A
/// failing package does not stop the others; each failure is logged and the
/// command errors once all of them have finished.
pub fn run(cwd: &Path, config: &Config, specs: &[String], concurrency: Option<usize>) -> Result<()> {
    let specs = specs
        .iter()
        .map(|raw| PackageSpec::parse(raw))
        .collect::<Result<Vec<_>, _>>()
        .into_diagnostic()?;

    let root = cwd.join(NODE_MODULES);
    let store = Arc::new(build_store(&root, config, concurrency).into_diagnostic()?);

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let outcomes = runtime
        .block_on(async {
            store.init().await?;
            let installs = specs
                .iter()
                .map(|spec| store.install(None, &spec.name, &spec.range));
            Ok::<_, PkgError>(join_all(installs).await)
        })
        .into_diagnostic()?;

    let mut failed = 0usize;
    for (spec, outcome) in specs.iter().zip(outcomes) {
        match outcome {
            Ok(()) => info!(name = %spec.name, range = %spec.range, "installed"),
            Err(err) => {
                failed += 1;
                for cause in err.errors() {
                    error!(
                        name = %spec.name,
                        range = %spec.range,
                        code = cause.code(),
                        "{cause}"
                    );
                }
            }
        }
    }

    info!(packages = store.len(), root = %root.display(), "done");

    if failed > 0 {
        return Err(miette!(
            "{failed} of {} package(s) failed to install",
            specs.len()
        ));
    }
    Ok(())
}
