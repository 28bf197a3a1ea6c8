//! The content-addressed store and the concurrent install algorithm.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<name>                        -> <root>/<id>/package   (top-level requests)
//! <root>/<id>/package/                    unpacked package content
//! <root>/<id>/node_modules/<dep>       -> <root>/<dep-id>/package
//! ```
//!
//! Each content id is expanded (fetched and its dependencies installed) at
//! most once per store, no matter how many edges of the dependency graph lead
//! to it. Every edge still gets its own link.

use super::error::PkgError;
use super::link::{link_package, LinkOutcome};
use super::package::{Package, PackageRef};
use super::resolver::Resolver;
use super::spec::PackageSpec;
use futures::future::{join_all, BoxFuture, FutureExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Directory holding a package's dependency links.
pub const NODE_MODULES: &str = "node_modules";

/// Directory holding a package's unpacked content.
pub const PACKAGE_DIR: &str = "package";

/// Installs packages into a content-addressed directory tree.
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    resolver: Arc<dyn Resolver>,
    /// Content id -> package, for every id scheduled for installation.
    packages: Mutex<HashMap<String, PackageRef>>,
    /// Bounds concurrent resolve/fetch operations when set.
    limiter: Option<Arc<Semaphore>>,
}

impl Store {
    /// Create a store rooted at `root`.
    ///
    /// A relative root is resolved against the current directory, since link
    /// targets are written as absolute paths under it.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            root: absolute_root(root.into()),
            resolver,
            packages: Mutex::new(HashMap::new()),
            limiter: None,
        }
    }

    /// Allow at most `limit` resolve or fetch operations in flight.
    ///
    /// Permits are never held while waiting on sub-installs, so any limit
    /// makes progress.
    #[must_use]
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.limiter = Some(Arc::new(Semaphore::new(limit.max(1))));
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the store root if it doesn't exist.
    pub async fn init(&self) -> Result<(), PkgError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| PkgError::io(&self.root, e))
    }

    /// Where the module resolution algorithm looks for `name` required from
    /// `parent` (or from the project, for top-level requests).
    #[must_use]
    pub fn link_path(&self, parent: Option<&dyn Package>, name: &str) -> PathBuf {
        match parent {
            None => self.root.join(name),
            Some(parent) => self.root.join(parent.id()).join(NODE_MODULES).join(name),
        }
    }

    /// Physical location of the content with the given id.
    ///
    /// It might not exist yet; links may point at it before it is fetched.
    #[must_use]
    pub fn target_path(&self, id: &str) -> PathBuf {
        self.root.join(id).join(PACKAGE_DIR)
    }

    /// Record `pkg` in the dedup table.
    ///
    /// Returns `true` only for the first registration of its id. That caller
    /// owns fetching the package and installing its dependencies; the
    /// package's `node_modules` directory is created for it here.
    pub async fn register(&self, pkg: &PackageRef) -> Result<bool, PkgError> {
        if !self.try_register(pkg) {
            return Ok(false);
        }

        let dir = self.root.join(pkg.id()).join(NODE_MODULES);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PkgError::io(&dir, e))?;
        Ok(true)
    }

    fn try_register(&self, pkg: &PackageRef) -> bool {
        let mut packages = self
            .packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if packages.contains_key(pkg.id()) {
            return false;
        }
        packages.insert(pkg.id().to_string(), Arc::clone(pkg));
        true
    }

    /// Whether content with this id has been registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Number of distinct content ids registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recursively install `name@version` as a dependency of `parent`.
    ///
    /// Dependencies and the package's own fetch run as concurrent tasks. The
    /// returned future completes once all of them have finished; every failure
    /// among them is reported in one [`PkgError::Aggregate`].
    pub fn install(
        self: &Arc<Self>,
        parent: Option<PackageRef>,
        name: &str,
        version: &str,
    ) -> BoxFuture<'static, Result<(), PkgError>> {
        let store = Arc::clone(self);
        let name = name.to_string();
        let version = version.to_string();
        async move { store.install_edge(parent, name, version).await }.boxed()
    }

    async fn install_edge(
        self: Arc<Self>,
        parent: Option<PackageRef>,
        name: String,
        version: String,
    ) -> Result<(), PkgError> {
        info!(%name, %version, "installing");

        // Names from registry metadata become path components under the root
        PackageSpec::validate_name(&name)?;
        let link = self.link_path(parent.as_deref(), &name);

        let resolved = {
            let _permit = self.acquire().await;
            self.resolver.resolve(&link, &name, &version).await?
        };
        let Some(pkg) = resolved else {
            return Err(PkgError::unresolved(&name, &version));
        };

        let target = self.target_path(pkg.id());
        let link_for_task = link.clone();
        let outcome = tokio::task::spawn_blocking(move || link_package(&target, &link_for_task))
            .await
            .map_err(|e| PkgError::TaskFailed(e.to_string()))??;
        if outcome == LinkOutcome::Existing {
            debug!(link = %link.display(), "already linked");
        }

        if !self.register(&pkg).await? {
            debug!(%name, id = pkg.id(), "already scheduled");
            return Ok(());
        }

        let deps = pkg.dependencies();
        let mut tasks: Vec<JoinHandle<Result<(), PkgError>>> = Vec::with_capacity(deps.len() + 1);

        for (dep_name, dep_version) in deps {
            tasks.push(tokio::spawn(self.install(
                Some(Arc::clone(&pkg)),
                dep_name,
                dep_version,
            )));
        }

        let store = Arc::clone(&self);
        let fetched = Arc::clone(&pkg);
        tasks.push(tokio::spawn(async move {
            let _permit = store.acquire().await;
            debug!(id = fetched.id(), "fetching");
            fetched.fetch_into(&store.root).await
        }));

        let errors = join_all(tasks)
            .await
            .into_iter()
            .filter_map(|outcome| match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(e) => Some(PkgError::TaskFailed(e.to_string())),
            });

        match PkgError::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        match &self.limiter {
            Some(limiter) => Arc::clone(limiter).acquire_owned().await.ok(),
            None => None,
        }
    }
}

fn absolute_root(root: PathBuf) -> PathBuf {
    if root.is_absolute() {
        return root;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(root),
        Err(_) => root,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::pkg::package::Dependencies;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[derive(Debug)]
    struct FakePackage {
        id: String,
        deps: Dependencies,
        fetches: AtomicUsize,
        fail_fetch: bool,
    }

    #[async_trait]
    impl Package for FakePackage {
        fn dependencies(&self) -> &Dependencies {
            &self.deps
        }

        fn id(&self) -> &str {
            &self.id
        }

        async fn fetch_into(&self, root: &Path) -> Result<(), PkgError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch {
                return Err(PkgError::Corrupted {
                    tarball: format!("{}.tgz", self.id),
                    expected: self.id.clone(),
                    actual: "0000".to_string(),
                });
            }
            let dir = root.join(&self.id).join(PACKAGE_DIR);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| PkgError::io(&dir, e))?;
            tokio::fs::write(dir.join("index.js"), format!("module.exports = '{}'", self.id))
                .await
                .map_err(|e| PkgError::io(&dir, e))
        }
    }

    fn fake(id: &str, deps: &[(&str, &str)]) -> Arc<FakePackage> {
        Arc::new(FakePackage {
            id: id.to_string(),
            deps: deps
                .iter()
                .map(|(n, v)| ((*n).to_string(), (*v).to_string()))
                .collect(),
            fetches: AtomicUsize::new(0),
            fail_fetch: false,
        })
    }

    fn failing_fetch(id: &str) -> Arc<FakePackage> {
        Arc::new(FakePackage {
            id: id.to_string(),
            deps: Dependencies::new(),
            fetches: AtomicUsize::new(0),
            fail_fetch: true,
        })
    }

    #[derive(Debug, Default)]
    struct FakeResolver {
        by_name: HashMap<String, Arc<FakePackage>>,
        broken: HashSet<String>,
    }

    impl FakeResolver {
        fn with(mut self, name: &str, pkg: &Arc<FakePackage>) -> Self {
            self.by_name.insert(name.to_string(), Arc::clone(pkg));
            self
        }

        fn broken(mut self, name: &str) -> Self {
            self.broken.insert(name.to_string());
            self
        }
    }

    #[async_trait]
    impl Resolver for FakeResolver {
        async fn resolve(
            &self,
            _link: &Path,
            name: &str,
            _version: &str,
        ) -> Result<Option<PackageRef>, PkgError> {
            if self.broken.contains(name) {
                return Err(PkgError::RegistryStatus {
                    url: format!("http://registry.test/{name}"),
                    status: 500,
                });
            }
            Ok(self
                .by_name
                .get(name)
                .map(|pkg| Arc::clone(pkg) as PackageRef))
        }
    }

    async fn store_with(root: &Path, resolver: FakeResolver) -> Arc<Store> {
        let store = Store::new(root, Arc::new(resolver));
        store.init().await.unwrap();
        Arc::new(store)
    }

    fn dir_listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_link_and_target_paths() {
        let store = Store::new("/nm", Arc::new(FakeResolver::default()));
        let parent = fake("abc", &[]);

        assert_eq!(store.link_path(None, "app"), PathBuf::from("/nm/app"));
        assert_eq!(
            store.link_path(Some(&*parent as &dyn Package), "left-pad"),
            PathBuf::from("/nm/abc/node_modules/left-pad")
        );
        assert_eq!(store.target_path("abc"), PathBuf::from("/nm/abc/package"));
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), FakeResolver::default()).await;

        let first: PackageRef = fake("same", &[]);
        let second: PackageRef = fake("same", &[("other", "*")]);

        assert!(store.register(&first).await.unwrap());
        let after_first = dir_listing(dir.path());
        assert_eq!(after_first, vec!["same".to_string()]);
        assert!(dir.path().join("same").join(NODE_MODULES).is_dir());

        assert!(!store.register(&second).await.unwrap());
        assert_eq!(dir_listing(dir.path()), after_first);
        assert_eq!(store.len(), 1);
        assert!(store.contains("same"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_has_one_winner() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), FakeResolver::default()).await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let pkg: PackageRef = fake("racy", &[]);
                    store.register(&pkg).await.unwrap()
                })
            })
            .collect();

        let winners = join_all(handles)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_install_single_package() {
        let dir = tempdir().unwrap();
        let left_pad = fake("abc123", &[]);
        let store = store_with(dir.path(), FakeResolver::default().with("left-pad", &left_pad)).await;

        store.install(None, "left-pad", "*").await.unwrap();

        let link = dir.path().join("left-pad");
        assert_eq!(
            fs::read_link(&link).unwrap(),
            dir.path().join("abc123").join("package")
        );
        assert!(link.join("index.js").is_file());
        assert!(dir.path().join("abc123").join(NODE_MODULES).is_dir());
        assert_eq!(left_pad.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shared_content_fetched_once() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        let c = fake("c1", &[]);
        let a = fake("a1", &[("c", "^1.0.0")]);
        let b = fake("b1", &[("c", "~1.2.0"), ("c-alias", "*")]);
        let app = fake("app1", &[("a", "*"), ("b", "*")]);
        let resolver = FakeResolver::default()
            .with("app", &app)
            .with("a", &a)
            .with("b", &b)
            .with("c", &c)
            .with("c-alias", &c);
        let store = store_with(root, resolver).await;

        store.install(None, "app", "*").await.unwrap();

        for pkg in [&app, &a, &b, &c] {
            assert_eq!(pkg.fetches.load(Ordering::SeqCst), 1, "{} fetched once", pkg.id);
        }
        assert_eq!(store.len(), 4);

        let c_target = root.join("c1").join("package");
        let c_links = [
            root.join("a1").join(NODE_MODULES).join("c"),
            root.join("b1").join(NODE_MODULES).join("c"),
            root.join("b1").join(NODE_MODULES).join("c-alias"),
        ];
        for link in &c_links {
            assert_eq!(fs::read_link(link).unwrap(), c_target);
        }
        assert_eq!(
            fs::read_link(root.join("app1").join(NODE_MODULES).join("a")).unwrap(),
            root.join("a1").join("package")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cyclic_graph_terminates() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        let a = fake("a1", &[("b", "*")]);
        let b = fake("b1", &[("a", "*")]);
        let store = store_with(root, FakeResolver::default().with("a", &a).with("b", &b)).await;

        store.install(None, "a", "*").await.unwrap();

        assert_eq!(a.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(b.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(
            fs::read_link(root.join("b1").join(NODE_MODULES).join("a")).unwrap(),
            root.join("a1").join("package")
        );
    }

    #[tokio::test]
    async fn test_unresolved_top_level() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), FakeResolver::default()).await;

        let err = store.install(None, "nope", "^9.9.9").await.unwrap_err();

        assert!(matches!(
            &err,
            PkgError::Unresolved { name, version } if name == "nope" && version == "^9.9.9"
        ));
        assert!(dir.path().join("nope").symlink_metadata().is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_resolver_error_propagates() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), FakeResolver::default().broken("flaky")).await;

        let err = store.install(None, "flaky", "*").await.unwrap_err();
        assert!(matches!(err, PkgError::RegistryStatus { status: 500, .. }));
        assert!(dir.path().join("flaky").symlink_metadata().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_partial_failure_is_aggregated() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        let x = fake("x1", &[]);
        let z = fake("z1", &[]);
        let parent = fake("p1", &[("x", "*"), ("y", "^2.0.0"), ("z", "*")]);
        let resolver = FakeResolver::default()
            .with("parent", &parent)
            .with("x", &x)
            .with("z", &z);
        let store = store_with(root, resolver).await;

        let err = store.install(None, "parent", "*").await.unwrap_err();

        let errors = err.errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            PkgError::Unresolved { name, version } if name == "y" && version == "^2.0.0"
        ));

        let nm = root.join("p1").join(NODE_MODULES);
        assert!(nm.join("x").symlink_metadata().is_ok());
        assert!(nm.join("z").symlink_metadata().is_ok());
        assert!(nm.join("y").symlink_metadata().is_err());
        assert_eq!(x.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(z.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(parent.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_nested_failures_are_flattened() {
        let dir = tempdir().unwrap();

        let broken = failing_fetch("bad1");
        let mid = fake("mid1", &[("bad", "*"), ("gone", "*")]);
        let top = fake("top1", &[("mid", "*")]);
        let resolver = FakeResolver::default()
            .with("top", &top)
            .with("mid", &mid)
            .with("bad", &broken);
        let store = store_with(dir.path(), resolver).await;

        let err = store.install(None, "top", "*").await.unwrap_err();

        let codes: HashSet<&str> = err.errors().iter().map(PkgError::code).collect();
        assert_eq!(err.errors().len(), 2);
        assert!(codes.contains(crate::pkg::error::codes::PKG_CORRUPTED));
        assert!(codes.contains(crate::pkg::error::codes::PKG_UNRESOLVED));
        assert!(dir.path().join("top1").join("package").is_dir());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrency_limit_makes_progress() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        let leaf = fake("leaf1", &[]);
        let a = fake("a1", &[("leaf", "*")]);
        let b = fake("b1", &[("leaf", "*"), ("a", "*")]);
        let app = fake("app1", &[("a", "*"), ("b", "*")]);
        let resolver = FakeResolver::default()
            .with("app", &app)
            .with("a", &a)
            .with("b", &b)
            .with("leaf", &leaf);
        let store = Store::new(root, Arc::new(resolver)).with_concurrency_limit(1);
        store.init().await.unwrap();
        let store = Arc::new(store);

        store.install(None, "app", "*").await.unwrap();

        assert_eq!(store.len(), 4);
        assert_eq!(leaf.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reinstall_tolerates_existing_links() {
        let dir = tempdir().unwrap();
        let dep = fake("dep1", &[]);
        let app = fake("app1", &[("dep", "*")]);
        let resolver = FakeResolver::default().with("app", &app).with("dep", &dep);

        store_with(dir.path(), resolver)
            .await
            .install(None, "app", "*")
            .await
            .unwrap();

        // A fresh store (new run) over the same tree
        let resolver = FakeResolver::default().with("app", &app).with("dep", &dep);
        store_with(dir.path(), resolver)
            .await
            .install(None, "app", "*")
            .await
            .unwrap();

        assert_eq!(app.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_link_conflict_fails_edge() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("left-pad")).unwrap();

        let left_pad = fake("abc123", &[]);
        let store = store_with(dir.path(), FakeResolver::default().with("left-pad", &left_pad)).await;

        let err = store.install(None, "left-pad", "*").await.unwrap_err();
        assert!(matches!(err, PkgError::LinkConflict { .. }));
        assert_eq!(left_pad.fetches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_relative_root_is_made_absolute() {
        let store = Store::new("proj/node_modules", Arc::new(FakeResolver::default()));

        let expected = std::env::current_dir().unwrap().join("proj").join("node_modules");
        assert_eq!(store.root(), expected);
        assert!(store.target_path("id8").is_absolute());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_path_like_dependency_names_fail_their_edge() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("proj").join(NODE_MODULES);

        let ok = fake("ok1", &[]);
        let evil = fake("evil1", &[]);
        let app = fake(
            "app1",
            &[("../../../escaped", "*"), ("/abs/escaped", "*"), ("ok", "*")],
        );
        let resolver = FakeResolver::default()
            .with("app", &app)
            .with("ok", &ok)
            .with("../../../escaped", &evil)
            .with("/abs/escaped", &evil);
        let store = store_with(&root, resolver).await;

        let err = store.install(None, "app", "*").await.unwrap_err();

        assert_eq!(err.errors().len(), 2);
        assert!(err
            .errors()
            .iter()
            .all(|e| e.code() == crate::pkg::error::codes::PKG_SPEC_INVALID));
        assert!(dir.path().join("escaped").symlink_metadata().is_err());
        assert!(dir.path().join("proj").join("escaped").symlink_metadata().is_err());
        assert_eq!(evil.fetches.load(Ordering::SeqCst), 0);
        assert!(root.join("app1").join(NODE_MODULES).join("ok").symlink_metadata().is_ok());
        assert_eq!(ok.fetches.load(Ordering::SeqCst), 1);
    }
}
