//! CommonJS registry client and the packages it resolves.

use super::error::PkgError;
use super::extract::extract_tgz_atomic;
use super::package::{Dependencies, Package, PackageRef};
use super::resolver::Resolver;
use super::store::PACKAGE_DIR;
use crate::version::user_agent;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use sha1::{Digest, Sha1};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Maximum tarball size (200 MB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

/// Download timeout in seconds.
const DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Registry client for fetching version documents and tarballs.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
}

impl RegistryClient {
    /// Create a new registry client with the given root URL.
    pub fn new(base_url: &str) -> Result<Self, PkgError> {
        let invalid = |message: String| PkgError::InvalidRegistry {
            url: base_url.to_string(),
            message,
        };

        let mut url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(invalid("URL cannot be used as a base".to_string()));
        }
        // Relative joins (ping) need a trailing slash
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .user_agent(user_agent())
            .build()
            .map_err(|e| invalid(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: url,
            http,
        })
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL of the version document for `name@version`.
    ///
    /// Name and version are each encoded as a single path segment, so scoped
    /// names keep their `/` escaped.
    pub fn version_url(&self, name: &str, version: &str) -> Result<Url, PkgError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| PkgError::InvalidRegistry {
                url: self.base_url.to_string(),
                message: "URL cannot be used as a base".to_string(),
            })?
            .pop_if_empty()
            .push(name)
            .push(version);
        Ok(url)
    }

    /// Fetch the version document for `name@version`.
    ///
    /// Returns `None` if the registry does not know the name or version.
    pub async fn fetch_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<VersionManifest>, PkgError> {
        let url = self.version_url(name, version)?;
        debug!(%url, "fetching version document");

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| PkgError::Http {
                url: url.to_string(),
                source,
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(PkgError::RegistryStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|source| PkgError::Http {
            url: url.to_string(),
            source,
        })?;

        let manifest = VersionManifest::parse(name, version, &body)?;
        Ok(Some(manifest))
    }

    /// Download a tarball, refusing bodies larger than `max_bytes`.
    pub async fn download(&self, url: &str, max_bytes: u64) -> Result<Bytes, PkgError> {
        let http_err = |source| PkgError::Http {
            url: url.to_string(),
            source,
        };

        let response = self
            .http
            .get(url)
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .send()
            .await
            .map_err(http_err)?;

        if !response.status().is_success() {
            return Err(PkgError::RegistryStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        if let Some(len) = response.content_length() {
            if len > max_bytes {
                return Err(PkgError::TooLarge {
                    url: url.to_string(),
                    size: len,
                    max: max_bytes,
                });
            }
        }

        let bytes = response.bytes().await.map_err(http_err)?;

        if bytes.len() as u64 > max_bytes {
            return Err(PkgError::TooLarge {
                url: url.to_string(),
                size: bytes.len() as u64,
                max: max_bytes,
            });
        }

        Ok(bytes)
    }

    /// Check that the registry is reachable by hitting `/-/ping?write=true`.
    ///
    /// Returns the response body as JSON, or `null` if it is not JSON.
    pub async fn ping(&self) -> Result<serde_json::Value, PkgError> {
        let url = self
            .base_url
            .join("-/ping?write=true")
            .map_err(|e| PkgError::InvalidRegistry {
                url: self.base_url.to_string(),
                message: e.to_string(),
            })?;

        let http_err = |source| PkgError::Http {
            url: url.to_string(),
            source,
        };

        let response = self.http.get(url.clone()).send().await.map_err(http_err)?;
        if !response.status().is_success() {
            return Err(PkgError::RegistryStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await.map_err(http_err)?;
        Ok(serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A version document as served by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dependencies: Dependencies,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dev_dependencies: Dependencies,
    #[serde(default, deserialize_with = "null_as_default")]
    pub peer_dependencies: Dependencies,
    pub dist: Dist,
}

/// Distribution block of a version document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dist {
    pub tarball: String,
    pub shasum: String,
}

impl VersionManifest {
    /// Decode and validate the document returned for `name@version`.
    pub fn parse(name: &str, version: &str, raw: &[u8]) -> Result<Self, PkgError> {
        let invalid = |message: String| PkgError::InvalidMetadata {
            name: name.to_string(),
            version: version.to_string(),
            message,
        };

        let manifest: Self = serde_json::from_slice(raw).map_err(|e| invalid(e.to_string()))?;

        if manifest.dist.tarball.is_empty() {
            return Err(invalid("missing dist.tarball".to_string()));
        }
        // The shasum names a directory in the store
        if manifest.dist.shasum.is_empty()
            || !manifest.dist.shasum.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(invalid(format!(
                "invalid dist.shasum '{}'",
                manifest.dist.shasum
            )));
        }

        Ok(manifest)
    }
}

/// Check the SHA-1 digest of a downloaded tarball.
pub fn verify_shasum(tarball: &str, expected: &str, bytes: &[u8]) -> Result<(), PkgError> {
    let actual = hex::encode(Sha1::digest(bytes));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(PkgError::Corrupted {
            tarball: tarball.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

/// A package resolved from the registry.
///
/// Its id is the tarball's shasum.
#[derive(Debug, Clone)]
pub struct RegistryPackage {
    manifest: VersionManifest,
    client: RegistryClient,
}

impl RegistryPackage {
    #[must_use]
    pub fn new(manifest: VersionManifest, client: RegistryClient) -> Self {
        Self { manifest, client }
    }

    #[must_use]
    pub fn manifest(&self) -> &VersionManifest {
        &self.manifest
    }
}

#[async_trait]
impl Package for RegistryPackage {
    fn dependencies(&self) -> &Dependencies {
        &self.manifest.dependencies
    }

    fn id(&self) -> &str {
        &self.manifest.dist.shasum
    }

    async fn fetch_into(&self, root: &Path) -> Result<(), PkgError> {
        let dest = root.join(self.id()).join(PACKAGE_DIR);
        if dest.exists() {
            debug!(id = self.id(), "content already present");
            return Ok(());
        }

        let tarball = &self.manifest.dist.tarball;
        debug!(
            name = %self.manifest.name,
            version = %self.manifest.version,
            %tarball,
            "downloading"
        );
        let bytes = self.client.download(tarball, MAX_TARBALL_SIZE).await?;
        verify_shasum(tarball, &self.manifest.dist.shasum, &bytes)?;

        tokio::task::spawn_blocking(move || extract_tgz_atomic(&bytes, &dest))
            .await
            .map_err(|e| PkgError::TaskFailed(e.to_string()))?
    }
}

/// Resolves dependencies against a remote registry.
#[derive(Debug, Clone)]
pub struct RegistryResolver {
    client: RegistryClient,
}

impl RegistryResolver {
    #[must_use]
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Resolver for RegistryResolver {
    async fn resolve(
        &self,
        _link: &Path,
        name: &str,
        version: &str,
    ) -> Result<Option<PackageRef>, PkgError> {
        let manifest = self.client.fetch_version(name, version).await?;
        Ok(manifest.map(|m| Arc::new(RegistryPackage::new(m, self.client.clone())) as PackageRef))
    }
}
