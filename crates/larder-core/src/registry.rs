//! The metadata-provider boundary.
//!
//! A [`Registry`] answers three questions about a project: which versions
//! exist, what does it depend on, and where is the bottle for a concrete
//! version. Documents are decoded exactly once, at this boundary, into
//! strongly typed structures; the engine never inspects raw JSON.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use larder_schema::{Package, PackageName, PackageRequirement, Range, Version};

/// Registry documents older than this are re-fetched on next use.
const DOCUMENT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors produced at the registry boundary.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The registry has no document for this project.
    #[error("project '{project}' is not in the registry")]
    UnknownProject {
        /// The project that was looked up.
        project: PackageName,
    },

    /// Transport-level failure.
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The project document exists but does not match the expected schema.
    #[error("malformed registry document for '{project}': {source}")]
    Decode {
        /// The project whose document failed to decode.
        project: PackageName,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// Local cache I/O failure.
    #[error("registry cache error: {0}")]
    Io(#[from] std::io::Error),
}

/// A remotely fetchable artifact, prior to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stowage {
    /// Full download URL of the bottle.
    pub url: String,
    /// Leading path components to strip after extraction.
    pub strip_components: usize,
}

/// The metadata provider consumed by the engine.
///
/// Implementations must be safe to share across install tasks; all methods
/// take `&self`.
#[async_trait]
pub trait Registry: Send + Sync {
    /// All versions the registry currently knows for `project`.
    async fn versions(&self, project: &PackageName) -> Result<Vec<Version>, RegistryError>;

    /// The declared direct dependencies of `project`.
    async fn dependencies(
        &self,
        project: &PackageName,
        include_build: bool,
    ) -> Result<Vec<PackageRequirement>, RegistryError>;

    /// Where to download the bottle for a concrete package.
    async fn distributable(&self, pkg: &Package) -> Result<Stowage, RegistryError>;

    /// The literal runtime-environment fragment a package declares, in
    /// declaration order.
    async fn runtime_env(
        &self,
        pkg: &Package,
    ) -> Result<IndexMap<String, String>, RegistryError>;

    /// Drop any locally cached metadata so the next lookup re-fetches.
    async fn refresh(&self) -> Result<(), RegistryError>;
}

/// Bottle platform component for the current OS.
pub fn host_platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Bottle architecture component for the current CPU.
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "x86-64",
        other => other,
    }
}

/// Flat bottle filename for a package:
/// `<escaped-project>-<version>+<platform>+<arch>.tar.<compression>`.
pub fn bottle_filename(pkg: &Package, compression: &str) -> String {
    format!(
        "{}-{}+{}+{}.tar.{}",
        pkg.project.escaped(),
        pkg.version,
        host_platform(),
        host_arch(),
        compression
    )
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// One declared dependency inside a project document.
#[derive(Debug, Deserialize)]
struct DependencyDecl {
    project: PackageName,
    constraint: Range,
}

/// Bottle location data inside a project document.
#[derive(Debug, Deserialize)]
struct DistributableDecl {
    /// Base URL the flat bottle filename is appended to.
    base: String,
    /// `gz` or `xz`.
    #[serde(default = "default_compression")]
    compression: String,
    #[serde(default = "default_strip")]
    strip_components: usize,
}

fn default_compression() -> String {
    "gz".to_string()
}

fn default_strip() -> usize {
    1
}

/// The per-project registry document, decoded in full before the engine
/// sees any of it.
#[derive(Debug, Deserialize)]
struct ProjectDocument {
    versions: Vec<Version>,
    #[serde(default)]
    dependencies: Vec<DependencyDecl>,
    #[serde(default)]
    build_dependencies: Vec<DependencyDecl>,
    distributable: DistributableDecl,
    #[serde(default)]
    runtime_env: IndexMap<String, String>,
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Registry backed by per-project JSON documents over HTTP, cached on disk.
///
/// Documents live at `<base>/projects/<escaped-project>.json` and are cached
/// under the configured cache directory beside a modification-time marker;
/// a document is considered fresh for 24 hours unless [`refresh`] is called.
///
/// [`refresh`]: Registry::refresh
#[derive(Debug)]
pub struct HttpRegistry {
    base: String,
    client: reqwest::Client,
    cache_dir: PathBuf,
}

impl HttpRegistry {
    /// Create a registry client rooted at `base`.
    pub fn new(base: impl Into<String>, client: reqwest::Client, cache_dir: PathBuf) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            client,
            cache_dir,
        }
    }

    fn document_path(&self, project: &PackageName) -> PathBuf {
        self.cache_dir.join(format!("{}.json", project.escaped()))
    }

    fn marker_path(&self, project: &PackageName) -> PathBuf {
        self.cache_dir.join(format!("{}.json.fetched", project.escaped()))
    }

    fn cached_document(&self, project: &PackageName) -> Option<String> {
        let marker = self.marker_path(project);
        let age = std::fs::metadata(&marker)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| mtime.elapsed().ok())?;
        if age > DOCUMENT_TTL {
            return None;
        }
        std::fs::read_to_string(self.document_path(project)).ok()
    }

    async fn document(&self, project: &PackageName) -> Result<ProjectDocument, RegistryError> {
        let text = match self.cached_document(project) {
            Some(text) => {
                debug!(%project, "registry document cache hit");
                text
            }
            None => {
                let url = format!("{}/projects/{}.json", self.base, project.escaped());
                debug!(%project, url, "fetching registry document");
                let response = self.client.get(&url).send().await?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Err(RegistryError::UnknownProject {
                        project: project.clone(),
                    });
                }
                let text = response.error_for_status()?.text().await?;

                std::fs::create_dir_all(&self.cache_dir)?;
                std::fs::write(self.document_path(project), &text)?;
                std::fs::write(self.marker_path(project), b"")?;
                text
            }
        };

        serde_json::from_str(&text).map_err(|source| RegistryError::Decode {
            project: project.clone(),
            source,
        })
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn versions(&self, project: &PackageName) -> Result<Vec<Version>, RegistryError> {
        Ok(self.document(project).await?.versions)
    }

    async fn dependencies(
        &self,
        project: &PackageName,
        include_build: bool,
    ) -> Result<Vec<PackageRequirement>, RegistryError> {
        let doc = self.document(project).await?;
        let mut deps: Vec<PackageRequirement> = doc
            .dependencies
            .into_iter()
            .map(|d| PackageRequirement::new(d.project, d.constraint))
            .collect();
        if include_build {
            deps.extend(
                doc.build_dependencies
                    .into_iter()
                    .map(|d| PackageRequirement::new(d.project, d.constraint)),
            );
        }
        Ok(deps)
    }

    async fn distributable(&self, pkg: &Package) -> Result<Stowage, RegistryError> {
        let doc = self.document(&pkg.project).await?;
        let dist = doc.distributable;
        let url = format!(
            "{}/{}",
            dist.base.trim_end_matches('/'),
            bottle_filename(pkg, &dist.compression)
        );
        Ok(Stowage {
            url,
            strip_components: dist.strip_components,
        })
    }

    async fn runtime_env(
        &self,
        pkg: &Package,
    ) -> Result<IndexMap<String, String>, RegistryError> {
        Ok(self.document(&pkg.project).await?.runtime_env)
    }

    async fn refresh(&self) -> Result<(), RegistryError> {
        debug!("invalidating registry document cache");
        match std::fs::remove_dir_all(&self.cache_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// One project's metadata inside a [`MemoryRegistry`].
#[derive(Debug, Default, Clone)]
struct MemoryProject {
    versions: Vec<Version>,
    dependencies: Vec<PackageRequirement>,
    build_dependencies: Vec<PackageRequirement>,
    distributable_base: Option<String>,
    strip_components: usize,
    runtime_env: IndexMap<String, String>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    projects: HashMap<PackageName, MemoryProject>,
    /// Versions that only become visible after a refresh, simulating stale
    /// local metadata.
    staged: HashMap<PackageName, Vec<Version>>,
}

/// Deterministic in-memory registry, used as the test double across the
/// workspace.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    inner: RwLock<MemoryInner>,
    version_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl MemoryRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a project with the given version strings.
    ///
    /// # Panics
    ///
    /// Panics if a version string does not parse; this is test scaffolding.
    pub fn add_project(&self, project: &str, versions: &[&str]) {
        let parsed = versions
            .iter()
            .map(|v| Version::parse(v).expect("test version"))
            .collect();
        let mut inner = self.inner.write().expect("registry poisoned");
        inner
            .projects
            .entry(PackageName::new(project))
            .or_default()
            .versions = parsed;
    }

    /// Declare a direct dependency, written as a package spec
    /// (e.g. `"bar@^1"`).
    ///
    /// # Panics
    ///
    /// Panics if the spec does not parse; this is test scaffolding.
    pub fn add_dependency(&self, project: &str, dep_spec: &str) {
        let dep: PackageRequirement = dep_spec.parse().expect("test dependency spec");
        let mut inner = self.inner.write().expect("registry poisoned");
        inner
            .projects
            .entry(PackageName::new(project))
            .or_default()
            .dependencies
            .push(dep);
    }

    /// Declare a build-time dependency, written as a package spec.
    ///
    /// # Panics
    ///
    /// Panics if the spec does not parse; this is test scaffolding.
    pub fn add_build_dependency(&self, project: &str, dep_spec: &str) {
        let dep: PackageRequirement = dep_spec.parse().expect("test dependency spec");
        let mut inner = self.inner.write().expect("registry poisoned");
        inner
            .projects
            .entry(PackageName::new(project))
            .or_default()
            .build_dependencies
            .push(dep);
    }

    /// Set the bottle base URL and strip count for a project.
    pub fn set_distributable(&self, project: &str, base: &str, strip_components: usize) {
        let mut inner = self.inner.write().expect("registry poisoned");
        let entry = inner
            .projects
            .entry(PackageName::new(project))
            .or_default();
        entry.distributable_base = Some(base.trim_end_matches('/').to_string());
        entry.strip_components = strip_components;
    }

    /// Declare one runtime-environment key for a project.
    pub fn set_runtime_env(&self, project: &str, key: &str, value: &str) {
        let mut inner = self.inner.write().expect("registry poisoned");
        inner
            .projects
            .entry(PackageName::new(project))
            .or_default()
            .runtime_env
            .insert(key.to_string(), value.to_string());
    }

    /// Stage versions that only appear after [`Registry::refresh`], to
    /// exercise the stale-metadata retry.
    ///
    /// # Panics
    ///
    /// Panics if a version string does not parse; this is test scaffolding.
    pub fn stage_versions(&self, project: &str, versions: &[&str]) {
        let parsed = versions
            .iter()
            .map(|v| Version::parse(v).expect("test version"))
            .collect();
        let mut inner = self.inner.write().expect("registry poisoned");
        inner.staged.insert(PackageName::new(project), parsed);
    }

    /// How many times `versions` was called.
    pub fn version_calls(&self) -> usize {
        self.version_calls.load(Ordering::SeqCst)
    }

    /// How many times `refresh` was called.
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn project(&self, project: &PackageName) -> Result<MemoryProject, RegistryError> {
        self.inner
            .read()
            .expect("registry poisoned")
            .projects
            .get(project)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownProject {
                project: project.clone(),
            })
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn versions(&self, project: &PackageName) -> Result<Vec<Version>, RegistryError> {
        self.version_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.project(project)?.versions)
    }

    async fn dependencies(
        &self,
        project: &PackageName,
        include_build: bool,
    ) -> Result<Vec<PackageRequirement>, RegistryError> {
        let entry = self.project(project)?;
        let mut deps = entry.dependencies;
        if include_build {
            deps.extend(entry.build_dependencies);
        }
        Ok(deps)
    }

    async fn distributable(&self, pkg: &Package) -> Result<Stowage, RegistryError> {
        let entry = self.project(&pkg.project)?;
        let base = entry
            .distributable_base
            .ok_or_else(|| RegistryError::UnknownProject {
                project: pkg.project.clone(),
            })?;
        Ok(Stowage {
            url: format!("{}/{}", base, bottle_filename(pkg, "gz")),
            strip_components: entry.strip_components,
        })
    }

    async fn runtime_env(
        &self,
        pkg: &Package,
    ) -> Result<IndexMap<String, String>, RegistryError> {
        Ok(self.project(&pkg.project)?.runtime_env)
    }

    async fn refresh(&self) -> Result<(), RegistryError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.write().expect("registry poisoned");
        let staged: Vec<(PackageName, Vec<Version>)> = inner.staged.drain().collect();
        for (project, versions) in staged {
            inner.projects.entry(project).or_default().versions.extend(versions);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(project: &str, version: &str) -> Package {
        Package::new(project, Version::parse(version).unwrap())
    }

    #[test]
    fn bottle_filenames_escape_slashes() {
        let name = bottle_filename(&pkg("github.com/cli", "2.40.0"), "gz");
        assert!(name.starts_with("github.com∕cli-2.40.0+"));
        assert!(name.ends_with(".tar.gz"));
        assert!(!name.contains('/'));
    }

    #[tokio::test]
    async fn memory_registry_round_trip() {
        let registry = MemoryRegistry::new();
        registry.add_project("foo", &["1.0.0", "2.0.0"]);
        registry.add_dependency("foo", "bar@^1");
        registry.set_distributable("foo", "http://example.invalid/foo", 1);

        let name = PackageName::new("foo");
        let versions = registry.versions(&name).await.unwrap();
        assert_eq!(versions.len(), 2);

        let deps = registry.dependencies(&name, false).await.unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].project, "bar");

        let stowage = registry.distributable(&pkg("foo", "1.0.0")).await.unwrap();
        assert!(stowage.url.starts_with("http://example.invalid/foo/foo-1.0.0+"));
        assert_eq!(stowage.strip_components, 1);
    }

    #[tokio::test]
    async fn staged_versions_appear_after_refresh() {
        let registry = MemoryRegistry::new();
        registry.add_project("foo", &["1.0.0"]);
        registry.stage_versions("foo", &["2.0.0"]);

        let name = PackageName::new("foo");
        assert_eq!(registry.versions(&name).await.unwrap().len(), 1);
        registry.refresh().await.unwrap();
        assert_eq!(registry.versions(&name).await.unwrap().len(), 2);
        assert_eq!(registry.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_project_is_typed() {
        let registry = MemoryRegistry::new();
        let err = registry
            .versions(&PackageName::new("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownProject { .. }));
    }

    #[tokio::test]
    async fn http_registry_decodes_documents_and_caches_them() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "versions": ["1.0.0", "1.2.0"],
            "dependencies": [{"project": "zlib.net", "constraint": "^1.2"}],
            "distributable": {"base": format!("{}/bottles", server.url()), "strip_components": 1},
            "runtime_env": {"FOO": "bar"}
        });
        let mock = server
            .mock("GET", "/projects/demo.json")
            .with_status(200)
            .with_body(body.to_string())
            .expect(1)
            .create_async()
            .await;

        let cache = tempfile::tempdir().unwrap();
        let registry = HttpRegistry::new(
            server.url(),
            reqwest::Client::new(),
            cache.path().join("registry"),
        );

        let name = PackageName::new("demo");
        let versions = registry.versions(&name).await.unwrap();
        assert_eq!(versions[1], Version::parse("1.2.0").unwrap());

        // Second lookup is served from the on-disk cache.
        let deps = registry.dependencies(&name, false).await.unwrap();
        assert_eq!(deps[0].project, "zlib.net");
        mock.assert_async().await;

        let env = registry.runtime_env(&pkg("demo", "1.0.0")).await.unwrap();
        assert_eq!(env.get("FOO").map(String::as_str), Some("bar"));

        // refresh drops the cache, so the next lookup would re-fetch.
        registry.refresh().await.unwrap();
        assert!(!registry.document_path(&name).exists());
    }

    #[tokio::test]
    async fn http_registry_maps_404_to_unknown_project() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/projects/ghost.json")
            .with_status(404)
            .create_async()
            .await;

        let cache = tempfile::tempdir().unwrap();
        let registry = HttpRegistry::new(
            server.url(),
            reqwest::Client::new(),
            cache.path().join("registry"),
        );
        let err = registry
            .versions(&PackageName::new("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownProject { .. }));
    }
}
