//! The install pipeline.
//!
//! Makes a concrete package present in the store. Every step is a
//! synchronization point: idempotency check, per-project shelf lock,
//! re-check under the lock, streaming acquire/verify/extract into a private
//! scratch directory, and finally an atomic rename into
//! `<store>/<project>/v<version>`. The store never contains a half-extracted
//! package visible to other processes, even across a crash — recovery is
//! simply re-running the pipeline, which sweeps any stale scratch directory
//! and proceeds as normal.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

use larder_schema::{Installation, Package};

use crate::config::Config;
use crate::download::{self, DownloadError, Fetcher};
use crate::lock::{LockError, ShelfLock};
use crate::registry::{Registry, RegistryError};
use crate::reporter::{NullReporter, Reporter};
use crate::store::Store;

/// Errors produced by the install pipeline.
#[derive(Error, Debug)]
pub enum InstallError {
    /// The registry failed while locating the bottle.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Acquisition or verification of the bottle failed.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// The per-project shelf lock could not be acquired.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Filesystem mutation failed.
    #[error("I/O error during install: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether the pipeline mutates anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// Download, verify, extract, publish.
    Install,
    /// Report what would be installed; no network, no filesystem mutation.
    /// The returned [`Installation`] points at a location that does not yet
    /// exist, but is structurally identical to the real thing.
    DryRun,
}

/// Drives the install pipeline for one package at a time.
///
/// Independent packages may be installed by concurrent `Installer`s (or
/// concurrent processes); same-project installs serialize on the shelf
/// lock.
pub struct Installer<'a> {
    config: &'a Config,
    client: &'a reqwest::Client,
    reporter: &'a dyn Reporter,
    mode: InstallMode,
}

impl std::fmt::Debug for Installer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl<'a> Installer<'a> {
    /// An installer with the default (real) mode and no reporting.
    pub fn new(config: &'a Config, client: &'a reqwest::Client) -> Self {
        Self {
            config,
            client,
            reporter: &NullReporter,
            mode: InstallMode::Install,
        }
    }

    /// Attach a progress reporter.
    pub fn with_reporter(mut self, reporter: &'a dyn Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Switch between real installs and dry runs.
    pub fn with_mode(mut self, mode: InstallMode) -> Self {
        self.mode = mode;
        self
    }

    /// Make `pkg` present in the store and return its installation record.
    ///
    /// Idempotent: an already-installed package returns immediately without
    /// touching the network, including when another process completes the
    /// install while this one waits on the shelf lock.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError`] on registry, lock, download/verification, or
    /// filesystem failure. Transient download failures are retried exactly
    /// once after refreshing registry metadata; checksum mismatches are
    /// never retried here and propagate to the caller.
    pub async fn install<R: Registry + ?Sized>(
        &self,
        pkg: &Package,
        registry: &R,
    ) -> Result<Installation, InstallError> {
        let store = Store::new(self.config.store_dir());

        if let Some(existing) = store.installed(pkg) {
            debug!(%pkg, "already installed");
            return Ok(existing);
        }

        let dest = store.installation(pkg);
        if self.mode == InstallMode::DryRun {
            debug!(%pkg, "dry run: would install");
            return Ok(Installation {
                pkg: pkg.clone(),
                path: dest,
            });
        }

        let lock = ShelfLock::acquire(
            &self.config.locks_dir(),
            &pkg.project,
            self.config.lock_timeout(),
        )
        .await?;

        // Another process may have finished this install while we waited.
        if let Some(existing) = store.installed(pkg) {
            debug!(%pkg, "installed by another process while waiting");
            return Ok(existing);
        }

        self.reporter.installing(pkg);

        let tmp_root = self.config.tmp_dir();
        std::fs::create_dir_all(&tmp_root)?;
        let prefix = format!("{}-{}-", pkg.project.escaped(), pkg.version);
        sweep_stale(&tmp_root, &prefix);
        let scratch = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(&tmp_root)?;
        let contents = scratch.path().join("contents");

        let (digest, strip) = self.acquire(pkg, registry, &contents).await?;
        download::strip_components(&contents, strip)?;

        // Atomic publish: the fully extracted, verified tree appears in the
        // store in one rename (tmp shares the store's volume).
        std::fs::create_dir_all(store.shelf(&pkg.project))?;
        std::fs::rename(&contents, &dest)?;
        drop(lock);

        info!(%pkg, digest, path = %dest.display(), "installed");
        let installation = Installation {
            pkg: pkg.clone(),
            path: dest,
        };
        self.reporter.installed(&installation);
        Ok(installation)
    }

    /// Locate, download, verify, and extract the bottle into `contents`.
    ///
    /// A transport failure triggers the single documented speculative retry:
    /// refresh registry metadata (the bottle may have moved or only just
    /// landed in the catalog) and try again. Checksum failures propagate
    /// immediately.
    async fn acquire<R: Registry + ?Sized>(
        &self,
        pkg: &Package,
        registry: &R,
        contents: &Path,
    ) -> Result<(String, usize), InstallError> {
        let cache_dir = self.config.cache_dir().join("bottles");
        let fetcher = Fetcher::new(self.client, &cache_dir);
        let mut refreshed = false;

        loop {
            let stowage = registry.distributable(pkg).await?;
            reset_dir(contents)?;
            match fetcher
                .fetch_and_extract(&stowage, contents, pkg, self.reporter)
                .await
            {
                Ok(digest) => return Ok((digest, stowage.strip_components)),
                Err(DownloadError::Http(e)) if !refreshed => {
                    warn!(%pkg, error = %e, "download failed; refreshing metadata and retrying once");
                    refreshed = true;
                    registry.refresh().await?;
                }
                Err(e) => {
                    self.reporter.failed(pkg, &e.to_string());
                    return Err(e.into());
                }
            }
        }
    }
}

/// Empty and recreate a scratch extraction directory.
fn reset_dir(dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::fs::create_dir_all(dir)
}

/// Best-effort removal of scratch directories a dead process left behind
/// for this exact package.
fn sweep_stale(tmp_root: &Path, prefix: &str) {
    let Ok(entries) = std::fs::read_dir(tmp_root) else {
        return;
    };
    for entry in entries.filter_map(Result::ok) {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(prefix) {
            debug!(stale = %entry.path().display(), "removing stale scratch directory");
            let _ = std::fs::remove_dir_all(entry.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use larder_schema::Version;
    use sha2::{Digest, Sha256};

    fn bottle_bytes() -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let contents = b"#!/bin/sh\necho demo\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, "demo-1.0.0/bin/demo", &contents[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn pkg() -> Package {
        Package::new("demo", Version::parse("1.0.0").unwrap())
    }

    /// Serve a valid bottle + sidecar for `demo@1.0.0` and point the
    /// registry's distributable at it.
    async fn serve_bottle(
        server: &mut mockito::ServerGuard,
        registry: &MemoryRegistry,
        max_downloads: usize,
    ) -> mockito::Mock {
        let bytes = bottle_bytes();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let filename = crate::registry::bottle_filename(&pkg(), "gz");
        let bottle = server
            .mock("GET", format!("/bottles/{filename}").as_str())
            .with_body(bytes)
            .expect(max_downloads)
            .create_async()
            .await;
        server
            .mock("GET", format!("/bottles/{filename}.sha256sum").as_str())
            .with_body(format!("{digest}  {filename}\n"))
            .create_async()
            .await;

        registry.add_project("demo", &["1.0.0"]);
        registry.set_distributable("demo", &format!("{}/bottles", server.url()), 1);
        bottle
    }

    #[tokio::test]
    async fn installs_and_publishes_atomically() {
        let mut server = mockito::Server::new_async().await;
        let registry = MemoryRegistry::new();
        let bottle = serve_bottle(&mut server, &registry, 1).await;

        let home = tempfile::tempdir().unwrap();
        let config = Config::with_home(home.path());
        let client = reqwest::Client::new();
        let installer = Installer::new(&config, &client);

        let installation = installer.install(&pkg(), &registry).await.unwrap();

        assert_eq!(installation.path, config.store_dir().join("demo/v1.0.0"));
        // strip_components hoisted the wrapper directory away.
        assert!(installation.path.join("bin/demo").is_file());
        // Scratch space left nothing behind.
        let leftovers = std::fs::read_dir(config.tmp_dir())
            .map(Iterator::count)
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
        bottle.assert_async().await;
    }

    #[tokio::test]
    async fn second_install_is_idempotent() {
        let mut server = mockito::Server::new_async().await;
        let registry = MemoryRegistry::new();
        let bottle = serve_bottle(&mut server, &registry, 1).await;

        let home = tempfile::tempdir().unwrap();
        let config = Config::with_home(home.path());
        let client = reqwest::Client::new();
        let installer = Installer::new(&config, &client);

        let first = installer.install(&pkg(), &registry).await.unwrap();
        let second = installer.install(&pkg(), &registry).await.unwrap();

        assert_eq!(first, second);
        // expect(1): the second call issued no download.
        bottle.assert_async().await;
    }

    #[tokio::test]
    async fn concurrent_installs_download_once() {
        let mut server = mockito::Server::new_async().await;
        let registry = MemoryRegistry::new();
        let bottle = serve_bottle(&mut server, &registry, 1).await;

        let home = tempfile::tempdir().unwrap();
        let config = Config::with_home(home.path());
        let client = reqwest::Client::new();

        let a = Installer::new(&config, &client);
        let b = Installer::new(&config, &client);
        let pkg_a = pkg();
        let pkg_b = pkg();
        let (ra, rb) = tokio::join!(a.install(&pkg_a, &registry), b.install(&pkg_b, &registry));

        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        assert_eq!(ra, rb);
        assert!(ra.path.join("bin/demo").is_file());
        // Exactly one pipeline did the network work; the loser of the lock
        // race observed the winner's completed installation.
        bottle.assert_async().await;
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let registry = MemoryRegistry::new();
        registry.add_project("demo", &["1.0.0"]);
        registry.set_distributable("demo", "http://example.invalid/bottles", 1);

        let home = tempfile::tempdir().unwrap();
        let config = Config::with_home(home.path());
        let client = reqwest::Client::new();
        let installer = Installer::new(&config, &client).with_mode(InstallMode::DryRun);

        let installation = installer.install(&pkg(), &registry).await.unwrap();

        // Structurally identical record, but nothing exists on disk yet.
        assert_eq!(installation.path, config.store_dir().join("demo/v1.0.0"));
        assert!(!installation.path.exists());
        assert!(!config.store_dir().exists());
    }

    #[tokio::test]
    async fn transport_failure_refreshes_once_then_fails() {
        let registry = MemoryRegistry::new();
        registry.add_project("demo", &["1.0.0"]);
        // Nothing is listening here: every download attempt fails.
        registry.set_distributable("demo", "http://127.0.0.1:9/bottles", 1);

        let home = tempfile::tempdir().unwrap();
        let config = Config::with_home(home.path());
        let client = reqwest::Client::new();
        let installer = Installer::new(&config, &client);

        let err = installer.install(&pkg(), &registry).await.unwrap_err();
        assert!(matches!(err, InstallError::Download(_)));
        // The single speculative retry refreshed metadata exactly once.
        assert_eq!(registry.refresh_calls(), 1);
    }
}
