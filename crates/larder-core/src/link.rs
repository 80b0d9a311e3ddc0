//! Convenience symlink publication.
//!
//! After version `X.Y.Z` of a project installs, the shelf gains up to three
//! aliases: `vX.Y` (latest within the minor), `vX` (latest within the
//! major), and `v*` (latest overall). Each level is recomputed against what
//! is actually installed and only advanced when the new version is
//! genuinely the greatest at that level — backfilling an older version
//! never regresses an existing alias. Publication is a symlink-then-rename,
//! so readers always see either the old alias or the new one.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use larder_schema::{Installation, Version};

use crate::config::Config;
use crate::lock::{LockError, ShelfLock};
use crate::reporter::Reporter;
use crate::store::Store;

/// Errors produced while publishing aliases.
#[derive(Error, Debug)]
pub enum LinkError {
    /// The shelf lock could not be acquired.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Symlink creation or renaming failed.
    #[error("I/O error while linking: {0}")]
    Io(#[from] std::io::Error),
}

/// Recompute and publish the shelf aliases affected by a new installation.
///
/// Must be called only after the installation has fully completed; takes
/// the same shelf lock as the installer, so alias publication never races a
/// concurrent install of the same project. Linking different projects may
/// proceed concurrently.
///
/// # Errors
///
/// Returns [`LinkError`] on lock or filesystem failure.
pub async fn link(
    config: &Config,
    installation: &Installation,
    reporter: &dyn Reporter,
) -> Result<(), LinkError> {
    let project = &installation.pkg.project;
    let _lock = ShelfLock::acquire(&config.locks_dir(), project, config.lock_timeout()).await?;

    let store = Store::new(config.store_dir());
    let installed = store.ls(project)?;
    let versions: Vec<&Version> = installed.iter().map(|i| &i.pkg.version).collect();
    let version = &installation.pkg.version;

    // The directory name the aliases point at, relative to the shelf.
    let target = format!("v{version}");
    let shelf = store.shelf(project);

    let minor_best = versions
        .iter()
        .filter(|v| v.major() == version.major() && v.minor() == version.minor())
        .max();
    if minor_best != Some(&version) {
        // Not even the newest within its own minor: no alias can change.
        debug!(pkg = %installation.pkg, "not newest in minor; aliases unchanged");
        return Ok(());
    }
    let alias = format!("v{}.{}", version.major(), version.minor());
    publish(&shelf, &alias, &target)?;
    reporter.linked(project, &alias);

    let major_best = versions.iter().filter(|v| v.major() == version.major()).max();
    if major_best == Some(&version) {
        let alias = format!("v{}", version.major());
        publish(&shelf, &alias, &target)?;
        reporter.linked(project, &alias);
    }

    if versions.iter().max() == Some(&version) {
        publish(&shelf, "v*", &target)?;
        reporter.linked(project, "v*");
    }

    info!(pkg = %installation.pkg, "aliases published");
    Ok(())
}

/// Force-publish one alias atomically: create the symlink under a temporary
/// name, then rename over any existing alias.
fn publish(shelf: &Path, alias: &str, target: &str) -> std::io::Result<()> {
    let staging = shelf.join(format!(".{alias}.tmp"));
    match std::fs::remove_file(&staging) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::os::unix::fs::symlink(target, &staging)?;
    std::fs::rename(&staging, shelf.join(alias))?;
    debug!(alias, target, "alias published");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NullReporter;
    use larder_schema::Package;

    fn installation(config: &Config, version: &str) -> Installation {
        let pkg = Package::new("node", Version::parse(version).unwrap());
        let store = Store::new(config.store_dir());
        let path = store.installation(&pkg);
        std::fs::create_dir_all(&path).unwrap();
        Installation { pkg, path }
    }

    fn alias_target(config: &Config, alias: &str) -> Option<String> {
        let path = config.store_dir().join("node").join(alias);
        std::fs::read_link(path)
            .ok()
            .map(|t| t.to_string_lossy().into_owned())
    }

    #[tokio::test]
    async fn first_install_publishes_all_levels() {
        let home = tempfile::tempdir().unwrap();
        let config = Config::with_home(home.path());
        let inst = installation(&config, "1.3.0");

        link(&config, &inst, &NullReporter).await.unwrap();

        assert_eq!(alias_target(&config, "v1.3").as_deref(), Some("v1.3.0"));
        assert_eq!(alias_target(&config, "v1").as_deref(), Some("v1.3.0"));
        assert_eq!(alias_target(&config, "v*").as_deref(), Some("v1.3.0"));
    }

    #[tokio::test]
    async fn backfilled_older_version_does_not_regress() {
        let home = tempfile::tempdir().unwrap();
        let config = Config::with_home(home.path());

        let newer = installation(&config, "1.3.0");
        link(&config, &newer, &NullReporter).await.unwrap();

        // Backfill 1.2.0 after 1.3.0 already exists.
        let older = installation(&config, "1.2.0");
        link(&config, &older, &NullReporter).await.unwrap();

        // 1.2.0 is the best of its own minor, so v1.2 appears...
        assert_eq!(alias_target(&config, "v1.2").as_deref(), Some("v1.2.0"));
        // ...but v1 and v* still point at 1.3.0.
        assert_eq!(alias_target(&config, "v1").as_deref(), Some("v1.3.0"));
        assert_eq!(alias_target(&config, "v*").as_deref(), Some("v1.3.0"));
    }

    #[tokio::test]
    async fn patch_release_advances_its_levels() {
        let home = tempfile::tempdir().unwrap();
        let config = Config::with_home(home.path());

        link(&config, &installation(&config, "1.3.0"), &NullReporter)
            .await
            .unwrap();
        link(&config, &installation(&config, "1.3.1"), &NullReporter)
            .await
            .unwrap();

        assert_eq!(alias_target(&config, "v1.3").as_deref(), Some("v1.3.1"));
        assert_eq!(alias_target(&config, "v1").as_deref(), Some("v1.3.1"));
        assert_eq!(alias_target(&config, "v*").as_deref(), Some("v1.3.1"));
    }

    #[tokio::test]
    async fn older_patch_in_current_minor_changes_nothing() {
        let home = tempfile::tempdir().unwrap();
        let config = Config::with_home(home.path());

        link(&config, &installation(&config, "1.3.1"), &NullReporter)
            .await
            .unwrap();
        link(&config, &installation(&config, "1.3.0"), &NullReporter)
            .await
            .unwrap();

        // 1.3.0 is not the newest of minor 1.3: every alias still points at
        // 1.3.1.
        assert_eq!(alias_target(&config, "v1.3").as_deref(), Some("v1.3.1"));
        assert_eq!(alias_target(&config, "v1").as_deref(), Some("v1.3.1"));
        assert_eq!(alias_target(&config, "v*").as_deref(), Some("v1.3.1"));
    }

    #[tokio::test]
    async fn new_major_leaves_old_major_aliases() {
        let home = tempfile::tempdir().unwrap();
        let config = Config::with_home(home.path());

        link(&config, &installation(&config, "1.3.0"), &NullReporter)
            .await
            .unwrap();
        link(&config, &installation(&config, "2.0.0"), &NullReporter)
            .await
            .unwrap();

        assert_eq!(alias_target(&config, "v1").as_deref(), Some("v1.3.0"));
        assert_eq!(alias_target(&config, "v2").as_deref(), Some("v2.0.0"));
        assert_eq!(alias_target(&config, "v2.0").as_deref(), Some("v2.0.0"));
        assert_eq!(alias_target(&config, "v*").as_deref(), Some("v2.0.0"));
    }
}
