//! The package store accessor.
//!
//! Installed packages live at `<store>/<project>/v<version>`; one shelf
//! directory per project, one versioned directory per installation.
//! Convenience symlinks (`v1`, `v1.2`, `v*`) live beside the versioned
//! directories and are ignored when enumerating installations.
//!
//! The store is read concurrently by many callers; it is only mutated
//! (directory creation, symlink publication) under the per-project shelf
//! lock.

use std::io;
use std::path::{Path, PathBuf};

use larder_schema::{Installation, Package, PackageName, Version};

/// Read-side accessor for the on-disk store.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// A store rooted at `root`. The directory need not exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The shelf directory for a project. Projects may contain `/`
    /// separators, which nest naturally.
    pub fn shelf(&self, project: &PackageName) -> PathBuf {
        self.root.join(project)
    }

    /// Where a concrete package lives (or would live) on disk.
    pub fn installation(&self, pkg: &Package) -> PathBuf {
        self.shelf(&pkg.project).join(format!("v{}", pkg.version))
    }

    /// The installation record for `pkg`, if its files are published.
    ///
    /// Only a real directory counts: symlinks (the convenience aliases) and
    /// anything half-created never satisfy this check, because installs only
    /// ever rename a fully extracted directory into place.
    pub fn installed(&self, pkg: &Package) -> Option<Installation> {
        let path = self.installation(pkg);
        let meta = std::fs::symlink_metadata(&path).ok()?;
        if meta.file_type().is_dir() {
            Some(Installation {
                pkg: pkg.clone(),
                path,
            })
        } else {
            None
        }
    }

    /// All installed versions of a project, sorted ascending by version.
    ///
    /// Returns an empty list for a project with no shelf.
    ///
    /// # Errors
    ///
    /// Returns any I/O error other than the shelf not existing.
    pub fn ls(&self, project: &PackageName) -> io::Result<Vec<Installation>> {
        let shelf = self.shelf(project);
        let entries = match std::fs::read_dir(&shelf) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut installations = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                // Skips the v1 / v1.2 / v* symlinks as well as stray files.
                continue;
            }
            let name = entry.file_name();
            let Some(version_text) = name.to_str().and_then(|n| n.strip_prefix('v')) else {
                continue;
            };
            let Ok(version) = Version::parse(version_text) else {
                continue;
            };
            installations.push(Installation {
                pkg: Package::new(project.clone(), version),
                path: entry.path(),
            });
        }

        installations.sort_by(|a, b| a.pkg.version.cmp(&b.pkg.version));
        Ok(installations)
    }

    /// Every installation in the store, across all projects, sorted by
    /// project then version.
    ///
    /// Version directories only ever appear at depth >= 2 (below a shelf),
    /// so a project that happens to look like a version ("v8.dev") at the
    /// root is never misread.
    ///
    /// # Errors
    ///
    /// Returns any I/O error encountered while walking the store.
    pub fn ls_all(&self) -> io::Result<Vec<Installation>> {
        let mut out = Vec::new();
        if !self.root.is_dir() {
            return Ok(out);
        }

        let mut walker = walkdir::WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(5)
            .into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if let Some(version_text) = name.strip_prefix('v') {
                if let Ok(version) = Version::parse(version_text) {
                    out.push(Installation {
                        pkg: Package::new(self.project_of(entry.path()), version),
                        path: entry.path().to_path_buf(),
                    });
                    // Never descend into an installation's own tree.
                    walker.skip_current_dir();
                }
            }
        }

        out.sort_by(|a, b| {
            a.pkg
                .project
                .cmp(&b.pkg.project)
                .then_with(|| a.pkg.version.cmp(&b.pkg.version))
        });
        Ok(out)
    }

    /// Recover the project name from a version directory path.
    fn project_of(&self, version_dir: &Path) -> PackageName {
        let shelf = version_dir.parent().unwrap_or(version_dir);
        let relative = shelf.strip_prefix(&self.root).unwrap_or(shelf);
        PackageName::new(&relative.to_string_lossy())
    }
}
