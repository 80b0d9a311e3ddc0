//! Concrete version selection.
//!
//! Takes the hydrated requirement set and picks, for each project, the
//! greatest registry version satisfying its constraint, then partitions the
//! result into already-installed packages and pending installs. Registry
//! data may be stale, so a constraint matching nothing triggers exactly one
//! metadata refresh before the failure is surfaced.

use thiserror::Error;
use tracing::{debug, warn};

use larder_schema::{Installation, Package, PackageRequirement, Range, PackageName};

use crate::registry::{Registry, RegistryError};
use crate::store::Store;

/// Errors produced during resolution.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// No registry version satisfies the constraint, even after refreshing
    /// local metadata once.
    #[error("no version of '{project}' satisfies '{constraint}'")]
    NoVersionSatisfies {
        /// The project being resolved.
        project: PackageName,
        /// The constraint nothing satisfied.
        constraint: Range,
    },

    /// The registry failed during version lookup.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The store could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The outcome of resolution: what is already on disk and what still needs
/// installing.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Packages already published in the store.
    pub installed: Vec<Installation>,
    /// Packages that must be installed.
    pub pending: Vec<Package>,
}

impl Resolution {
    /// Every resolved package, installed or not.
    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.installed
            .iter()
            .map(|i| &i.pkg)
            .chain(self.pending.iter())
    }
}

/// Pick concrete versions for every hydrated requirement.
///
/// # Errors
///
/// Returns [`ResolveError::NoVersionSatisfies`] when a constraint matches
/// nothing the registry knows (after one refresh), or any underlying
/// registry/store error.
pub async fn resolve<R: Registry + ?Sized>(
    requirements: &[PackageRequirement],
    store: &Store,
    registry: &R,
) -> Result<Resolution, ResolveError> {
    let mut resolution = Resolution::default();
    let mut refreshed = false;

    for requirement in requirements {
        let versions = registry.versions(&requirement.project).await?;
        let best = match requirement.constraint.max(&versions) {
            Some(best) => best,
            None if !refreshed => {
                // The provider's data may simply be stale; refresh once for
                // the whole resolution pass and retry this lookup.
                warn!(
                    project = %requirement.project,
                    constraint = %requirement.constraint,
                    "no satisfying version; refreshing registry metadata"
                );
                registry.refresh().await?;
                refreshed = true;
                let versions = registry.versions(&requirement.project).await?;
                requirement.constraint.max(&versions).ok_or_else(|| {
                    ResolveError::NoVersionSatisfies {
                        project: requirement.project.clone(),
                        constraint: requirement.constraint.clone(),
                    }
                })?
            }
            None => {
                return Err(ResolveError::NoVersionSatisfies {
                    project: requirement.project.clone(),
                    constraint: requirement.constraint.clone(),
                });
            }
        };

        let pkg = Package::new(requirement.project.clone(), best);
        match store.installed(&pkg) {
            Some(installation) => {
                debug!(pkg = %installation.pkg, "already installed");
                resolution.installed.push(installation);
            }
            None => resolution.pending.push(pkg),
        }
    }

    Ok(resolution)
}
