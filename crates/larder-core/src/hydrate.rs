//! Requirement hydration.
//!
//! Expands a handful of top-level requirements into the full transitive
//! requirement set by repeatedly asking the registry for direct dependencies
//! and tightening constraints via intersection. This is deliberately *not*
//! a backtracking solver: if direct intersection is empty, hydration fails
//! outright rather than searching alternate versions. That trade-off keeps
//! the fixed point fast and its failures explainable.

use std::collections::VecDeque;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, trace};

use larder_schema::{PackageName, PackageRequirement, Range};

use crate::registry::{Registry, RegistryError};

/// Errors produced during hydration.
#[derive(Error, Debug)]
pub enum HydrateError {
    /// Two branches of the dependency graph impose constraints on the same
    /// project that share no versions.
    #[error(
        "conflicting requirements for '{project}': \
         '{existing}' (via {existing_source}) cannot be reconciled with \
         '{incoming}' (via {incoming_source})"
    )]
    Unsatisfiable {
        /// The project with conflicting constraints.
        project: PackageName,
        /// The constraint recorded so far.
        existing: Range,
        /// Which requirement introduced the recorded constraint.
        existing_source: String,
        /// The newly encountered constraint.
        incoming: Range,
        /// Which requirement introduced the new constraint.
        incoming_source: String,
    },

    /// The registry failed while expanding dependencies.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// The recorded state for one project during hydration.
#[derive(Debug)]
struct Tracked {
    constraint: Range,
    /// `None` when the constraint came from the caller's seed set.
    introduced_by: Option<PackageName>,
}

fn source_label(source: Option<&PackageName>) -> String {
    source.map_or_else(|| "requested".to_string(), ToString::to_string)
}

/// Expand `seed` into the full transitive requirement set.
///
/// The result contains at most one requirement per project, with all
/// constraints on that project intersected together. The order is the order
/// projects were first encountered; it is *not* a topological install
/// order — callers wanting one should walk the store and installer instead.
///
/// The hydration state is owned entirely by this call; concurrent
/// hydrations never share a constraint map.
///
/// # Errors
///
/// Returns [`HydrateError::Unsatisfiable`] when two requirement paths
/// conflict, naming both, or a [`RegistryError`] from dependency expansion.
pub async fn hydrate<R: Registry + ?Sized>(
    seed: &[PackageRequirement],
    registry: &R,
) -> Result<Vec<PackageRequirement>, HydrateError> {
    let mut tracked: IndexMap<PackageName, Tracked> = IndexMap::new();
    let mut queue: VecDeque<PackageName> = VecDeque::new();

    for requirement in seed {
        merge(&mut tracked, &mut queue, requirement, None)?;
    }

    while let Some(project) = queue.pop_front() {
        trace!(%project, "expanding dependencies");
        let deps = registry.dependencies(&project, false).await?;
        for dep in &deps {
            merge(&mut tracked, &mut queue, dep, Some(&project))?;
        }
    }

    debug!(
        seeded = seed.len(),
        hydrated = tracked.len(),
        "hydration fixed point reached"
    );

    Ok(tracked
        .into_iter()
        .map(|(project, state)| PackageRequirement::new(project, state.constraint))
        .collect())
}

/// Record `requirement`, tightening any existing constraint by
/// intersection. A project is only enqueued for expansion the first time it
/// is seen, which is what terminates dependency cycles; later sightings
/// still have their constraints validated and merged.
fn merge(
    tracked: &mut IndexMap<PackageName, Tracked>,
    queue: &mut VecDeque<PackageName>,
    requirement: &PackageRequirement,
    source: Option<&PackageName>,
) -> Result<(), HydrateError> {
    match tracked.get_mut(&requirement.project) {
        Some(existing) => {
            let tightened = existing
                .constraint
                .intersect(&requirement.constraint)
                .map_err(|_| HydrateError::Unsatisfiable {
                    project: requirement.project.clone(),
                    existing: existing.constraint.clone(),
                    existing_source: source_label(existing.introduced_by.as_ref()),
                    incoming: requirement.constraint.clone(),
                    incoming_source: source_label(source),
                })?;
            trace!(
                project = %requirement.project,
                constraint = %tightened,
                "tightened constraint"
            );
            existing.constraint = tightened;
        }
        None => {
            tracked.insert(
                requirement.project.clone(),
                Tracked {
                    constraint: requirement.constraint.clone(),
                    introduced_by: source.cloned(),
                },
            );
            queue.push_back(requirement.project.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;

    fn req(spec: &str) -> PackageRequirement {
        spec.parse().unwrap()
    }

    fn constraint_of<'a>(
        reqs: &'a [PackageRequirement],
        project: &str,
    ) -> &'a Range {
        &reqs
            .iter()
            .find(|r| r.project == project)
            .unwrap_or_else(|| panic!("no requirement for {project}"))
            .constraint
    }

    #[tokio::test]
    async fn duplicate_seeds_merge_to_one_requirement() {
        let registry = MemoryRegistry::new();
        registry.add_project("p", &["2.1.0"]);

        let hydrated = hydrate(&[req("p@*"), req("p@>=2.0")], &registry)
            .await
            .unwrap();

        assert_eq!(hydrated.len(), 1);
        assert_eq!(
            constraint_of(&hydrated, "p"),
            &Range::parse(">=2.0").unwrap()
        );
    }

    #[tokio::test]
    async fn expands_transitive_dependencies() {
        let registry = MemoryRegistry::new();
        registry.add_project("a", &["1.0.0"]);
        registry.add_project("b", &["1.0.0"]);
        registry.add_project("c", &["1.0.0"]);
        registry.add_dependency("a", "b@^1");
        registry.add_dependency("b", "c@~1.0");

        let hydrated = hydrate(&[req("a@^1")], &registry).await.unwrap();

        let projects: Vec<&str> = hydrated.iter().map(|r| r.project.as_str()).collect();
        assert_eq!(projects, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn tightens_shared_dependency_constraints() {
        let registry = MemoryRegistry::new();
        registry.add_project("a", &["1.0.0"]);
        registry.add_project("c", &["1.0.0"]);
        registry.add_project("b", &["1.4.0"]);
        registry.add_dependency("a", "b@^1.2");
        registry.add_dependency("c", "b@~1.4");

        let hydrated = hydrate(&[req("a"), req("c")], &registry).await.unwrap();

        let b = constraint_of(&hydrated, "b");
        use larder_schema::Version;
        assert!(b.satisfies(&Version::parse("1.4.2").unwrap()));
        assert!(!b.satisfies(&Version::parse("1.5.0").unwrap()));
        assert!(!b.satisfies(&Version::parse("1.3.0").unwrap()));
    }

    #[tokio::test]
    async fn conflicting_branches_fail_naming_the_project() {
        let registry = MemoryRegistry::new();
        registry.add_project("a", &["1.0.0"]);
        registry.add_project("c", &["1.0.0"]);
        registry.add_project("b", &["1.0.0", "2.0.0"]);
        registry.add_dependency("a", "b@^1");
        registry.add_dependency("c", "b@^2");

        let err = hydrate(&[req("a"), req("c")], &registry)
            .await
            .unwrap_err();

        match err {
            HydrateError::Unsatisfiable {
                project,
                existing_source,
                incoming_source,
                ..
            } => {
                assert_eq!(project, "b");
                assert_eq!(existing_source, "a");
                assert_eq!(incoming_source, "c");
            }
            other => panic!("expected Unsatisfiable, got {other}"),
        }
    }

    #[tokio::test]
    async fn cycles_terminate() {
        let registry = MemoryRegistry::new();
        registry.add_project("a", &["1.0.0"]);
        registry.add_project("b", &["1.0.0"]);
        registry.add_dependency("a", "b@^1");
        registry.add_dependency("b", "a@^1");

        let hydrated = hydrate(&[req("a@^1")], &registry).await.unwrap();
        assert_eq!(hydrated.len(), 2);
    }

    #[tokio::test]
    async fn self_dependency_still_validates_constraints() {
        let registry = MemoryRegistry::new();
        registry.add_project("a", &["1.0.0", "2.0.0"]);
        registry.add_dependency("a", "a@^2");

        // Seeded at ^1 but depends on itself at ^2: must fail, not loop.
        let err = hydrate(&[req("a@^1")], &registry).await.unwrap_err();
        assert!(matches!(err, HydrateError::Unsatisfiable { .. }));
    }
}
