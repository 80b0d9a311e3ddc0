//! Per-invocation metadata memoization.
//!
//! Hydration and environment construction ask the registry the same
//! questions repeatedly (a popular project appears in many dependency
//! lists). [`ProjectCache`] wraps any [`Registry`] and memoizes answers for
//! the lifetime of one top-level invocation. It is constructed once by the
//! caller and passed by reference wherever a registry is needed; nothing
//! here is static or ambient.

use std::collections::HashMap;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::RwLock;
use tracing::trace;

use larder_schema::{Package, PackageName, PackageRequirement, Version};

use crate::registry::{Registry, RegistryError, Stowage};

/// A memoizing wrapper around a [`Registry`].
///
/// `refresh` clears the memo tables and forwards to the inner registry, so
/// the stale-metadata retry in resolution observes genuinely fresh data.
#[derive(Debug)]
pub struct ProjectCache<R> {
    inner: R,
    versions: RwLock<HashMap<PackageName, Vec<Version>>>,
    deps: RwLock<HashMap<(PackageName, bool), Vec<PackageRequirement>>>,
    env: RwLock<HashMap<Package, IndexMap<String, String>>>,
}

impl<R> ProjectCache<R> {
    /// Wrap `inner` with empty memo tables.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            versions: RwLock::new(HashMap::new()),
            deps: RwLock::new(HashMap::new()),
            env: RwLock::new(HashMap::new()),
        }
    }

    /// The wrapped registry.
    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: Registry> Registry for ProjectCache<R> {
    async fn versions(&self, project: &PackageName) -> Result<Vec<Version>, RegistryError> {
        if let Some(hit) = self.versions.read().await.get(project) {
            trace!(%project, "versions memo hit");
            return Ok(hit.clone());
        }
        let fresh = self.inner.versions(project).await?;
        self.versions
            .write()
            .await
            .insert(project.clone(), fresh.clone());
        Ok(fresh)
    }

    async fn dependencies(
        &self,
        project: &PackageName,
        include_build: bool,
    ) -> Result<Vec<PackageRequirement>, RegistryError> {
        let key = (project.clone(), include_build);
        if let Some(hit) = self.deps.read().await.get(&key) {
            trace!(%project, include_build, "dependencies memo hit");
            return Ok(hit.clone());
        }
        let fresh = self.inner.dependencies(project, include_build).await?;
        self.deps.write().await.insert(key, fresh.clone());
        Ok(fresh)
    }

    async fn distributable(&self, pkg: &Package) -> Result<Stowage, RegistryError> {
        // Looked up once per install; not worth memoizing.
        self.inner.distributable(pkg).await
    }

    async fn runtime_env(
        &self,
        pkg: &Package,
    ) -> Result<IndexMap<String, String>, RegistryError> {
        if let Some(hit) = self.env.read().await.get(pkg) {
            return Ok(hit.clone());
        }
        let fresh = self.inner.runtime_env(pkg).await?;
        self.env.write().await.insert(pkg.clone(), fresh.clone());
        Ok(fresh)
    }

    async fn refresh(&self) -> Result<(), RegistryError> {
        self.versions.write().await.clear();
        self.deps.write().await.clear();
        self.env.write().await.clear();
        self.inner.refresh().await
    }
}
