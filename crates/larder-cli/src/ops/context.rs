//! Shared operation context.
//!
//! Groups the state every operation needs: configuration, the HTTP client,
//! the memoizing registry, the store accessor, and the reporter. One
//! context (and so one metadata cache) exists per top-level invocation.

use std::fmt;
use std::sync::Arc;

use larder_core::cache::ProjectCache;
use larder_core::registry::HttpRegistry;
use larder_core::{Config, Reporter, Store, USER_AGENT};

use crate::ops::OpError;

/// Groups common state used during operations.
#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub client: reqwest::Client,
    pub registry: Arc<ProjectCache<HttpRegistry>>,
    pub store: Store,
    pub reporter: Arc<dyn Reporter>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Build a context for one invocation.
    pub fn new(config: Config, reporter: Arc<dyn Reporter>) -> Result<Self, OpError> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        let registry = HttpRegistry::new(
            config.registry_url(),
            client.clone(),
            config.cache_dir().join("registry"),
        );
        let store = Store::new(config.store_dir());
        Ok(Self {
            config: Arc::new(config),
            client,
            registry: Arc::new(ProjectCache::new(registry)),
            store,
            reporter,
        })
    }
}
