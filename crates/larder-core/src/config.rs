//! Engine configuration.
//!
//! One [`Config`] is constructed per top-level invocation and passed by
//! reference into every component; there is no ambient global state. Values
//! come from the environment (`LARDER_HOME`, `LARDER_REGISTRY_URL`,
//! `LARDER_CONCURRENCY`) layered over an optional `~/.larder/config.toml`,
//! decoded once into a typed structure.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::paths;

/// Registry queried when no override is configured.
pub const DEFAULT_REGISTRY: &str = "https://dist.larder.dev";

/// How long an installer waits on another process's shelf lock before
/// giving up.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors produced while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Neither `LARDER_HOME` nor the user's home directory could be resolved.
    #[error("could not determine home directory; set LARDER_HOME to override")]
    NoHome,

    /// The configuration file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file exists but is not valid TOML of the expected
    /// shape.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying TOML error.
        source: toml::de::Error,
    },
}

/// On-disk shape of `config.toml`. Decoded in one place; the engine never
/// inspects raw TOML values.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    registry: Option<String>,
    concurrency: Option<usize>,
}

/// Immutable per-invocation configuration.
#[derive(Debug, Clone)]
pub struct Config {
    home: PathBuf,
    registry_url: String,
    concurrency: usize,
    lock_timeout: Duration,
}

impl Config {
    /// Load configuration from the environment and the optional
    /// `config.toml` beneath the larder home.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when no home directory can be resolved or the
    /// configuration file is present but unreadable/invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let home = paths::try_larder_home().ok_or(ConfigError::NoHome)?;
        let mut config = Self::with_home(home);

        let file_path = config.home.join("config.toml");
        if file_path.exists() {
            let text = std::fs::read_to_string(&file_path).map_err(|source| ConfigError::Read {
                path: file_path.clone(),
                source,
            })?;
            let file: ConfigFile =
                toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: file_path.clone(),
                    source,
                })?;
            if let Some(registry) = file.registry {
                config.registry_url = registry;
            }
            if let Some(concurrency) = file.concurrency {
                config.concurrency = concurrency.max(1);
            }
        }

        if let Ok(registry) = std::env::var("LARDER_REGISTRY_URL") {
            config.registry_url = registry;
        }
        if let Ok(concurrency) = std::env::var("LARDER_CONCURRENCY") {
            if let Ok(n) = concurrency.parse::<usize>() {
                config.concurrency = n.max(1);
            }
        }

        Ok(config)
    }

    /// A configuration rooted at an explicit home directory with defaults
    /// for everything else. Used by tests and embedders.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            registry_url: DEFAULT_REGISTRY.to_string(),
            concurrency: num_cpus::get().clamp(2, 16),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Replace the registry base URL.
    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = url.into();
        self
    }

    /// Replace the shelf-lock acquisition timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// The larder home directory.
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// The registry base URL.
    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }

    /// Maximum number of packages installed in parallel.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// How long to wait on a contended shelf lock.
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Package store directory.
    pub fn store_dir(&self) -> PathBuf {
        self.home.join("store")
    }

    /// Artifact and registry-document cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    /// Per-project lock file directory.
    pub fn locks_dir(&self) -> PathBuf {
        self.home.join("locks")
    }

    /// Scratch directory, same volume as the store.
    pub fn tmp_dir(&self) -> PathBuf {
        self.home.join("tmp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_home_uses_defaults() {
        let config = Config::with_home("/tmp/larder-test");
        assert_eq!(config.registry_url(), DEFAULT_REGISTRY);
        assert!(config.concurrency() >= 2);
        assert_eq!(config.store_dir(), PathBuf::from("/tmp/larder-test/store"));
        assert_eq!(config.locks_dir(), PathBuf::from("/tmp/larder-test/locks"));
    }

    #[test]
    fn builders_override() {
        let config = Config::with_home("/tmp/x")
            .with_registry_url("http://localhost:9999")
            .with_lock_timeout(Duration::from_millis(10));
        assert_eq!(config.registry_url(), "http://localhost:9999");
        assert_eq!(config.lock_timeout(), Duration::from_millis(10));
    }
}
