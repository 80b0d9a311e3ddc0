//! Domain-specific errors for package operations.

use thiserror::Error;

use larder_core::config::ConfigError;
use larder_core::env::EnvError;
use larder_core::hydrate::HydrateError;
use larder_core::install::InstallError;
use larder_core::link::LinkError;
use larder_core::resolve::ResolveError;
use larder_schema::SpecError;

#[derive(Error, Debug)]
pub enum OpError {
    #[error("invalid package spec: {0}")]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to construct HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Hydrate(#[from] HydrateError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}
