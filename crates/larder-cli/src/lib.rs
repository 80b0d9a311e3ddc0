//! larder - a bottle-based package manager
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Give larder symbolic requirements ("node@^20", "openssl.org@1.1") and it
//! resolves a consistent set of concrete versions across the transitive
//! dependency graph, installs the corresponding bottles into
//! `~/.larder/store`, maintains "current version" symlinks, and constructs
//! the environment needed to run commands against the installed set.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.larder/
//! ├── store/      # Installed packages: <project>/v<version>
//! ├── cache/      # Downloaded bottles and registry documents
//! ├── locks/      # Per-project advisory lock files
//! └── tmp/        # Private extraction scratch (same volume as store)
//! ```

pub mod cmd;
pub mod ops;
pub mod ui;

// Re-exports from the engine for convenience
pub use larder_core::USER_AGENT;
pub use larder_core::{Config, NullReporter, Reporter, Store};

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "larder")]
#[command(author, version, about = "larder - install bottled packages and run against them")]
pub struct Cli {
    /// Show what would happen without making changes
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install packages and their transitive dependencies
    Install {
        /// Package spec(s): project, project@1.2, project@^1.2, project@latest
        #[arg(required = true)]
        specs: Vec<String>,
    },
    /// Print `export` lines for the environment of the given packages
    /// (installing anything that is missing)
    Env {
        /// Package spec(s)
        #[arg(required = true)]
        specs: Vec<String>,
    },
    /// List installed packages
    List {
        /// Limit the listing to one project
        project: Option<String>,
    },
}
