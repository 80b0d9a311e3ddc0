//! larder - bottle-based package manager CLI

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use larder_cli::ops::Context;
use larder_cli::ui::ConsoleReporter;
use larder_cli::{Cli, Commands, cmd};
use larder_core::{Config, Reporter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let reporter: Arc<dyn Reporter> = Arc::new(ConsoleReporter);
    let ctx = Context::new(config, reporter)?;

    match cli.command {
        Commands::Install { specs } => cmd::install::install(&ctx, &specs, cli.dry_run).await,
        Commands::Env { specs } => cmd::env::env(&ctx, &specs).await,
        Commands::List { project } => cmd::list::list(&ctx, project.as_deref()),
    }
}
