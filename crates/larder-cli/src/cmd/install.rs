//! `larder install`

use anyhow::Result;

use crate::ops::{self, Context};

/// Install the given package specs (and their transitive dependencies).
pub async fn install(ctx: &Context, specs: &[String], dry_run: bool) -> Result<()> {
    let installations = ops::install::install_specs(ctx, specs, dry_run).await?;

    if dry_run {
        println!("would install:");
        for installation in &installations {
            println!("  {} -> {}", installation.pkg, installation.path.display());
        }
    } else {
        println!("{} package(s) present", installations.len());
    }
    Ok(())
}
