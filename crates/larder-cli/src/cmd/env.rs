//! `larder env`

use anyhow::Result;

use larder_core::env::{construct_env, render_exports};

use crate::ops::{self, Context};

/// Print `export KEY="value"` lines for the environment of the given
/// package specs, installing anything that is missing first.
pub async fn env(ctx: &Context, specs: &[String]) -> Result<()> {
    let installations = ops::install::install_specs(ctx, specs, false).await?;
    let vars = construct_env(&installations, ctx.registry.as_ref()).await?;
    print!("{}", render_exports(&vars));
    Ok(())
}
