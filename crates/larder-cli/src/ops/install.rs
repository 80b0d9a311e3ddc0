//! Batch install orchestration.
//!
//! Parse specs → hydrate → resolve → install what's pending (independent
//! projects in parallel, bounded by the configured fan-out) → publish
//! shelf aliases. The batch is fail-fast: the first error aborts the
//! remaining installs and propagates.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use larder_core::hydrate::hydrate;
use larder_core::install::{InstallMode, Installer};
use larder_core::link::link;
use larder_core::resolve::resolve;
use larder_schema::{Installation, PackageRequirement};

use crate::ops::{Context, OpError};

/// Resolve and install a batch of package specs, returning every
/// installation in the resolved set (pre-existing and new).
///
/// With `dry_run` the engine reports what *would* be installed — the
/// returned records point at store locations that do not exist yet — and
/// performs no network or filesystem mutation beyond metadata lookups.
pub async fn install_specs(
    ctx: &Context,
    specs: &[String],
    dry_run: bool,
) -> Result<Vec<Installation>, OpError> {
    let mut seed = Vec::with_capacity(specs.len());
    for spec in specs {
        seed.push(spec.parse::<PackageRequirement>()?);
    }

    let requirements = hydrate(&seed, ctx.registry.as_ref()).await?;
    debug!(
        requested = seed.len(),
        hydrated = requirements.len(),
        "hydrated requirement set"
    );

    let resolution = resolve(&requirements, &ctx.store, ctx.registry.as_ref()).await?;
    let mut installations = resolution.installed;

    if dry_run {
        let installer = Installer::new(&ctx.config, &ctx.client).with_mode(InstallMode::DryRun);
        for pkg in &resolution.pending {
            installations.push(installer.install(pkg, ctx.registry.as_ref()).await?);
        }
        return Ok(installations);
    }

    // Independent projects install in parallel; the per-project shelf lock
    // inside the installer serializes same-project work, and linking a
    // project happens only after its own install completes.
    let semaphore = Arc::new(Semaphore::new(ctx.config.concurrency()));
    let mut tasks: JoinSet<Result<Installation, OpError>> = JoinSet::new();
    for pkg in resolution.pending {
        let ctx = ctx.clone();
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| OpError::Internal(format!("semaphore closed: {e}")))?;
            let installer =
                Installer::new(&ctx.config, &ctx.client).with_reporter(ctx.reporter.as_ref());
            let installation = installer.install(&pkg, ctx.registry.as_ref()).await?;
            link(&ctx.config, &installation, ctx.reporter.as_ref()).await?;
            Ok(installation)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(installation)) => installations.push(installation),
            Ok(Err(e)) => {
                tasks.abort_all();
                return Err(e);
            }
            Err(e) => {
                tasks.abort_all();
                return Err(OpError::Internal(format!("install task panicked: {e}")));
            }
        }
    }

    Ok(installations)
}
