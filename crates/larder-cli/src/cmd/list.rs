//! `larder list`

use anyhow::Result;

use larder_schema::PackageName;

use crate::ops::Context;

/// Print installed packages, one `project@version<TAB>path` per line.
pub fn list(ctx: &Context, project: Option<&str>) -> Result<()> {
    let installations = match project {
        Some(project) => ctx.store.ls(&PackageName::new(project))?,
        None => ctx.store.ls_all()?,
    };
    for installation in &installations {
        println!("{}\t{}", installation.pkg, installation.path.display());
    }
    Ok(())
}
