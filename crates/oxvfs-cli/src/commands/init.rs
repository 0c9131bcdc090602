//! Init command - create a new, empty container.

use anyhow::{Context, Result, bail};
use clap::Args as ClapArgs;
use tracing::instrument;

use crate::Session;
use crate::auth::Secret;

#[derive(ClapArgs, Clone)]
pub struct Args {}

#[instrument(level = "info", name = "cmd::init", skip_all)]
pub fn execute(vfs: &Session, secret: &Secret, _args: &Args) -> Result<()> {
    let Some(path) = vfs.container_path() else {
        bail!("No container path given");
    };
    if path.exists() {
        bail!("Container already exists: {}", path.display());
    }

    vfs.create_new_container(&secret.credential())
        .with_context(|| format!("Failed to create container {}", path.display()))?;
    println!("Created new container at {}", path.display());
    Ok(())
}
