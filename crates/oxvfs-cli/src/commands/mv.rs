use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use super::normalize_path;
use crate::Session;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Source path
    pub source: String,

    /// Destination path
    pub dest: String,
}

#[instrument(level = "info", name = "cmd::mv", skip_all, fields(source = %args.source, dest = %args.dest))]
pub fn execute(vfs: &Session, args: &Args) -> Result<()> {
    let source = normalize_path(&args.source);
    let dest = normalize_path(&args.dest);
    vfs.rename(&source, &dest)
        .with_context(|| format!("Cannot move {source} to {dest}"))?;
    Ok(())
}
