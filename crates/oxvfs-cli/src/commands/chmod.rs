use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use super::{normalize_path, parse_mode};
use crate::Session;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Permission bits, in octal
    #[arg(value_parser = parse_mode)]
    pub mode: u32,

    /// Path within the container
    pub path: String,
}

#[instrument(level = "info", name = "cmd::chmod", skip_all, fields(path = %args.path, mode = args.mode))]
pub fn execute(vfs: &Session, args: &Args) -> Result<()> {
    let path = normalize_path(&args.path);
    vfs.chmod(&path, args.mode)
        .with_context(|| format!("Cannot change mode of {path}"))?;
    Ok(())
}
