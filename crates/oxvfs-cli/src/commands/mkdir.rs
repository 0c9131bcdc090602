use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use super::{normalize_path, parse_mode};
use crate::Session;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Directory path to create
    pub path: String,

    /// Create parent directories as needed
    #[arg(short, long)]
    pub parents: bool,

    /// Permission bits, in octal
    #[arg(short, long, default_value = "755", value_parser = parse_mode)]
    pub mode: u32,
}

#[instrument(level = "info", name = "cmd::mkdir", skip_all, fields(path = %args.path, parents = args.parents))]
pub fn execute(vfs: &Session, args: &Args) -> Result<()> {
    let path = normalize_path(&args.path);
    if !args.parents {
        vfs.mkdir(&path, args.mode)
            .with_context(|| format!("Cannot create directory {path}"))?;
        return Ok(());
    }

    let mut current = String::new();
    for component in path.split('/').filter(|c| !c.is_empty()) {
        current.push('/');
        current.push_str(component);
        if vfs.is_directory(&current)? {
            continue;
        }
        vfs.mkdir(&current, args.mode)
            .with_context(|| format!("Cannot create directory {current}"))?;
    }
    Ok(())
}
