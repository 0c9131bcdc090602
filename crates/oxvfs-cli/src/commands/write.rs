//! Write command - copy stdin into a container file.
//!
//! ```bash
//! echo "hello" | oxvfs write ~/notes.db /hello.txt
//! date | oxvfs write --append ~/notes.db /log.txt
//! ```

use std::io;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use oxvfs_mount::OpenOptions;

use super::normalize_path;
use crate::Session;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Destination path within the container
    pub path: String,

    /// Append instead of replacing existing content
    #[arg(short, long)]
    pub append: bool,
}

#[instrument(level = "info", name = "cmd::write", skip_all, fields(path = %args.path, append = args.append))]
pub fn execute(vfs: &Session, args: &Args) -> Result<()> {
    let path = normalize_path(&args.path);
    let mut options = OpenOptions::new();
    options.write(true).create(true);
    if args.append {
        options.append(true);
    } else {
        options.truncate(true);
    }

    let mut file = options
        .open(vfs, &path)
        .with_context(|| format!("Cannot open {path} for writing"))?;
    let written = io::copy(&mut io::stdin().lock(), &mut file)
        .with_context(|| format!("Cannot write {path}"))?;
    file.sync_all()?;
    file.close()?;
    tracing::info!(bytes = written, "Wrote file");
    Ok(())
}
