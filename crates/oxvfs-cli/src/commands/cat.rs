use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use oxvfs_mount::VfsFile;

use super::normalize_path;
use crate::Session;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// File paths within the container
    #[arg(required = true)]
    pub files: Vec<String>,
}

#[instrument(level = "info", name = "cmd::cat", skip_all, fields(count = args.files.len()))]
pub fn execute(vfs: &Session, args: &Args) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for file in &args.files {
        let path = normalize_path(file);
        let mut reader = VfsFile::open(vfs, &path).with_context(|| format!("Cannot open {path}"))?;
        io::copy(&mut reader, &mut out).with_context(|| format!("Cannot read {path}"))?;
        reader.close()?;
    }
    out.flush()?;
    Ok(())
}
