//! Rm command - remove files and directories.
//!
//! Recursive removal runs inside a container transaction, so a failure
//! part-way through leaves the tree as it was.

use anyhow::{Context, Result, bail};
use clap::Args as ClapArgs;
use tracing::instrument;

use super::{join_path, normalize_path};
use crate::Session;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Path to remove
    pub path: String,

    /// Remove directories and their contents recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Ignore nonexistent paths
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Debug, Default)]
struct RemoveStats {
    files: usize,
    directories: usize,
}

#[instrument(level = "info", name = "cmd::rm", skip_all, fields(path = %args.path, recursive = args.recursive))]
pub fn execute(vfs: &Session, args: &Args) -> Result<()> {
    let path = normalize_path(&args.path);
    if path == "/" {
        bail!("Refusing to remove the container root");
    }

    let stat = match vfs.stat(&path) {
        Ok(stat) => stat,
        Err(e) if args.force && e.is_errno(nix::errno::Errno::ENOENT) => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("Cannot remove {path}")),
    };

    if !stat.is_dir() {
        vfs.unlink(&path).with_context(|| format!("Cannot remove {path}"))?;
        return Ok(());
    }
    if !args.recursive {
        vfs.rmdir(&path)
            .with_context(|| format!("Cannot remove directory {path} (use -r for non-empty directories)"))?;
        return Ok(());
    }

    vfs.begin_transaction()?;
    let mut stats = RemoveStats::default();
    match remove_tree(vfs, &path, &mut stats) {
        Ok(()) => vfs.complete_transaction()?,
        Err(e) => {
            if let Err(rollback) = vfs.rollback_transaction() {
                tracing::warn!(error = %rollback, "Rollback failed");
            }
            return Err(e);
        }
    }
    eprintln!(
        "Deleted {} files and {} directories",
        stats.files, stats.directories
    );
    Ok(())
}

fn remove_tree(vfs: &Session, path: &str, stats: &mut RemoveStats) -> Result<()> {
    for name in vfs.list(path)? {
        let child = join_path(path, &name);
        if vfs.is_directory(&child)? {
            remove_tree(vfs, &child, stats)?;
        } else {
            vfs.unlink(&child).with_context(|| format!("Cannot remove {child}"))?;
            stats.files += 1;
        }
    }
    vfs.rmdir(path).with_context(|| format!("Cannot remove directory {path}"))?;
    stats.directories += 1;
    Ok(())
}
