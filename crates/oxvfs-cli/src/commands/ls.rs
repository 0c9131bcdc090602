//! List command - list directory contents in a container.
//!
//! # Examples
//!
//! ```bash
//! # List root directory
//! oxvfs ls ~/notes.db
//!
//! # List with details
//! oxvfs ls -l ~/notes.db /documents
//!
//! # Output as JSON for scripting
//! oxvfs ls --json ~/notes.db / | jq '.entries[].name'
//! ```

use anyhow::{Context, Result, bail};
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use oxvfs_core::FileStat;

use super::{join_path, normalize_path};
use crate::Session;
use crate::output::{create_table, epoch_seconds, format_entry_type, format_mode, format_size, format_time};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Path within the container (default: root)
    #[arg(default_value = "/")]
    pub path: String,

    /// Show detailed information
    #[arg(short, long)]
    pub long: bool,

    /// Show entries starting with a dot
    #[arg(short, long)]
    pub all: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// JSON output format for ls command
#[derive(Serialize)]
struct LsOutput {
    path: String,
    entries: Vec<EntryInfo>,
}

#[derive(Serialize)]
struct EntryInfo {
    name: String,
    #[serde(rename = "type")]
    entry_type: &'static str,
    size: u64,
    mode: String,
    modified: i64,
}

#[instrument(level = "info", name = "cmd::ls", skip_all, fields(path = %args.path))]
pub fn execute(vfs: &Session, args: &Args) -> Result<()> {
    let path = normalize_path(&args.path);
    let stat = vfs.stat(&path).with_context(|| format!("Cannot access {path}"))?;
    if !stat.is_dir() {
        bail!("Not a directory: {path}");
    }

    let mut entries = Vec::new();
    for name in vfs.list(&path)? {
        if !args.all && name.starts_with('.') {
            continue;
        }
        let entry_stat = vfs.stat(&join_path(&path, &name))?;
        entries.push((name, entry_stat));
    }

    if args.json {
        print_json(&path, &entries)?;
    } else if args.long {
        print_long_format(&entries);
    } else {
        for (name, stat) in &entries {
            if stat.is_dir() {
                println!("{name}/");
            } else {
                println!("{name}");
            }
        }
    }
    Ok(())
}

fn print_json(path: &str, entries: &[(String, FileStat)]) -> Result<()> {
    let output = LsOutput {
        path: path.to_string(),
        entries: entries
            .iter()
            .map(|(name, stat)| EntryInfo {
                name: name.clone(),
                entry_type: format_entry_type(stat),
                size: stat.size,
                mode: format!("{:o}", stat.permissions()),
                modified: epoch_seconds(stat.mtime),
            })
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_long_format(entries: &[(String, FileStat)]) {
    let mut table = create_table();
    table.set_header(vec!["Mode", "Size", "Modified", "Name"]);
    for (name, stat) in entries {
        let size = if stat.is_dir() { "-".to_string() } else { format_size(stat.size) };
        let display = if stat.is_dir() { format!("{name}/") } else { name.clone() };
        table.add_row(vec![format_mode(stat), size, format_time(stat.mtime), display]);
    }
    println!("{table}");
}
