use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use super::normalize_path;
use crate::Session;
use crate::output::{create_table, epoch_seconds, format_entry_type, format_mode, format_time};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Path within the container
    pub path: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatOutput {
    path: String,
    #[serde(rename = "type")]
    entry_type: &'static str,
    size: u64,
    mode: String,
    inode: u64,
    links: u64,
    uid: u32,
    gid: u32,
    blocks: u64,
    accessed: i64,
    modified: i64,
    changed: i64,
}

#[instrument(level = "info", name = "cmd::stat", skip_all, fields(path = %args.path))]
pub fn execute(vfs: &Session, args: &Args) -> Result<()> {
    let path = normalize_path(&args.path);
    let stat = vfs.stat(&path).with_context(|| format!("Cannot stat {path}"))?;

    if args.json {
        let output = StatOutput {
            path,
            entry_type: format_entry_type(&stat),
            size: stat.size,
            mode: format!("{:o}", stat.permissions()),
            inode: stat.ino,
            links: stat.nlink,
            uid: stat.uid,
            gid: stat.gid,
            blocks: stat.blocks,
            accessed: epoch_seconds(stat.atime),
            modified: epoch_seconds(stat.mtime),
            changed: epoch_seconds(stat.ctime),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let mut table = create_table();
    table.add_row(vec!["Path".to_string(), path]);
    table.add_row(vec!["Type".to_string(), format_entry_type(&stat).to_string()]);
    table.add_row(vec!["Size".to_string(), stat.size.to_string()]);
    table.add_row(vec![
        "Mode".to_string(),
        format!("{:04o} ({})", stat.permissions(), format_mode(&stat)),
    ]);
    table.add_row(vec!["Inode".to_string(), stat.ino.to_string()]);
    table.add_row(vec!["Links".to_string(), stat.nlink.to_string()]);
    table.add_row(vec!["Owner".to_string(), format!("{}:{}", stat.uid, stat.gid)]);
    table.add_row(vec!["Accessed".to_string(), format_time(stat.atime)]);
    table.add_row(vec!["Modified".to_string(), format_time(stat.mtime)]);
    table.add_row(vec!["Changed".to_string(), format_time(stat.ctime)]);
    println!("{table}");
    Ok(())
}
