use anyhow::Result;
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use crate::Session;
use crate::output::{create_table, format_size};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct DfOutput {
    block_size: u64,
    container_bytes: u64,
    free_bytes: u64,
    available_bytes: u64,
    files: u64,
    free_files: u64,
    max_name_length: u64,
}

#[instrument(level = "info", name = "cmd::df", skip_all)]
pub fn execute(vfs: &Session, args: &Args) -> Result<()> {
    // blocks counts the container file's own 512-byte allocation units
    let stats = vfs.statfs("/")?;
    let output = DfOutput {
        block_size: stats.bsize,
        container_bytes: stats.blocks.saturating_mul(512),
        free_bytes: stats.bfree.saturating_mul(stats.frsize),
        available_bytes: stats.bavail.saturating_mul(stats.frsize),
        files: stats.files,
        free_files: stats.ffree,
        max_name_length: stats.namelen,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let mut table = create_table();
    table.set_header(vec!["Container", "Free", "Available", "Block size"]);
    table.add_row(vec![
        format_size(output.container_bytes),
        format_size(output.free_bytes),
        format_size(output.available_bytes),
        output.block_size.to_string(),
    ]);
    println!("{table}");
    Ok(())
}
