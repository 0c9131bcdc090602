//! Table and value formatting for command output.

use std::time::SystemTime;

use chrono::{DateTime, Local};
use comfy_table::{ContentArrangement, Table, presets::UTF8_BORDERS_ONLY};

use oxvfs_core::FileStat;

pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Human-readable size with binary units.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

pub fn format_entry_type(stat: &FileStat) -> &'static str {
    if stat.is_dir() {
        "dir"
    } else if stat.is_symlink() {
        "link"
    } else {
        "file"
    }
}

/// `ls -l` style mode string, e.g. `drwxr-xr-x`.
pub fn format_mode(stat: &FileStat) -> String {
    let kind = if stat.is_dir() {
        'd'
    } else if stat.is_symlink() {
        'l'
    } else {
        '-'
    };
    let mut out = String::with_capacity(10);
    out.push(kind);
    for shift in [6, 3, 0] {
        let bits = (stat.mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

pub fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Seconds since the epoch, for JSON output.
pub fn epoch_seconds(time: SystemTime) -> i64 {
    DateTime::<Local>::from(time).timestamp()
}
