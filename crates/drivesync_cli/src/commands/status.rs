//! Status command implementation.

use drivesync_fs::{DirNodeStore, TrackedFs};
use serde::Serialize;
use std::path::Path;

/// Unsynced state of an on-disk store.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Store root.
    pub path: String,
    /// Paths with content.
    pub file_count: usize,
    /// Paths carrying the unsynced marker, sorted.
    pub unsynced: Vec<String>,
    /// Unsynced paths with no content (pending deletions).
    pub pending_deletes: Vec<String>,
}

/// Builds the status report for the store at `path`.
pub fn collect(path: &Path) -> Result<StatusReport, Box<dyn std::error::Error>> {
    let fs = TrackedFs::new(DirNodeStore::open(path, false)?);
    let unsynced = fs.dirty_paths()?;

    let mut pending_deletes = Vec::new();
    for node in &unsynced {
        if !fs.exists(node)? {
            pending_deletes.push(node.clone());
        }
    }

    Ok(StatusReport {
        path: path.display().to_string(),
        file_count: fs.list()?.len(),
        unsynced,
        pending_deletes,
    })
}

/// Runs the status command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = collect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => print_text(&report),
    }
    Ok(())
}

fn print_text(report: &StatusReport) {
    println!("drivesync status");
    println!("================");
    println!();
    println!("Path:     {}", report.path);
    println!("Files:    {}", report.file_count);
    println!("Unsynced: {}", report.unsynced.len());

    if !report.unsynced.is_empty() {
        println!();
        for node in &report.unsynced {
            if report.pending_deletes.contains(node) {
                println!("  D {node}");
            } else {
                println!("  M {node}");
            }
        }
    }
}
