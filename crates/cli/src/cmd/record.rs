//! Scan and record the working tree

use crate::util;
use anyhow::Result;
use chunkline_history::SnapshotMeta;
use owo_colors::OwoColorize;

pub fn run(label: Option<String>, task: Option<String>, parents: Vec<String>) -> Result<()> {
    let repo = util::open_repo()?;

    let parents = if parents.is_empty() {
        None
    } else {
        Some(
            parents
                .iter()
                .map(|reference| repo.resolve(reference))
                .collect::<Result<Vec<_>>>()?,
        )
    };

    let mut meta = SnapshotMeta::default();
    if let Some(label) = label {
        meta = meta.with_label(label);
    }
    if let Some(task) = task {
        meta = meta.with_task(task);
    }

    let recorded = repo.record_scan(meta, parents)?;
    let snapshot = &recorded.snapshot;

    println!("Recorded {}", snapshot.id.to_string().yellow());
    println!(
        "  {} files, {} chunks, {}",
        snapshot.meta.files,
        snapshot.meta.chunks,
        util::human_bytes(recorded.bytes)
    );
    println!("  tree {}", snapshot.tree.short().dimmed());

    if !recorded.excluded.is_empty() {
        println!();
        println!("{} {} files excluded:", "!".yellow(), recorded.excluded.len());
        for (path, reason) in &recorded.excluded {
            println!("  {} {}", path, reason.to_string().dimmed());
        }
    }
    Ok(())
}
