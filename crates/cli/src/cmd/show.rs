//! Show one snapshot and its files

use crate::util;
use anyhow::Result;
use chrono::Utc;
use owo_colors::OwoColorize;

pub fn run(reference: &str) -> Result<()> {
    let repo = util::open_repo()?;
    let id = repo.resolve(reference)?;
    let snapshot = repo.snapshot(&id)?;
    let tree = repo.tree_of(&snapshot)?;

    println!("{} {}", "snapshot".bold(), snapshot.id.to_string().yellow());
    for parent in &snapshot.parents {
        println!("parent   {}", parent);
    }
    println!("tree     {}", snapshot.tree);
    println!(
        "date     {} ({})",
        util::snapshot_date(snapshot.ts_unix_ms),
        util::snapshot_age(snapshot.ts_unix_ms, Utc::now()).dimmed()
    );
    if let Some(label) = &snapshot.meta.label {
        println!("label    {}", label);
    }
    if let Some(task) = &snapshot.meta.task {
        println!("task     {}", task);
    }
    for (key, value) in &snapshot.meta.attributes {
        println!("{:<8} {}", key, value);
    }

    println!();
    println!("{} files, {} chunks, {} symbols", tree.len(), tree.chunk_count(), tree.symbols().len());
    for file in tree.files() {
        println!(
            "  {:o} {:>10} {:>4} chunks  {}",
            file.meta.mode,
            util::human_bytes(file.size),
            file.chunks.len(),
            file.path
        );
    }
    Ok(())
}
