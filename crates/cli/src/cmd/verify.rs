//! Check the revision graph and every stored tree

use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;

pub fn run() -> Result<()> {
    let repo = util::open_repo()?;
    let report = repo.verify()?;
    let graph = &report.graph;

    println!(
        "graph: {}/{} snapshots valid ({:?})",
        graph.valid_entries, graph.total_entries, graph.scan_duration
    );
    for (snapshot, parent) in &graph.missing_parents {
        println!("  {} {} has dangling parent {}", "!".red(), snapshot, parent);
    }
    for (snapshot, seq, indexed) in &graph.index_mismatches {
        println!("  {} {} stored at {} but indexed at {}", "!".red(), snapshot, seq, indexed);
    }
    if !graph.corrupted_entries.is_empty() {
        println!("  {} {} entries failed to decode", "!".red(), graph.corrupted_entries.len());
    }

    println!("trees: {} checked", report.trees_checked);
    for (snapshot, reason) in &report.broken_trees {
        println!("  {} {}: {}", "!".red(), snapshot, reason);
    }

    if !report.is_healthy() {
        anyhow::bail!(
            "repository has {} problems",
            graph.issue_count() + report.broken_trees.len()
        );
    }
    println!("{} repository is healthy", "✓".green());
    Ok(())
}
