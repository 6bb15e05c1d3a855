//! Classify every chunk between two snapshots

use crate::render;
use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;

pub fn run(from: &str, to: Option<&str>, all: bool, json: bool) -> Result<()> {
    let repo = util::open_repo()?;
    let old = repo.resolve(from)?;

    let (report, target) = match to {
        Some(to) => {
            let new = repo.resolve(to)?;
            (repo.diff(&old, &new)?, util::short_id(&new))
        }
        None => (repo.diff_working(&old)?, "working tree".to_string()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&render::report_json(&report, all)?)?);
        return Ok(());
    }

    println!("{} {} -> {}", "diff".bold(), util::short_id(&old).yellow(), target.yellow());
    if report.is_unchanged() && !all {
        println!("{}", "No changes".dimmed());
    }
    for entry in &report.entries {
        if all || entry.kind() != chunkline_lineage::LineageKind::Unchanged {
            render::print_entry(entry);
        }
    }
    println!();
    println!("{}", render::summary_line(&report.summary()).dimmed());
    Ok(())
}
