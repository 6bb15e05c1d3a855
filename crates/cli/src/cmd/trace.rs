//! Follow one chunk between two snapshots

use crate::render;
use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;

pub fn run(from: &str, to: &str, path: &str, offset: u64) -> Result<()> {
    let repo = util::open_repo()?;
    let old = repo.resolve(from)?;
    let new = repo.resolve(to)?;

    let hits = repo.trace(&old, &new, path, offset)?;
    if hits.is_empty() {
        println!("{}", format!("No chunk covers {}@{} in either snapshot", path, offset).dimmed());
        return Ok(());
    }
    for entry in &hits {
        render::print_entry(entry);
    }
    Ok(())
}
