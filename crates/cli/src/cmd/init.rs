//! Initialize chunkline in the current directory

use anyhow::{Context, Result};
use chunkline_history::Repository;
use owo_colors::OwoColorize;
use std::env;

pub fn run() -> Result<()> {
    let current_dir = env::current_dir()?;

    if current_dir.join(".chunkline").exists() {
        anyhow::bail!("chunkline already initialized at {}/.chunkline/", current_dir.display());
    }

    let repo = Repository::init(&current_dir)
        .with_context(|| format!("Failed to initialize {}", current_dir.display()))?;

    println!("{} Initialized chunkline", "✓".green());
    println!("  Store:  {}", repo.store().dir().display());
    println!("  Config: {}", repo.store().dir().join("config.toml").display());
    println!();
    println!("{}", "Record the working tree with: chl record".dimmed());
    Ok(())
}
