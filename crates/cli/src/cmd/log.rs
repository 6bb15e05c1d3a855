//! Display snapshot history

use crate::util;
use anyhow::Result;
use chrono::Utc;
use chunkline_history::Snapshot;
use owo_colors::OwoColorize;

pub fn run(limit: Option<usize>) -> Result<()> {
    let repo = util::open_repo()?;

    let Some(head) = repo.head()? else {
        println!("{}", "No snapshots yet".dimmed());
        println!();
        println!("{}", "Tip: record the working tree with `chl record`".dimmed());
        return Ok(());
    };

    let limit = limit.unwrap_or(20);
    let mut shown = 0;
    for snapshot in repo.graph().history(&head)?.take(limit) {
        display(&snapshot?, shown == 0);
        shown += 1;
    }

    let total = repo.graph().count();
    if shown < total {
        println!();
        println!("{}", format!("Showing {} of {} snapshots", shown, total).dimmed());
    }
    Ok(())
}

fn display(snapshot: &Snapshot, is_head: bool) {
    print!("{}", util::short_id(&snapshot.id).yellow());
    if is_head {
        print!(" {}", "(HEAD)".cyan());
    }
    if let Some(label) = &snapshot.meta.label {
        print!(" {}", label.bold());
    }
    if let Some(task) = &snapshot.meta.task {
        print!(" [{}]", task.magenta());
    }
    print!(
        " - {} files, {} chunks",
        snapshot.meta.files, snapshot.meta.chunks
    );
    if snapshot.parents.len() > 1 {
        print!(" (merge of {})", snapshot.parents.len());
    }
    println!(" {}", util::snapshot_age(snapshot.ts_unix_ms, Utc::now()).dimmed());
}
