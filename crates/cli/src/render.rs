//! Text and JSON rendering of lineage reports

use chunkline_lineage::{ChunkLocation, Lineage, LineageKind, LineageReport, Summary};
use owo_colors::OwoColorize;
use serde_json::{json, Value};

fn join(locations: &[ChunkLocation]) -> String {
    locations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// One entry as a plain line, `<kind> <from> -> <to>`
pub fn entry_line(entry: &Lineage) -> String {
    match entry {
        Lineage::Unchanged { from, .. } => format!("{:<10} {}", "unchanged", from),
        Lineage::Moved { from, to } => format!("{:<10} {} -> {}", "moved", from, to),
        Lineage::Duplicated { from, to } => format!("{:<10} {} -> [{}]", "duplicated", from, join(to)),
        Lineage::Modified { from, to, score } => {
            format!("{:<10} {} -> {} ({:.0}% similar)", "modified", from, to, score * 100.0)
        }
        Lineage::Split { from, to, coverage } => {
            format!("{:<10} {} -> [{}] ({:.0}% covered)", "split", from, join(to), coverage * 100.0)
        }
        Lineage::Removed { from } => format!("{:<10} {}", "removed", from),
        Lineage::Added { to } => format!("{:<10} {}", "added", to),
    }
}

pub fn print_entry(entry: &Lineage) {
    let line = entry_line(entry);
    match entry.kind() {
        LineageKind::Unchanged => println!("  {}", line.dimmed()),
        LineageKind::Moved => println!("  {}", line.cyan()),
        LineageKind::Duplicated => println!("  {}", line.blue()),
        LineageKind::Modified => println!("  {}", line.yellow()),
        LineageKind::Split => println!("  {}", line.magenta()),
        LineageKind::Removed => println!("  {}", line.red()),
        LineageKind::Added => println!("  {}", line.green()),
    }
}

pub fn summary_line(summary: &Summary) -> String {
    const KINDS: [LineageKind; 7] = [
        LineageKind::Unchanged,
        LineageKind::Moved,
        LineageKind::Duplicated,
        LineageKind::Modified,
        LineageKind::Split,
        LineageKind::Removed,
        LineageKind::Added,
    ];
    KINDS
        .iter()
        .filter(|kind| summary.count(**kind) > 0)
        .map(|kind| format!("{} {}", summary.count(*kind), kind))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The report as JSON; without `all`, unchanged entries are dropped
pub fn report_json(report: &LineageReport, all: bool) -> serde_json::Result<Value> {
    let entries: Vec<&Lineage> = if all {
        report.entries.iter().collect()
    } else {
        report.changes().collect()
    };
    Ok(json!({
        "old_tree": report.old_tree.to_hex(),
        "new_tree": report.new_tree.to_hex(),
        "summary": serde_json::to_value(report.summary())?,
        "entries": serde_json::to_value(entries)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkline_core::{Digest, Range};

    fn location(path: &str) -> ChunkLocation {
        ChunkLocation {
            path: path.to_string(),
            index: 0,
            range: Range::binary(0, 4).unwrap(),
            symbol: None,
        }
    }

    fn report() -> LineageReport {
        LineageReport::new(
            Digest::from_bytes([1; 32]),
            Digest::from_bytes([2; 32]),
            vec![
                Lineage::Unchanged {
                    from: location("a.txt"),
                    to: location("a.txt"),
                },
                Lineage::Moved {
                    from: location("b.txt"),
                    to: location("c.txt"),
                },
            ],
        )
    }

    #[test]
    fn test_entry_lines() {
        let moved = &report().entries[1];
        let line = entry_line(moved);
        assert!(line.starts_with("moved"));
        assert!(line.contains("b.txt") && line.contains("-> c.txt"));
    }

    #[test]
    fn test_summary_line_skips_zero_counts() {
        assert_eq!(summary_line(&report().summary()), "1 unchanged, 1 moved");
    }

    #[test]
    fn test_json_filters_unchanged() {
        let changes = report_json(&report(), false).unwrap();
        assert_eq!(changes["entries"].as_array().map(Vec::len), Some(1));
        assert_eq!(changes["summary"]["unchanged"], 1);

        let all = report_json(&report(), true).unwrap();
        assert_eq!(all["entries"].as_array().map(Vec::len), Some(2));
        assert_eq!(all["entries"][0]["kind"], "unchanged");
    }
}
