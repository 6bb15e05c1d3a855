//! Shared helpers for chl commands

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use chunkline_history::{find_root, Repository, SnapshotId};

/// Open the repository enclosing the current directory
pub fn open_repo() -> Result<Repository> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let root = find_root(&cwd)
        .with_context(|| format!("Not a chunkline repository: no .chunkline above {}", cwd.display()))?;
    tracing::debug!(root = %root.display(), "opening repository");
    Repository::open(&root).with_context(|| format!("Failed to open repository at {}", root.display()))
}

/// First 12 characters: the ULID timestamp plus two random characters
pub fn short_id(id: &SnapshotId) -> String {
    id.to_string()[..12].to_string()
}

fn recorded_at(ts_ms: u64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(i64::try_from(ts_ms).ok()?).single()
}

/// When a snapshot was recorded, in local time
pub fn snapshot_date(ts_ms: u64) -> String {
    match recorded_at(ts_ms) {
        Some(utc) => utc.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "unknown time".to_string(),
    }
}

/// Age of a snapshot relative to `now`, coarsest unit only
pub fn snapshot_age(ts_ms: u64, now: DateTime<Utc>) -> String {
    let Some(at) = recorded_at(ts_ms) else {
        return "unknown age".to_string();
    };
    let age = now.signed_duration_since(at);
    if age.num_seconds() < 0 {
        return "recorded in the future".to_string();
    }
    match (age.num_days(), age.num_hours(), age.num_minutes()) {
        (d, _, _) if d >= 14 => format!("{} weeks ago", d / 7),
        (d, _, _) if d >= 1 => format!("{d}d ago"),
        (_, h, _) if h >= 1 => format!("{h}h ago"),
        (_, _, m) if m >= 1 => format!("{m}m ago"),
        _ => "just now".to_string(),
    }
}

/// Byte counts as shown next to files and recorded scans
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
