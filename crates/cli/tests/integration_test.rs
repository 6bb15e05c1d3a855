//! Integration tests for the chl binary

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Helper to get the chl binary path
fn chl_bin() -> PathBuf {
    let mut path = std::env::current_exe().expect("Failed to get current exe");
    path.pop(); // Remove test binary name
    path.pop(); // Remove deps directory
    path.push("chl");
    path
}

fn run_chl(dir: &Path, args: &[&str]) -> Result<Output> {
    Ok(Command::new(chl_bin())
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()?)
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn initialized() -> Result<TempDir> {
    let temp = TempDir::new()?;
    let output = run_chl(temp.path(), &["init"])?;
    assert!(output.status.success(), "chl init failed: {:?}", output);
    Ok(temp)
}

#[test]
fn test_init_creates_store_layout() -> Result<()> {
    let temp = initialized()?;
    let root = temp.path();

    assert!(root.join(".chunkline/config.toml").exists());
    assert!(root.join(".chunkline/HEAD").exists());
    assert!(root.join(".chunkline/objects/blobs").is_dir());
    assert!(root.join(".chunkline/objects/trees").is_dir());
    assert!(root.join(".chunkline/graph").is_dir());

    // A second init is refused
    let again = run_chl(root, &["init"])?;
    assert!(!again.status.success());
    Ok(())
}

#[test]
fn test_commands_outside_repository_fail() -> Result<()> {
    let temp = TempDir::new()?;
    let output = run_chl(temp.path(), &["log"])?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Not a chunkline repository"));
    Ok(())
}

#[test]
fn test_record_and_log() -> Result<()> {
    let temp = initialized()?;
    let root = temp.path();

    let empty = run_chl(root, &["log"])?;
    assert!(stdout(&empty).contains("No snapshots yet"));

    fs::write(root.join("a.txt"), "first block\n\nsecond block\n")?;
    let output = run_chl(root, &["record", "--label", "baseline", "--task", "setup"])?;
    assert!(output.status.success(), "chl record failed: {:?}", output);
    let text = stdout(&output);
    assert!(text.contains("Recorded"));
    assert!(text.contains("1 files, 2 chunks"));

    let log = stdout(&run_chl(root, &["log"])?);
    assert!(log.contains("baseline"));
    assert!(log.contains("setup"));
    assert!(log.contains("(HEAD)"));

    let show = run_chl(root, &["show", "HEAD"])?;
    assert!(show.status.success());
    assert!(stdout(&show).contains("a.txt"));
    Ok(())
}

#[test]
fn test_diff_json_reports_move_and_duplicate() -> Result<()> {
    let temp = initialized()?;
    let root = temp.path();
    let content = "shared content block\n";

    fs::write(root.join("a.txt"), content)?;
    assert!(run_chl(root, &["record"])?.status.success());
    fs::rename(root.join("a.txt"), root.join("b.txt"))?;
    assert!(run_chl(root, &["record"])?.status.success());
    fs::write(root.join("c.txt"), content)?;
    assert!(run_chl(root, &["record"])?.status.success());

    let output = run_chl(root, &["diff", "HEAD~2", "HEAD~1", "--json"])?;
    assert!(output.status.success(), "chl diff failed: {:?}", output);
    let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["entries"][0]["kind"], "moved");
    assert_eq!(report["entries"][0]["to"]["path"], "b.txt");

    let output = run_chl(root, &["diff", "HEAD~1", "HEAD", "--json"])?;
    let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["entries"][0]["kind"], "duplicated");
    assert_eq!(report["entries"][0]["to"].as_array().map(Vec::len), Some(2));
    assert_eq!(report["summary"]["duplicated"], 1);
    Ok(())
}

#[test]
fn test_diff_against_working_tree() -> Result<()> {
    let temp = initialized()?;
    let root = temp.path();

    fs::write(root.join("a.txt"), "alpha\n")?;
    assert!(run_chl(root, &["record"])?.status.success());

    let clean = stdout(&run_chl(root, &["diff", "HEAD"])?);
    assert!(clean.contains("No changes"));

    fs::write(root.join("b.txt"), "beta\n")?;
    let output = run_chl(root, &["diff", "HEAD", "--json"])?;
    let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["summary"]["added"], 1);
    assert_eq!(report["entries"][0]["kind"], "added");
    Ok(())
}

#[test]
fn test_diff_text_lists_changes_and_summary() -> Result<()> {
    let temp = initialized()?;
    let root = temp.path();

    fs::write(root.join("a.txt"), "content that moves\n")?;
    fs::write(root.join("keep.txt"), "content that stays\n")?;
    assert!(run_chl(root, &["record"])?.status.success());
    fs::rename(root.join("a.txt"), root.join("b.txt"))?;
    fs::write(root.join("new.txt"), "brand new content\n")?;
    assert!(run_chl(root, &["record"])?.status.success());

    let output = run_chl(root, &["diff", "HEAD~1", "HEAD"])?;
    assert!(output.status.success(), "chl diff failed: {:?}", output);
    let text = stdout(&output);
    assert!(!text.contains("No changes"));

    let moved = text.lines().find(|l| l.contains("moved")).expect("no moved line");
    assert!(moved.contains("a.txt:") && moved.contains("-> b.txt:"));
    let added = text.lines().find(|l| l.contains("added")).expect("no added line");
    assert!(added.contains("new.txt:"));
    // Unchanged chunks only show up with --all
    assert!(!text.lines().any(|l| l.contains("keep.txt")));
    assert!(text.contains("1 unchanged, 1 moved, 1 added"));

    let all = stdout(&run_chl(root, &["diff", "HEAD~1", "HEAD", "--all"])?);
    assert!(all.lines().any(|l| l.contains("unchanged") && l.contains("keep.txt")));
    Ok(())
}

#[test]
fn test_trace_and_verify() -> Result<()> {
    let temp = initialized()?;
    let root = temp.path();

    fs::write(root.join("a.txt"), "traced content\n")?;
    assert!(run_chl(root, &["record"])?.status.success());
    fs::rename(root.join("a.txt"), root.join("moved.txt"))?;
    assert!(run_chl(root, &["record"])?.status.success());

    let trace = run_chl(root, &["trace", "HEAD~1", "HEAD", "a.txt", "--offset", "3"])?;
    assert!(trace.status.success());
    let text = stdout(&trace);
    assert!(text.contains("moved"));
    assert!(text.contains("moved.txt"));

    let verify = run_chl(root, &["verify"])?;
    assert!(verify.status.success(), "chl verify failed: {:?}", verify);
    assert!(stdout(&verify).contains("healthy"));
    Ok(())
}
