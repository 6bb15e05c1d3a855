//! Behavioral properties of the lineage engine across whole trees

use chunkline_core::{
    Extraction, File, FileMeta, FingerprintConfig, MemoryStore, RawChunk, ScanConfig, Scanner, Symbol, Tree,
    TreeBuilder,
};
use chunkline_lineage::{Lineage, LineageEngine, LineageKind, LineageReport};
use std::sync::Arc;

fn tree(files: &[(&str, &str)]) -> Arc<Tree> {
    let files: Vec<(&str, FileMeta, &str)> = files.iter().map(|(p, c)| (*p, FileMeta::default(), *c)).collect();
    let report = Scanner::new(ScanConfig::default(), FingerprintConfig::default())
        .scan_files(&files, &MemoryStore::new())
        .unwrap();
    assert!(report.excluded.is_empty());
    Arc::new(report.tree)
}

fn diff(old: &Arc<Tree>, new: &Arc<Tree>) -> LineageReport {
    LineageEngine::default().diff_trees(Arc::clone(old), Arc::clone(new))
}

fn words(prefix: &str, count: usize) -> String {
    (0..count).map(|i| format!("{prefix}{i} ")).collect::<String>()
}

const MAIN: &str = "fn main() {\n    let config = load();\n    run(config);\n}\n\nfn load() -> Config {\n    Config::default()\n}\n\nfn run(config: Config) {\n    serve(config.port);\n}\n";

#[test]
fn test_diff_is_idempotent() {
    let old = tree(&[("src/main.rs", MAIN), ("README.md", "# demo\n")]);
    let new = tree(&[("src/app.rs", MAIN)]);
    assert_eq!(diff(&old, &new), diff(&old, &new));
}

#[test]
fn test_tree_digest_and_report_ignore_input_order() {
    let files = [("a.txt", "one\n\ntwo\n"), ("b/c.txt", "three\n"), ("d.txt", "four\n")];
    let mut reversed = files;
    reversed.reverse();

    let forward = tree(&files);
    let backward = tree(&reversed);
    assert_eq!(forward.digest(), backward.digest());

    let target = tree(&[("a.txt", "one\n"), ("e.txt", "three\n")]);
    assert_eq!(diff(&forward, &target).entries, diff(&backward, &target).entries);
}

#[test]
fn test_identical_trees_are_all_unchanged() {
    let snapshot = tree(&[("src/main.rs", MAIN), ("logo.bin", "\u{0}\u{1}\u{2}binary")]);
    let report = diff(&snapshot, &snapshot);

    assert!(report.is_unchanged());
    assert_eq!(report.summary().unchanged, snapshot.chunk_count());
    assert!(report.entries.iter().all(|e| e.kind() == LineageKind::Unchanged));
}

#[test]
fn test_move_is_symmetric() {
    let left = tree(&[("a.txt", "payload block\n"), ("keep.txt", "stays\n")]);
    let right = tree(&[("b.txt", "payload block\n"), ("keep.txt", "stays\n")]);

    let forward = diff(&left, &right);
    let backward = diff(&right, &left);

    let moved = forward.of_kind(LineageKind::Moved).next().unwrap();
    assert_eq!(moved.source().unwrap().path, "a.txt");
    assert_eq!(moved.targets()[0].path, "b.txt");

    let back = backward.of_kind(LineageKind::Moved).next().unwrap();
    assert_eq!(back.source().unwrap().path, "b.txt");
    assert_eq!(back.targets()[0].path, "a.txt");

    assert_eq!(forward.summary().moved, 1);
    assert_eq!(forward.summary().changes(), 1);
}

#[test]
fn test_duplicate_is_detected() {
    let old = tree(&[("lib.rs", MAIN)]);
    let new = tree(&[("lib.rs", MAIN), ("copy.rs", MAIN)]);
    let report = diff(&old, &new);

    let summary = report.summary();
    // Three blocks, each gained one copy
    assert_eq!(summary.duplicated, 3);
    assert_eq!(summary.added, 0);
    for entry in report.of_kind(LineageKind::Duplicated) {
        let paths: Vec<&str> = entry.targets().iter().map(|t| t.path.as_str()).collect();
        assert_eq!(paths, vec!["copy.rs", "lib.rs"]);
    }
}

#[test]
fn test_split_covers_the_original() {
    let left = words("left", 40);
    let right = words("right", 40);
    let old = tree(&[("big.txt", format!("{left}{right}\n").as_str())]);
    let new = tree(&[("part1.txt", format!("{left}\n").as_str()), ("part2.txt", format!("{right}\n").as_str())]);

    let report = diff(&old, &new);
    let entry = report.origin_of("big.txt", 0).unwrap();
    let Lineage::Split { to, coverage, .. } = entry else {
        panic!("expected split, got {entry:?}");
    };
    assert!(*coverage >= 0.9, "coverage {coverage}");
    let paths: Vec<&str> = to.iter().map(|t| t.path.as_str()).collect();
    assert_eq!(paths, vec!["part1.txt", "part2.txt"]);
    assert_eq!(report.summary().added, 0);
}

#[test]
fn test_small_edit_is_modified() {
    let body = words("token", 80);
    let edited = body.replace("token40 ", "renamed ");
    let old = tree(&[("notes.txt", format!("{body}\n").as_str())]);
    let new = tree(&[("moved/notes.txt", format!("{edited}\n").as_str())]);

    let report = diff(&old, &new);
    let entry = report.origin_of("notes.txt", 0).unwrap();
    let Lineage::Modified { to, score, .. } = entry else {
        panic!("expected modified, got {entry:?}");
    };
    assert_eq!(to.path, "moved/notes.txt");
    assert!(*score >= 0.85 && *score < 1.0);
}

#[test]
fn test_unrelated_content_is_removed_and_added() {
    let old = tree(&[("gone.txt", "the quick brown fox jumps over the lazy dog\n")]);
    let new = tree(&[("fresh.txt", "lorem ipsum dolor sit amet consectetur\n")]);

    let report = diff(&old, &new);
    let kinds: Vec<LineageKind> = report.entries.iter().map(Lineage::kind).collect();
    assert_eq!(kinds, vec![LineageKind::Removed, LineageKind::Added]);
}

#[test]
fn test_move_then_duplicate_scenario() {
    let content = "shared content block\n";
    let s1 = tree(&[("a.txt", content)]);
    let s2 = tree(&[("b.txt", content)]);
    let s3 = tree(&[("b.txt", content), ("c.txt", content)]);

    let first = diff(&s1, &s2);
    assert_eq!(first.entries.len(), 1);
    let Lineage::Moved { from, to } = &first.entries[0] else {
        panic!("expected move, got {:?}", first.entries[0]);
    };
    assert_eq!((from.path.as_str(), to.path.as_str()), ("a.txt", "b.txt"));

    let second = diff(&s2, &s3);
    assert_eq!(second.entries.len(), 1);
    let Lineage::Duplicated { from, to } = &second.entries[0] else {
        panic!("expected duplicate, got {:?}", second.entries[0]);
    };
    assert_eq!(from.path, "b.txt");
    let targets: Vec<&str> = to.iter().map(|t| t.path.as_str()).collect();
    assert_eq!(targets, vec!["b.txt", "c.txt"]);

    // Skipping the middle state resolves the same content in one step
    let overall = diff(&s1, &s3);
    let Lineage::Duplicated { from, to } = &overall.entries[0] else {
        panic!("expected duplicate, got {:?}", overall.entries[0]);
    };
    assert_eq!(from.path, "a.txt");
    assert_eq!(to.len(), 2);
}

#[test]
fn test_trace_follows_a_chunk() {
    let old = tree(&[("src/main.rs", MAIN)]);
    let new = tree(&[("src/app.rs", MAIN)]);
    let report = diff(&old, &new);

    // Offset inside `fn load`
    let offset = MAIN.find("Config::default").unwrap() as u64;
    let hits = report.trace("src/main.rs", offset);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].kind(), LineageKind::Moved);
    assert_eq!(hits[0].targets()[0].path, "src/app.rs");

    let back = report.trace("src/app.rs", offset);
    assert_eq!(back, hits);
}

const GREETER: &str = "class Greeter:\n    def hello(self):\n        return \"hello there\"\n    def bye(self):\n        return \"goodbye for now\"\n";

/// One file whose class chunk nests a chunk per method
fn nested_tree(path: &str) -> Arc<Tree> {
    let hello = GREETER.find("    def hello").unwrap() as u64;
    let bye = GREETER.find("    def bye").unwrap() as u64;
    let end = GREETER.len() as u64;
    let extraction = Extraction {
        chunks: vec![
            RawChunk::new(0, end).named("Greeter"),
            RawChunk::new(hello, bye).within(0).named("hello"),
            RawChunk::new(bye, end).within(0).named("bye"),
        ],
        symbols: vec![
            Symbol::root("Greeter"),
            Symbol::child("hello", "Greeter"),
            Symbol::child("bye", "Greeter"),
        ],
    };
    let (file, symbols) = File::build(
        path,
        FileMeta::default(),
        GREETER.as_bytes(),
        extraction,
        &FingerprintConfig::default(),
    )
    .unwrap();
    let mut builder = TreeBuilder::new();
    builder.add(file, symbols);
    let (tree, excluded) = builder.build();
    assert!(excluded.is_empty());
    Arc::new(tree)
}

#[test]
fn test_nested_chunks_move_with_their_parent() {
    let old = nested_tree("greeter.py");
    let new = nested_tree("pkg/greeter.py");
    assert_eq!(old.chunk_count(), 3);

    let report = diff(&old, &new);
    assert_eq!(report.entries.len(), 3);
    for entry in &report.entries {
        let Lineage::Moved { from, to } = entry else {
            panic!("expected move, got {entry:?}");
        };
        assert_eq!(from.path, "greeter.py");
        assert_eq!(to.path, "pkg/greeter.py");
        assert_eq!(from.index, to.index);
        assert_eq!(from.symbol, to.symbol);
        assert_eq!(from.range, to.range);
    }

    // An offset inside a method reaches both the method and its class
    let offset = GREETER.find("goodbye").unwrap() as u64;
    let symbols: Vec<Option<&str>> = report
        .trace("greeter.py", offset)
        .iter()
        .map(|e| e.source().and_then(|s| s.symbol.as_deref()))
        .collect();
    assert_eq!(symbols.len(), 2);
    assert!(symbols.contains(&Some("Greeter")) && symbols.contains(&Some("bye")));
}

#[test]
fn test_split_within_one_file() {
    let left = words("left", 40);
    let right = words("right", 40);
    let old = tree(&[("big.txt", format!("{left}{right}\n").as_str())]);
    let new = tree(&[("big.txt", format!("{left}\n\n{right}\n").as_str())]);
    assert_eq!(new.get("big.txt").unwrap().chunks.len(), 2);

    let report = diff(&old, &new);
    let entry = report.origin_of("big.txt", 0).unwrap();
    let Lineage::Split { to, coverage, .. } = entry else {
        panic!("expected split, got {entry:?}");
    };
    assert!(*coverage >= 0.9, "coverage {coverage}");
    let targets: Vec<(&str, usize)> = to.iter().map(|t| (t.path.as_str(), t.index)).collect();
    assert_eq!(targets, vec![("big.txt", 0), ("big.txt", 1)]);
    assert_eq!(report.summary().added, 0);
}
