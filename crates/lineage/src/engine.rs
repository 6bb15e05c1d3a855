//! Lineage classification between two indexed trees
//!
//! Two passes:
//! 1. Exact: chunks whose digest exists on both sides are resolved one
//!    digest group at a time (Unchanged, Moved, Duplicated, surplus Removed).
//! 2. Fuzzy: the remaining old chunks are classified in parallel against the
//!    new chunks no exact match claimed (Modified, Split, Removed).
//!
//! Every new chunk left unclaimed is Added.

use crate::config::LineageConfig;
use crate::index::{symbol_order, ChunkRef, NearMatch, Query, SimilarityIndex};
use crate::report::{ChunkLocation, Lineage, LineageReport};
use ahash::AHashSet;
use chunkline_core::{Chunk, Tree};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Classifies every chunk of two trees
#[derive(Debug, Clone, Default)]
pub struct LineageEngine {
    config: LineageConfig,
}

impl LineageEngine {
    pub fn new(config: LineageConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LineageConfig {
        &self.config
    }

    /// Index both trees, then diff them
    pub fn diff_trees(&self, old: Arc<Tree>, new: Arc<Tree>) -> LineageReport {
        let (old, new) = rayon::join(|| SimilarityIndex::build(old), || SimilarityIndex::build(new));
        self.diff(&old, &new)
    }

    /// Classify every chunk of `old` and `new`
    pub fn diff(&self, old: &SimilarityIndex, new: &SimilarityIndex) -> LineageReport {
        let started = Instant::now();
        let mut entries = Vec::new();
        let mut claimed: AHashSet<ChunkRef> = AHashSet::new();
        let mut pending = Vec::new();

        // Exact pass, one digest group at a time
        let mut resolved: AHashSet<&ChunkRef> = AHashSet::new();
        for old_ref in old.refs() {
            if resolved.contains(old_ref) {
                continue;
            }
            let Some(chunk) = old.chunk(old_ref) else {
                continue;
            };
            let targets = new.exact_lookup(&chunk.exact());
            if targets.is_empty() {
                pending.push(old_ref);
                continue;
            }
            let group = old.exact_lookup(&chunk.exact());
            resolved.extend(group.iter());
            claimed.extend(targets.iter().cloned());
            entries.extend(resolve_group(old, new, group, targets));
        }

        // Fuzzy pass against what the exact pass left over
        let fuzzy: Vec<Lineage> = pending
            .par_iter()
            .filter_map(|old_ref| {
                let chunk = old.chunk(old_ref)?;
                Some(self.classify(old_ref, chunk, new, &claimed))
            })
            .collect();
        for entry in &fuzzy {
            for target in entry.targets() {
                claimed.insert(ChunkRef::new(target.path.as_str(), target.index));
            }
        }
        entries.extend(fuzzy);

        for new_ref in new.refs() {
            if !claimed.contains(new_ref) {
                if let Some(to) = locate(new, new_ref) {
                    entries.push(Lineage::Added { to });
                }
            }
        }

        let report = LineageReport::new(old.tree().digest(), new.tree().digest(), entries);
        let summary = report.summary();
        tracing::info!(
            old = %report.old_tree.short(),
            new = %report.new_tree.short(),
            unchanged = summary.unchanged,
            moved = summary.moved,
            duplicated = summary.duplicated,
            modified = summary.modified,
            split = summary.split,
            removed = summary.removed,
            added = summary.added,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "diff complete"
        );
        report
    }

    /// Modified, Split or Removed for an old chunk with no exact match
    fn classify(
        &self,
        old_ref: &ChunkRef,
        chunk: &Chunk,
        new: &SimilarityIndex,
        claimed: &AHashSet<ChunkRef>,
    ) -> Lineage {
        let from = location_of(old_ref, chunk);
        let floor = self.config.split_floor.min(self.config.modified_threshold);
        let matches: Vec<NearMatch> = new
            .near_lookup(&Query::of(chunk), floor)
            .into_iter()
            .filter(|m| !claimed.contains(&m.chunk))
            .collect();

        if let Some(best) = matches.first() {
            if best.score >= self.config.modified_threshold {
                if let Some(to) = locate(new, &best.chunk) {
                    return Lineage::Modified {
                        from,
                        to,
                        score: best.score,
                    };
                }
            }
        }

        let fingerprint = &chunk.signature.fingerprint;
        let total = fingerprint.weight() as f64;
        if total > 0.0 {
            let mut remaining = fingerprint.clone();
            let mut coverage = 0.0;
            let mut targets = Vec::new();
            for candidate in matches
                .iter()
                .filter(|m| m.score >= self.config.split_floor)
                .take(self.config.split_candidates)
            {
                let Some(target) = new.chunk(&candidate.chunk) else {
                    continue;
                };
                let target_fp = &target.signature.fingerprint;
                let contribution = remaining.overlap(target_fp) as f64 / total;
                if contribution < self.config.min_contribution {
                    continue;
                }
                coverage += contribution;
                remaining = remaining.subtract(target_fp);
                targets.push(location_of(&candidate.chunk, target));
                if coverage >= self.config.split_threshold {
                    break;
                }
            }

            if coverage >= self.config.split_threshold && targets.len() >= 2 {
                targets.sort_by(|a, b| (&a.path, a.index).cmp(&(&b.path, b.index)));
                return Lineage::Split {
                    from,
                    to: targets,
                    coverage: coverage.min(1.0),
                };
            }
        }

        Lineage::Removed { from }
    }
}

/// Resolve one digest present on both sides
///
/// Same path and range pairs are Unchanged. Leftover old copies pair with
/// leftover new copies, preferring the same file, then the same symbol,
/// then reference order. Surplus new copies make the last paired old chunk
/// (or the first anchored one) Duplicated; surplus old copies are Removed.
fn resolve_group(
    old: &SimilarityIndex,
    new: &SimilarityIndex,
    group: &[ChunkRef],
    targets: &[ChunkRef],
) -> Vec<Lineage> {
    let olds: Vec<(&ChunkRef, &Chunk)> = group
        .iter()
        .filter_map(|r| old.chunk(r).map(|c| (r, c)))
        .collect();
    let mut news: Vec<(&ChunkRef, &Chunk)> = targets
        .iter()
        .filter_map(|r| new.chunk(r).map(|c| (r, c)))
        .collect();

    let mut anchored = Vec::new();
    let mut unpaired_old = Vec::new();
    for &(old_ref, old_chunk) in &olds {
        let same = news
            .iter()
            .position(|(r, c)| r.path == old_ref.path && c.range.same_span(&old_chunk.range));
        match same {
            Some(position) => anchored.push(((old_ref, old_chunk), news.remove(position))),
            None => unpaired_old.push((old_ref, old_chunk)),
        }
    }

    let mut entries: Vec<Lineage> = Vec::new();

    if unpaired_old.is_empty() {
        let mut anchored = anchored.into_iter();
        if let Some(((first_ref, first_chunk), (to_ref, to_chunk))) = anchored.next() {
            let from = location_of(first_ref, first_chunk);
            let to = location_of(to_ref, to_chunk);
            if news.is_empty() {
                entries.push(Lineage::Unchanged { from, to });
            } else {
                let mut copies = vec![to];
                copies.extend(news.iter().map(|(r, c)| location_of(r, c)));
                copies.sort_by(|a, b| (&a.path, a.index).cmp(&(&b.path, b.index)));
                entries.push(Lineage::Duplicated { from, to: copies });
            }
        }
        entries.extend(anchored.map(|((fr, fc), (tr, tc))| Lineage::Unchanged {
            from: location_of(fr, fc),
            to: location_of(tr, tc),
        }));
        return entries;
    }

    entries.extend(anchored.into_iter().map(|((fr, fc), (tr, tc))| Lineage::Unchanged {
        from: location_of(fr, fc),
        to: location_of(tr, tc),
    }));

    let mut paired: Vec<((&ChunkRef, &Chunk), (&ChunkRef, &Chunk))> = Vec::new();
    let mut removed = Vec::new();
    for (old_ref, old_chunk) in unpaired_old {
        let best = news
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| pairing_order(old_ref, old_chunk, a, b))
            .map(|(position, _)| position);
        match best {
            Some(position) => paired.push(((old_ref, old_chunk), news.remove(position))),
            None => removed.push(Lineage::Removed {
                from: location_of(old_ref, old_chunk),
            }),
        }
    }

    let last = paired.len().saturating_sub(1);
    for (i, ((fr, fc), (tr, tc))) in paired.into_iter().enumerate() {
        let from = location_of(fr, fc);
        let to = location_of(tr, tc);
        if i == last && !news.is_empty() {
            let mut copies = vec![to];
            copies.extend(news.iter().map(|(r, c)| location_of(r, c)));
            copies.sort_by(|a, b| (&a.path, a.index).cmp(&(&b.path, b.index)));
            entries.push(Lineage::Duplicated { from, to: copies });
        } else {
            entries.push(Lineage::Moved { from, to });
        }
    }
    entries.extend(removed);
    entries
}

fn pairing_order(
    old_ref: &ChunkRef,
    old_chunk: &Chunk,
    a: &(&ChunkRef, &Chunk),
    b: &(&ChunkRef, &Chunk),
) -> Ordering {
    let (a_ref, a_chunk) = *a;
    let (b_ref, b_chunk) = *b;
    let same_symbol = |c: &Chunk| c.symbol.is_some() && c.symbol == old_chunk.symbol;
    (a_ref.path != old_ref.path)
        .cmp(&(b_ref.path != old_ref.path))
        .then_with(|| (!same_symbol(a_chunk)).cmp(&!same_symbol(b_chunk)))
        .then_with(|| symbol_order(a_chunk.symbol.as_deref(), b_chunk.symbol.as_deref()))
        .then_with(|| a_ref.cmp(b_ref))
}

fn location_of(chunk_ref: &ChunkRef, chunk: &Chunk) -> ChunkLocation {
    ChunkLocation {
        path: chunk_ref.path.clone(),
        index: chunk_ref.index,
        range: chunk.range,
        symbol: chunk.symbol.clone(),
    }
}

fn locate(index: &SimilarityIndex, chunk_ref: &ChunkRef) -> Option<ChunkLocation> {
    index.chunk(chunk_ref).map(|chunk| location_of(chunk_ref, chunk))
}
