//! Structural fingerprints: order-tolerant multisets of rolling sub-hashes
//!
//! Text is tokenized (identifier runs and single punctuation characters,
//! whitespace dropped) and every window of `shingle_tokens` consecutive
//! tokens contributes one feature. Binary content contributes rolling hashes
//! over `binary_window`-byte windows, sampled by content so that an insertion
//! only perturbs the features around it.

use ahash::{AHashMap, RandomState};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::hash::BuildHasher;
use std::sync::LazyLock;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_]+|[^\sA-Za-z0-9_]").unwrap());

/// Fixed seeds keep feature hashes stable for the lifetime of a build
static TOKEN_HASHER: LazyLock<RandomState> = LazyLock::new(|| {
    RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
});

const ROLL_BASE: u64 = 0x0000_0100_0000_01b3;
const BINARY_SAMPLE_MASK: u64 = 0b111;

/// Fingerprinting parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Tokens per text shingle
    pub shingle_tokens: usize,
    /// Bytes per binary window
    pub binary_window: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            shingle_tokens: 3,
            binary_window: 16,
        }
    }
}

/// Multiset of feature hashes, sorted by hash
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprint {
    features: Vec<(u64, u32)>,
    weight: u64,
}

impl Fingerprint {
    /// Fingerprint content; `is_text` selects token or byte shingling
    pub fn compute(content: &[u8], is_text: bool, config: &FingerprintConfig) -> Self {
        let hashes = match std::str::from_utf8(content) {
            Ok(text) if is_text => text_features(text, config.shingle_tokens.max(1)),
            _ => binary_features(content, config.binary_window.max(1)),
        };
        Self::from_hashes(hashes)
    }

    pub fn from_hashes(hashes: impl IntoIterator<Item = u64>) -> Self {
        let mut counts: AHashMap<u64, u32> = AHashMap::new();
        for hash in hashes {
            *counts.entry(hash).or_insert(0) += 1;
        }
        let mut features: Vec<(u64, u32)> = counts.into_iter().collect();
        features.sort_unstable_by_key(|&(hash, _)| hash);
        let weight = features.iter().map(|&(_, count)| count as u64).sum();
        Self { features, weight }
    }

    /// Total multiplicity
    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn is_empty(&self) -> bool {
        self.weight == 0
    }

    /// Distinct feature hashes
    pub fn features(&self) -> impl Iterator<Item = u64> + '_ {
        self.features.iter().map(|&(hash, _)| hash)
    }

    /// Multiset intersection weight (sum of min counts)
    pub fn overlap(&self, other: &Fingerprint) -> u64 {
        let (mut i, mut j) = (0, 0);
        let mut shared = 0u64;
        while i < self.features.len() && j < other.features.len() {
            let (a, ca) = self.features[i];
            let (b, cb) = other.features[j];
            match a.cmp(&b) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    shared += ca.min(cb) as u64;
                    i += 1;
                    j += 1;
                }
            }
        }
        shared
    }

    /// Weighted Jaccard similarity in [0, 1]
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        if self.is_empty() && other.is_empty() {
            return 1.0;
        }
        let shared = self.overlap(other);
        let union = self.weight + other.weight - shared;
        if union == 0 {
            0.0
        } else {
            shared as f64 / union as f64
        }
    }

    /// Fraction of this multiset covered by `other`
    pub fn containment_in(&self, other: &Fingerprint) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.overlap(other) as f64 / self.weight as f64
    }

    /// Remove `other`'s features from this multiset (saturating)
    pub fn subtract(&self, other: &Fingerprint) -> Fingerprint {
        let mut features = Vec::with_capacity(self.features.len());
        let mut j = 0;
        for &(hash, count) in &self.features {
            while j < other.features.len() && other.features[j].0 < hash {
                j += 1;
            }
            let removed = match other.features.get(j) {
                Some(&(h, c)) if h == hash => c,
                _ => 0,
            };
            if count > removed {
                features.push((hash, count - removed));
            }
        }
        let weight = features.iter().map(|&(_, count)| count as u64).sum();
        Fingerprint { features, weight }
    }
}

fn text_features(text: &str, shingle: usize) -> Vec<u64> {
    let tokens: Vec<u64> = TOKEN_RE
        .find_iter(text)
        .map(|m| TOKEN_HASHER.hash_one(m.as_str()))
        .collect();

    if tokens.is_empty() {
        return Vec::new();
    }
    let window = shingle.min(tokens.len());
    rolling(&tokens, window)
}

fn binary_features(content: &[u8], window: usize) -> Vec<u64> {
    if content.is_empty() {
        return Vec::new();
    }
    let bytes: Vec<u64> = content.iter().map(|&b| b as u64 + 1).collect();
    let all = rolling(&bytes, window.min(bytes.len()));
    let sampled: Vec<u64> = all
        .iter()
        .copied()
        .filter(|h| h & BINARY_SAMPLE_MASK == 0)
        .collect();
    if sampled.is_empty() {
        all
    } else {
        sampled
    }
}

/// Polynomial rolling hash over every `window`-long run of `values`
fn rolling(values: &[u64], window: usize) -> Vec<u64> {
    let mut out = Vec::with_capacity(values.len() + 1 - window);
    let top = (1..window).fold(1u64, |acc, _| acc.wrapping_mul(ROLL_BASE));

    let mut hash = values[..window]
        .iter()
        .fold(0u64, |acc, &v| acc.wrapping_mul(ROLL_BASE).wrapping_add(v));
    out.push(hash);

    for i in window..values.len() {
        hash = hash
            .wrapping_sub(values[i - window].wrapping_mul(top))
            .wrapping_mul(ROLL_BASE)
            .wrapping_add(values[i]);
        out.push(hash);
    }
    out
}
