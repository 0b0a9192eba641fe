//! Pairing strategies for the files of a single directory.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use compact_str::CompactString;
use tracing::{trace, warn};

use pairscan_core::{FilePair, PairError, base_name_key, normalize_extension};

use crate::config::PairingConfig;
use crate::trie::PrefixTrie;

/// Score for identical base names.
pub const EXACT_SCORE: i32 = 1000;
/// Score when one base name is a prefix of the other.
pub const PREFIX_SCORE: i32 = 500;
/// Score for any other candidate the index returned.
pub const FALLBACK_SCORE: i32 = 100;

/// Pairs produced for one directory.
#[derive(Debug, Default)]
pub struct PairBatch {
    /// Pairs in archive encounter order.
    pub pairs: Vec<FilePair>,
    /// Every archive and preview that ended up in a pair.
    pub processed: HashSet<PathBuf>,
    /// Pair constructions that failed.
    pub failures: u64,
}

/// A way of matching archives to previews inside one directory.
pub trait PairingStrategy: Send + Sync {
    /// Pair `archives` with `previews`, both found in `base_dir`.
    fn create_pairs(&self, archives: &[PathBuf], previews: &[PathBuf], base_dir: &Path)
    -> PairBatch;
}

/// Builds pairs, with or without checking the files exist.
#[derive(Debug, Clone, Copy)]
struct PairFactory {
    verify_files: bool,
}

impl PairFactory {
    fn build(&self, archive: &Path, preview: &Path, base_dir: &Path) -> Result<FilePair, PairError> {
        if self.verify_files {
            FilePair::new(archive, preview, base_dir)
        } else {
            FilePair::unchecked(archive, preview, base_dir)
        }
    }
}

impl PairBatch {
    /// Try to record a pair; returns false when construction failed.
    fn push(&mut self, factory: PairFactory, archive: &Path, preview: &Path, base_dir: &Path) -> bool {
        match factory.build(archive, preview, base_dir) {
            Ok(pair) => {
                self.processed.insert(archive.to_path_buf());
                self.processed.insert(preview.to_path_buf());
                self.pairs.push(pair);
                true
            }
            Err(err) => {
                warn!(archive = %archive.display(), preview = %preview.display(), "Skipping pair: {err}");
                self.failures += 1;
                false
            }
        }
    }
}

/// Pairs files with identical base names in encounter order.
///
/// The first archive of a name takes the first preview of that name, the
/// second takes the second, and so on.
#[derive(Debug, Clone)]
pub struct FirstMatch {
    factory: PairFactory,
}

impl FirstMatch {
    pub fn new(config: &PairingConfig) -> Self {
        Self {
            factory: PairFactory {
                verify_files: config.verify_files,
            },
        }
    }
}

impl PairingStrategy for FirstMatch {
    fn create_pairs(&self, archives: &[PathBuf], previews: &[PathBuf], base_dir: &Path) -> PairBatch {
        let mut batch = PairBatch::default();
        if archives.is_empty() || previews.is_empty() {
            return batch;
        }

        let mut by_name: HashMap<CompactString, VecDeque<&PathBuf>> = HashMap::new();
        for preview in previews {
            if let Some(key) = base_name_key(preview) {
                by_name.entry(key).or_default().push_back(preview);
            }
        }

        for archive in archives {
            let Some(key) = base_name_key(archive) else {
                continue;
            };
            let Some(queue) = by_name.get_mut(&key) else {
                continue;
            };
            let Some(preview) = queue.pop_front() else {
                continue;
            };
            if !batch.push(self.factory, archive, preview, base_dir) {
                // The preview is still free for the next archive of this name.
                queue.push_front(preview);
            }
        }
        batch
    }
}

/// How a candidate preview relates to the archive name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchKind {
    Exact,
    Prefix,
    Fallback,
}

impl MatchKind {
    fn score(self) -> i32 {
        match self {
            MatchKind::Exact => EXACT_SCORE,
            MatchKind::Prefix => PREFIX_SCORE,
            MatchKind::Fallback => FALLBACK_SCORE,
        }
    }
}

/// Reduce a name to its lowercase alphanumeric characters.
fn loose_key(name: &str) -> String {
    name.chars().filter(|c| c.is_alphanumeric()).flat_map(char::to_lowercase).collect()
}

/// Trie-indexed fuzzy matching.
///
/// Candidates are exact name matches, then names where one is a prefix of
/// the other, then names equal after dropping punctuation. The highest
/// score wins; ties go to the preview seen first.
#[derive(Debug, Clone)]
pub struct BestMatch {
    factory: PairFactory,
    candidate_limit: usize,
    preference: HashMap<String, i32>,
}

impl BestMatch {
    pub fn new(config: &PairingConfig) -> Self {
        Self {
            factory: PairFactory {
                verify_files: config.verify_files,
            },
            candidate_limit: config.candidate_limit.max(1),
            preference: config
                .extension_preference
                .iter()
                .map(|(ext, bonus)| (normalize_extension(ext), *bonus))
                .collect(),
        }
    }

    /// Bonus for a preview's format.
    pub fn extension_bonus(&self, preview: &Path) -> i32 {
        preview
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.preference.get(&e.to_lowercase()))
            .copied()
            .unwrap_or(0)
    }

    fn candidates(
        &self,
        stem: &str,
        trie: &PrefixTrie,
        loose: &HashMap<String, Vec<usize>>,
        consumed: &[bool],
    ) -> Vec<(usize, MatchKind)> {
        let limit = self.candidate_limit;
        let free = |i: usize| !consumed[i];
        let mut found: Vec<(usize, MatchKind)> = trie
            .exact(stem)
            .iter()
            .copied()
            .filter(|&i| free(i))
            .take(limit)
            .map(|i| (i, MatchKind::Exact))
            .collect();

        let mut prefixed = Vec::new();
        let remaining = limit.saturating_sub(found.len());
        trie.extensions_of(stem, remaining, free, &mut prefixed);
        let remaining = remaining.saturating_sub(prefixed.len());
        let mut shorter = Vec::new();
        trie.prefixes_of(stem, remaining, free, &mut shorter);
        found.extend(prefixed.into_iter().chain(shorter).map(|i| (i, MatchKind::Prefix)));

        if found.is_empty() {
            if let Some(indices) = loose.get(&loose_key(stem)) {
                found.extend(
                    indices
                        .iter()
                        .copied()
                        .filter(|&i| free(i))
                        .take(limit)
                        .map(|i| (i, MatchKind::Fallback)),
                );
            }
        }
        found
    }
}

impl PairingStrategy for BestMatch {
    fn create_pairs(&self, archives: &[PathBuf], previews: &[PathBuf], base_dir: &Path) -> PairBatch {
        let mut batch = PairBatch::default();
        if archives.is_empty() || previews.is_empty() {
            return batch;
        }

        let stems: Vec<Option<CompactString>> = previews.iter().map(|p| base_name_key(p)).collect();
        let trie = PrefixTrie::from_keys(
            stems
                .iter()
                .enumerate()
                .filter_map(|(i, stem)| stem.as_deref().map(|s| (s, i))),
        );
        let mut loose: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, stem) in stems.iter().enumerate() {
            if let Some(stem) = stem {
                loose.entry(loose_key(stem)).or_default().push(i);
            }
        }
        let mut consumed = vec![false; previews.len()];

        for archive in archives {
            let Some(stem) = base_name_key(archive) else {
                continue;
            };

            let best = self
                .candidates(&stem, &trie, &loose, &consumed)
                .into_iter()
                .map(|(i, kind)| (i, kind.score() + self.extension_bonus(&previews[i])))
                // Highest score, then earliest preview.
                .max_by(|(ia, sa), (ib, sb)| sa.cmp(sb).then(ib.cmp(ia)));

            let Some((index, score)) = best else {
                trace!(archive = %archive.display(), "No preview candidates");
                continue;
            };
            if score <= 0 {
                continue;
            }
            if batch.push(self.factory, archive, &previews[index], base_dir) {
                consumed[index] = true;
            }
        }
        batch
    }
}
