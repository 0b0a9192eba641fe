//! Directory tracking for loop protection.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

/// Share of entries kept when the set overflows.
const KEEP_NUMERATOR: usize = 3;
const KEEP_DENOMINATOR: usize = 5;

#[derive(Debug, Clone, Copy)]
struct Visit {
    last_touch: u64,
    hits: u64,
}

/// Bounded set of visited directories.
///
/// Guarantees a walk terminates even through symlink loops. When the set
/// is full, the 60% most recently or frequently touched entries survive;
/// a forgotten directory may be listed twice, but never forever, since
/// each revisit re-enters it.
#[derive(Debug)]
pub struct VisitedSet {
    seen: DashMap<PathBuf, Visit>,
    max_entries: usize,
    clock: AtomicU64,
}

impl VisitedSet {
    /// Create a set holding at most `max_entries` directories.
    pub fn new(max_entries: usize) -> Self {
        Self {
            seen: DashMap::new(),
            max_entries: max_entries.max(1),
            clock: AtomicU64::new(0),
        }
    }

    /// Canonicalize `dir` and record it. Returns `true` if it was already
    /// visited and should be skipped.
    pub fn try_enter(&self, dir: &Path) -> bool {
        let canonical = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        self.try_enter_canonical(canonical)
    }

    /// Record an already canonical path. Returns `true` if it was already
    /// visited.
    pub fn try_enter_canonical(&self, dir: PathBuf) -> bool {
        if self.seen.len() >= self.max_entries && !self.seen.contains_key(&dir) {
            self.cleanup();
        }

        let now = self.clock.fetch_add(1, Ordering::Relaxed);
        match self.seen.entry(dir) {
            Entry::Occupied(mut entry) => {
                let visit = entry.get_mut();
                visit.hits += 1;
                visit.last_touch = now;
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(Visit {
                    last_touch: now,
                    hits: 0,
                });
                false
            }
        }
    }

    /// Check if a directory has been recorded (without recording it).
    pub fn contains(&self, dir: &Path) -> bool {
        self.seen.contains_key(dir)
    }

    /// Number of remembered directories.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Check if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.seen.clear();
    }

    /// Drop the lowest-scoring 40% of entries in one linear pass.
    fn cleanup(&self) {
        // Each revisit counts like a small amount of recency.
        let hit_weight = (self.max_entries / 10).max(1) as u64;
        let score = |v: &Visit| v.last_touch.saturating_add(v.hits.saturating_mul(hit_weight));

        let mut scores: Vec<u64> = self.seen.iter().map(|e| score(e.value())).collect();
        let keep = scores.len() * KEEP_NUMERATOR / KEEP_DENOMINATOR;
        if keep >= scores.len() {
            return;
        }
        let cut = scores.len() - keep;
        let (_, threshold, _) = scores.select_nth_unstable(cut);
        let threshold = *threshold;

        let before = self.seen.len();
        self.seen.retain(|_, v| score(v) >= threshold);
        debug!(before, after = self.seen.len(), "Visited set trimmed");
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::new(10_000)
    }
}
