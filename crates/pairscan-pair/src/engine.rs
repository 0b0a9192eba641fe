//! Pairing over a whole file map.
//!
//! Each directory is paired independently, so directories are spread over
//! the rayon pool. Results are merged back in the map's directory order,
//! which keeps output deterministic regardless of scheduling.

use std::collections::HashSet;
use std::path::PathBuf;

use rayon::prelude::*;
use tracing::debug;

use pairscan_core::{FileKind, FileMap, FilePair, MatchStrategy, ScanError};

use crate::config::PairingConfig;
use crate::strategy::{BestMatch, FirstMatch, PairBatch, PairingStrategy};

/// Pairs found across a whole file map.
#[derive(Debug, Default)]
pub struct PairingOutcome {
    pub pairs: Vec<FilePair>,
    /// Every path that ended up in a pair.
    pub processed: HashSet<PathBuf>,
    /// Pair constructions that failed.
    pub failures: u64,
}

impl PairingOutcome {
    fn absorb(&mut self, batch: PairBatch) {
        self.pairs.extend(batch.pairs);
        self.processed.extend(batch.processed);
        self.failures += batch.failures;
    }
}

/// Archive/preview pairing engine.
pub struct PairingEngine {
    config: PairingConfig,
    first_match: FirstMatch,
    best_match: BestMatch,
}

impl PairingEngine {
    /// Create an engine with default config.
    pub fn new() -> Self {
        Self::with_config(PairingConfig::default())
    }

    /// Create an engine with custom config.
    pub fn with_config(config: PairingConfig) -> Self {
        Self {
            first_match: FirstMatch::new(&config),
            best_match: BestMatch::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &PairingConfig {
        &self.config
    }

    /// The strategy implementation for a strategy kind.
    pub fn strategy(&self, kind: MatchStrategy) -> &dyn PairingStrategy {
        match kind {
            MatchStrategy::FirstMatch => &self.first_match,
            MatchStrategy::BestMatch => &self.best_match,
        }
    }

    /// Pair every directory of `file_map`.
    ///
    /// `interrupt` is polled once per directory.
    pub fn pair_file_map(
        &self,
        file_map: &FileMap,
        kind: MatchStrategy,
        interrupt: &(dyn Fn() -> bool + Sync),
    ) -> Result<PairingOutcome, ScanError> {
        let strategy = self.strategy(kind);
        let groups = file_map.directory_groups();

        let pair_group = |group: &pairscan_core::DirectoryGroup| -> Option<PairBatch> {
            if interrupt() {
                return None;
            }
            Some(strategy.create_pairs(&group.archives, &group.previews, &group.directory))
        };

        let batches: Vec<Option<PairBatch>> = if self.config.parallel {
            groups.par_iter().map(pair_group).collect()
        } else {
            groups.iter().map(pair_group).collect()
        };

        let mut outcome = PairingOutcome::default();
        for batch in batches {
            outcome.absorb(batch.ok_or(ScanError::Interrupted)?);
        }

        debug!(
            strategy = %kind,
            directories = groups.len(),
            pairs = outcome.pairs.len(),
            failures = outcome.failures,
            "Pairing finished"
        );
        Ok(outcome)
    }

    /// Everything in `file_map` not in `processed`, split into archives and
    /// previews and sorted by case-insensitive file name.
    pub fn identify_unpaired(
        file_map: &FileMap,
        processed: &HashSet<PathBuf>,
    ) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let mut archives = Vec::new();
        let mut previews = Vec::new();
        for file in file_map.files() {
            if processed.contains(&file.path) {
                continue;
            }
            match file.kind {
                FileKind::Archive => archives.push(file.path.clone()),
                FileKind::Preview => previews.push(file.path.clone()),
                FileKind::Ignored => {}
            }
        }
        sort_by_name(&mut archives);
        sort_by_name(&mut previews);
        (archives, previews)
    }
}

impl Default for PairingEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_by_name(paths: &mut [PathBuf]) {
    paths.sort_by_cached_key(|p| {
        let name = p
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        (name, p.clone())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn sample_map() -> FileMap {
        let mut map = FileMap::new();
        let lib = Path::new("/lib");
        map.insert(lib, lib.join("a.zip"), FileKind::Archive);
        map.insert(lib, lib.join("a.jpg"), FileKind::Preview);
        map.insert(lib, lib.join("b.rar"), FileKind::Archive);
        map.insert(lib, lib.join("c.png"), FileKind::Preview);
        map
    }

    fn engine() -> PairingEngine {
        PairingEngine::with_config(PairingConfig {
            verify_files: false,
            ..PairingConfig::default()
        })
    }

    #[test]
    fn test_library_scenario() {
        let map = sample_map();
        for kind in [MatchStrategy::FirstMatch, MatchStrategy::BestMatch] {
            let outcome = engine().pair_file_map(&map, kind, &|| false).unwrap();
            assert_eq!(outcome.pairs.len(), 1);
            assert_eq!(outcome.pairs[0].archive_path(), Path::new("/lib/a.zip"));
            assert_eq!(outcome.pairs[0].preview_path(), Path::new("/lib/a.jpg"));

            let (archives, previews) = PairingEngine::identify_unpaired(&map, &outcome.processed);
            assert_eq!(archives, vec![PathBuf::from("/lib/b.rar")]);
            assert_eq!(previews, vec![PathBuf::from("/lib/c.png")]);
        }
    }

    #[test]
    fn test_interrupt_aborts_pairing() {
        let result = engine().pair_file_map(&sample_map(), MatchStrategy::BestMatch, &|| true);
        assert!(matches!(result, Err(ScanError::Interrupted)));
    }

    #[test]
    fn test_unpaired_sorted_case_insensitively() {
        let mut map = FileMap::new();
        let lib = Path::new("/lib");
        for name in ["Zeta.zip", "alpha.zip", "Beta.zip"] {
            map.insert(lib, lib.join(name), FileKind::Archive);
        }
        let (archives, previews) = PairingEngine::identify_unpaired(&map, &HashSet::new());
        let names: Vec<_> = archives.iter().map(|p| p.file_name().unwrap().to_owned()).collect();
        assert_eq!(names, ["alpha.zip", "Beta.zip", "Zeta.zip"]);
        assert!(previews.is_empty());
    }
}
