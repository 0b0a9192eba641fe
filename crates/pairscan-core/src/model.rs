//! Pairs, special folders and scan results.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{CircuitOpenReason, PairError};

/// Rough in-memory footprint, used for cache budgeting.
pub trait EstimateSize {
    /// Estimated heap plus inline size in bytes. Not exact.
    fn estimated_bytes(&self) -> usize;
}

impl<T: EstimateSize + ?Sized> EstimateSize for Arc<T> {
    fn estimated_bytes(&self) -> usize {
        (**self).estimated_bytes()
    }
}

fn path_bytes(path: &Path) -> usize {
    std::mem::size_of::<PathBuf>() + path.as_os_str().len()
}

/// How archives are matched to previews.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Identical base names only, in encounter order.
    FirstMatch,
    /// Trie-indexed fuzzy matching with scored tie-breaks.
    #[default]
    BestMatch,
}

/// An archive and the preview chosen for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePair {
    archive_path: PathBuf,
    preview_path: PathBuf,
    base_directory: PathBuf,
}

impl FilePair {
    /// Create a pair, checking both files exist.
    pub fn new(
        archive_path: impl Into<PathBuf>,
        preview_path: impl Into<PathBuf>,
        base_directory: impl Into<PathBuf>,
    ) -> Result<Self, PairError> {
        let pair = Self::unchecked(archive_path, preview_path, base_directory)?;
        for path in [&pair.archive_path, &pair.preview_path] {
            if !path.try_exists().unwrap_or(false) {
                return Err(PairError::MissingFile { path: path.clone() });
            }
        }
        Ok(pair)
    }

    /// Create a pair without touching the disk. Paths must still have file
    /// names.
    pub fn unchecked(
        archive_path: impl Into<PathBuf>,
        preview_path: impl Into<PathBuf>,
        base_directory: impl Into<PathBuf>,
    ) -> Result<Self, PairError> {
        let archive_path = archive_path.into();
        let preview_path = preview_path.into();
        for path in [&archive_path, &preview_path] {
            if path.file_name().is_none() {
                return Err(PairError::InvalidPath { path: path.clone() });
            }
        }
        Ok(Self {
            archive_path,
            preview_path,
            base_directory: base_directory.into(),
        })
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn preview_path(&self) -> &Path {
        &self.preview_path
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }
}

impl EstimateSize for FilePair {
    fn estimated_bytes(&self) -> usize {
        path_bytes(&self.archive_path)
            + path_bytes(&self.preview_path)
            + path_bytes(&self.base_directory)
    }
}

/// A folder flagged through sidecar metadata rather than by extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialFolder {
    pub name: String,
    pub path: PathBuf,
    pub is_virtual: bool,
}

impl SpecialFolder {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, is_virtual: bool) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            is_virtual,
        }
    }
}

/// Why a scan produced no (or only partial) results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScanFailure {
    /// Bad directory or parameters.
    Validation,
    /// Cancelled through the interrupt predicate.
    Interrupted,
    /// Aborted by the memory circuit breaker.
    MemoryCircuitOpen(CircuitOpenReason),
    /// Another scan of the same directory is running.
    Busy,
    /// The walk hit too many I/O errors.
    Io,
}

/// Counters collected during one scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Directories listed.
    pub dirs_visited: u64,
    /// Directories skipped by the pre-filter, depth limit, ignore list, loop
    /// guard or errors. A listed directory the pre-filter prunes counts as
    /// both visited and skipped.
    pub dirs_skipped: u64,
    /// Directory entries looked at.
    pub files_seen: u64,
    /// Archives and previews recorded.
    pub relevant_files: u64,
    /// Pairs that failed construction.
    pub pair_failures: u64,
    /// Non-fatal problems recorded.
    pub warnings: u64,
    /// Whether the result came from the cache.
    pub from_cache: bool,
    /// Wall time of the scan.
    pub duration: Duration,
}

/// Outcome of one scan.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanResult {
    /// Normalized directory that was scanned.
    pub directory: PathBuf,
    /// Strategy used for pairing.
    pub strategy: MatchStrategy,
    pub file_pairs: Vec<FilePair>,
    pub unpaired_archives: Vec<PathBuf>,
    pub unpaired_previews: Vec<PathBuf>,
    pub special_folders: Vec<SpecialFolder>,
    /// Human-readable error, if the scan failed.
    pub error: Option<String>,
    /// Machine-readable failure category matching `error`.
    pub failure: Option<ScanFailure>,
    /// Non-fatal problems encountered along the way.
    pub warnings: Vec<crate::error::ScanWarning>,
    pub stats: ScanStats,
}

impl ScanResult {
    /// Create an empty, successful result.
    pub fn new(directory: impl Into<PathBuf>, strategy: MatchStrategy) -> Self {
        Self {
            directory: directory.into(),
            strategy,
            ..Self::default()
        }
    }

    /// Create the error-with-empty-result form.
    pub fn failed(
        directory: impl Into<PathBuf>,
        strategy: MatchStrategy,
        failure: ScanFailure,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(message.into()),
            failure: Some(failure),
            ..Self::new(directory, strategy)
        }
    }

    /// Whether the scan completed without an error.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Number of relevant files accounted for by this result.
    pub fn total_files(&self) -> usize {
        self.file_pairs.len() * 2 + self.unpaired_archives.len() + self.unpaired_previews.len()
    }
}

impl EstimateSize for ScanResult {
    fn estimated_bytes(&self) -> usize {
        let pairs: usize = self.file_pairs.iter().map(EstimateSize::estimated_bytes).sum();
        let unpaired: usize = self
            .unpaired_archives
            .iter()
            .chain(&self.unpaired_previews)
            .map(|p| path_bytes(p))
            .sum();
        let folders: usize = self
            .special_folders
            .iter()
            .map(|f| std::mem::size_of::<SpecialFolder>() + f.name.len() + f.path.as_os_str().len())
            .sum();
        let warnings: usize = self
            .warnings
            .iter()
            .map(|w| path_bytes(&w.path) + w.message.len())
            .sum();
        std::mem::size_of::<Self>() + path_bytes(&self.directory) + pairs + unpaired + folders + warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(MatchStrategy::from_str("first_match").unwrap(), MatchStrategy::FirstMatch);
        assert_eq!(MatchStrategy::from_str("BEST_MATCH").unwrap(), MatchStrategy::BestMatch);
        assert_eq!(MatchStrategy::BestMatch.to_string(), "best_match");
    }

    #[test]
    fn test_unchecked_pair_rejects_bare_root() {
        let err = FilePair::unchecked("/", "/lib/a.jpg", "/lib").unwrap_err();
        assert!(matches!(err, PairError::InvalidPath { .. }));
    }

    #[test]
    fn test_checked_pair_requires_files() {
        let err = FilePair::new("/definitely/missing/a.zip", "/definitely/missing/a.jpg", "/")
            .unwrap_err();
        assert_eq!(
            err,
            PairError::MissingFile {
                path: PathBuf::from("/definitely/missing/a.zip")
            }
        );
    }

    #[test]
    fn test_failed_result() {
        let result = ScanResult::failed(
            "/nope",
            MatchStrategy::FirstMatch,
            ScanFailure::Validation,
            "Path not found",
        );
        assert!(!result.is_ok());
        assert_eq!(result.total_files(), 0);
        assert_eq!(result.failure, Some(ScanFailure::Validation));
    }
}
