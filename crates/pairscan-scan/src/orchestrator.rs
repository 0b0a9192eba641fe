//! The scan entry point: validate, walk, pair, cache, report.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashSet;
use derive_builder::Builder;
use tracing::{debug, info, warn};

use pairscan_core::{
    MatchStrategy, ScanConfig, ScanError, ScanFailure, ScanResult, ScanWarning, WarningKind,
    normalize_directory,
};
use pairscan_pair::{PairingConfig, PairingEngine};

use crate::cache::ScanCache;
use crate::governor::{GovernorHandle, PressureLevel};
use crate::metadata::{MetadataProvider, NoMetadata};
use crate::progress::{ProgressConfig, ProgressReporter, ProgressSink};
use crate::visited::VisitedSet;
use crate::walker::{DirectoryWalker, WalkContext};

/// Parameters of one scan.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct ScanRequest {
    /// Directory to scan.
    pub directory: PathBuf,
    /// Depth limit; falls back to the orchestrator's configured default.
    #[builder(default)]
    pub max_depth: Option<u32>,
    #[builder(default)]
    pub strategy: MatchStrategy,
    /// Consult and fill the cache.
    #[builder(default = "true")]
    pub use_cache: bool,
    /// Ignore cached entries and walk again; fresh results are still stored.
    #[builder(default)]
    pub force_refresh: bool,
}

impl ScanRequest {
    /// Request with defaults for `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            max_depth: None,
            strategy: MatchStrategy::default(),
            use_cache: true,
            force_refresh: false,
        }
    }

    pub fn builder() -> ScanRequestBuilder {
        ScanRequestBuilder::default()
    }
}

/// Removes a directory from the in-flight set when the scan ends.
struct InFlightGuard<'a> {
    set: &'a DashSet<PathBuf>,
    directory: PathBuf,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.directory);
    }
}

/// Composes walking, pairing, caching and progress into a single call.
///
/// Scans of different directories may run concurrently on one instance; a
/// second scan of a directory that is already being scanned is refused.
pub struct ScanOrchestrator {
    walker: DirectoryWalker,
    engine: PairingEngine,
    cache: Arc<ScanCache>,
    metadata: Arc<dyn MetadataProvider>,
    progress: ProgressConfig,
    governor: Option<GovernorHandle>,
    in_flight: DashSet<PathBuf>,
}

impl ScanOrchestrator {
    /// Create an orchestrator with default pairing, an own cache and no
    /// metadata source.
    pub fn new(config: ScanConfig) -> Result<Self, ScanError> {
        config
            .validate()
            .map_err(|message| ScanError::InvalidConfig { message })?;
        Ok(Self {
            walker: DirectoryWalker::new(config),
            engine: PairingEngine::new(),
            cache: Arc::new(ScanCache::default()),
            metadata: Arc::new(NoMetadata),
            progress: ProgressConfig::default(),
            governor: None,
            in_flight: DashSet::new(),
        })
    }

    pub fn with_pairing(mut self, config: PairingConfig) -> Self {
        self.engine = PairingEngine::with_config(config);
        self
    }

    /// Share a cache with other orchestrators.
    pub fn with_cache(mut self, cache: Arc<ScanCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataProvider>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_progress_config(mut self, config: ProgressConfig) -> Self {
        self.progress = config;
        self
    }

    /// Abort scans when this governor's circuit opens.
    pub fn with_governor(mut self, governor: GovernorHandle) -> Self {
        self.governor = Some(governor);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        self.walker.config()
    }

    pub fn cache(&self) -> &Arc<ScanCache> {
        &self.cache
    }

    pub fn engine(&self) -> &PairingEngine {
        &self.engine
    }

    /// Run one scan. Always returns a result; failures are reported through
    /// [`ScanResult::error`] and [`ScanResult::failure`].
    ///
    /// Progress stages: walk 0-50%, pairing 50-70%, unpaired 70-85%,
    /// special folders 85-95%, done 100%.
    pub fn scan(
        &self,
        request: &ScanRequest,
        interrupt: &(dyn Fn() -> bool + Sync),
        sink: Arc<dyn ProgressSink>,
    ) -> ScanResult {
        let started = Instant::now();
        let reporter = ProgressReporter::new(sink, self.progress.clone());
        reporter.report(0, "Starting scan", true);

        let strategy = request.strategy;
        let directory = match validate_directory(&request.directory) {
            Ok(directory) => directory,
            Err(err) => {
                debug!(path = %request.directory.display(), error = %err, "Rejected scan request");
                reporter.report(100, "Invalid directory", true);
                return ScanResult::failed(
                    &request.directory,
                    strategy,
                    ScanFailure::Validation,
                    err.to_string(),
                );
            }
        };

        if !self.in_flight.insert(directory.clone()) {
            let err = ScanError::AlreadyScanning { path: directory.clone() };
            reporter.report(100, "Scan already running", true);
            return ScanResult::failed(directory, strategy, ScanFailure::Busy, err.to_string());
        }
        let _guard = InFlightGuard {
            set: &self.in_flight,
            directory: directory.clone(),
        };

        let mut result = match self.run(&directory, request, interrupt, &reporter) {
            Ok(result) => result,
            Err(err) => {
                let failure = self.failure_for(&err);
                info!(path = %directory.display(), error = %err, "Scan failed");
                reporter.report(100, "Scan stopped", true);
                return ScanResult::failed(directory, strategy, failure, err.to_string());
            }
        };
        result.stats.duration = started.elapsed();

        if result.stats.from_cache {
            reporter.report(100, "Loaded from cache", true);
        } else {
            reporter.report(100, "Scan complete", true);
        }
        result
    }

    fn run(
        &self,
        directory: &Path,
        request: &ScanRequest,
        interrupt: &(dyn Fn() -> bool + Sync),
        reporter: &ProgressReporter,
    ) -> Result<ScanResult, ScanError> {
        let strategy = request.strategy;
        let use_cached = request.use_cache && !request.force_refresh;
        let max_depth = request.max_depth.or(self.config().max_depth);

        if use_cached {
            if let Some(cached) = self.cache.get_result(directory, strategy, max_depth) {
                debug!(path = %directory.display(), %strategy, "Result cache hit");
                let mut result = ScanResult::clone(&cached);
                result.stats.from_cache = true;
                return Ok(result);
            }
        }

        let walk_stage = reporter.stage(0, 50);
        walk_stage.begin("Scanning directory");
        let cached_walk = if use_cached {
            self.cache.get_walk(directory, max_depth)
        } else {
            None
        };
        let walk = match cached_walk {
            Some(walk) => {
                debug!(path = %directory.display(), "Walk cache hit");
                walk
            }
            None => {
                let visited = VisitedSet::new(self.config().max_visited);
                let mut ctx = WalkContext::new(interrupt, &visited).with_progress(walk_stage);
                if let Some(governor) = &self.governor {
                    ctx = ctx.with_governor(governor);
                }
                let walk = Arc::new(self.walker.walk(directory, max_depth, ctx)?);
                if request.use_cache {
                    self.cache.store_walk(directory, max_depth, Arc::clone(&walk));
                }
                walk
            }
        };
        let file_map = &walk.file_map;
        let mut stats = walk.stats.clone();
        let mut warnings = walk.warnings.clone();
        walk_stage.finish("Directory scanned");

        let pair_stage = reporter.stage(50, 70);
        pair_stage.begin("Pairing files");
        let governor = self.governor.as_ref();
        let stop = || interrupt() || governor.is_some_and(GovernorHandle::is_open);
        let outcome = self.engine.pair_file_map(file_map, strategy, &stop)?;
        pair_stage.finish("Files paired");

        let unpaired_stage = reporter.stage(70, 85);
        unpaired_stage.begin("Collecting unpaired files");
        let (unpaired_archives, unpaired_previews) =
            PairingEngine::identify_unpaired(file_map, &outcome.processed);
        unpaired_stage.finish("Unpaired files collected");

        let folder_stage = reporter.stage(85, 95);
        folder_stage.begin("Resolving special folders");
        let special_folders = match self.metadata.get_special_folders(directory) {
            Ok(folders) => folders,
            Err(err) => {
                warn!(path = %directory.display(), error = %err, "Special folder lookup failed");
                warnings.push(ScanWarning::new(directory, err.to_string(), WarningKind::MetadataError));
                Vec::new()
            }
        };
        folder_stage.finish("Special folders resolved");

        stats.pair_failures = outcome.failures;
        stats.warnings = warnings.len() as u64;
        let result = ScanResult {
            file_pairs: outcome.pairs,
            unpaired_archives,
            unpaired_previews,
            special_folders,
            warnings,
            stats,
            ..ScanResult::new(directory, strategy)
        };

        if request.use_cache {
            self.cache
                .store_result(directory, strategy, max_depth, Arc::new(result.clone()));
            if self
                .governor
                .as_ref()
                .and_then(GovernorHandle::level)
                .is_some_and(|level| level >= PressureLevel::Critical)
            {
                let evicted = self.cache.shed_load();
                debug!(evicted, "Cache shed under memory pressure");
            }
        }
        Ok(result)
    }

    /// Map an aborting error to its failure category. Interrupts caused by
    /// an open circuit are reported as memory aborts.
    fn failure_for(&self, err: &ScanError) -> ScanFailure {
        match err {
            ScanError::Interrupted => match self.governor.as_ref().and_then(GovernorHandle::reason) {
                Some(reason) => ScanFailure::MemoryCircuitOpen(reason),
                None => ScanFailure::Interrupted,
            },
            ScanError::MemoryCircuitOpen { reason } => ScanFailure::MemoryCircuitOpen(*reason),
            ScanError::AlreadyScanning { .. } => ScanFailure::Busy,
            ScanError::InvalidConfig { .. } | ScanError::NotADirectory { .. } => {
                ScanFailure::Validation
            }
            ScanError::PermissionDenied { .. }
            | ScanError::NotFound { .. }
            | ScanError::Io { .. }
            | ScanError::TooManyErrors { .. } => ScanFailure::Io,
        }
    }
}

/// Check that `path` is an existing directory and normalize it.
fn validate_directory(path: &Path) -> Result<PathBuf, ScanError> {
    if path.as_os_str().is_empty() {
        return Err(ScanError::InvalidConfig {
            message: "Directory path is empty".to_string(),
        });
    }
    let metadata = std::fs::metadata(path).map_err(|e| ScanError::io(path, e))?;
    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory {
            path: path.to_path_buf(),
        });
    }
    Ok(normalize_directory(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullSink;
    use std::fs::File;
    use tempfile::TempDir;

    fn orchestrator() -> ScanOrchestrator {
        ScanOrchestrator::new(ScanConfig::default()).unwrap()
    }

    fn scan(orch: &ScanOrchestrator, request: &ScanRequest) -> ScanResult {
        orch.scan(request, &|| false, Arc::new(NullSink))
    }

    #[test]
    fn test_missing_directory_fails_validation() {
        let result = scan(&orchestrator(), &ScanRequest::new("/definitely/not/here"));
        assert_eq!(result.failure, Some(ScanFailure::Validation));
        assert!(result.error.unwrap().contains("not found"));
        assert!(result.file_pairs.is_empty());
    }

    #[test]
    fn test_file_is_not_a_directory() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.zip");
        File::create(&file).unwrap();
        let result = scan(&orchestrator(), &ScanRequest::new(&file));
        assert_eq!(result.failure, Some(ScanFailure::Validation));
    }

    #[test]
    fn test_second_scan_hits_cache() {
        let temp = TempDir::new().unwrap();
        File::create(temp.path().join("a.zip")).unwrap();
        File::create(temp.path().join("a.jpg")).unwrap();

        let orch = orchestrator();
        let request = ScanRequest::new(temp.path());
        let first = scan(&orch, &request);
        assert!(first.is_ok());
        assert!(!first.stats.from_cache);

        let second = scan(&orch, &request);
        assert!(second.stats.from_cache);
        assert_eq!(second.file_pairs, first.file_pairs);

        let refreshed = scan(
            &orch,
            &ScanRequest::builder()
                .directory(temp.path())
                .force_refresh(true)
                .build()
                .unwrap(),
        );
        assert!(!refreshed.stats.from_cache);
    }

    #[test]
    fn test_busy_directory_is_refused() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator();
        orch.in_flight.insert(normalize_directory(temp.path()));

        let result = scan(&orch, &ScanRequest::new(temp.path()));
        assert_eq!(result.failure, Some(ScanFailure::Busy));
    }

    #[test]
    fn test_open_circuit_aborts_scan() {
        use crate::governor::{GovernorConfig, ResourceGovernor};

        let temp = TempDir::new().unwrap();
        let mut governor = ResourceGovernor::new(GovernorConfig::with_limit(100.0));
        let handle = GovernorHandle::new();
        handle.apply(&governor.observe(Some(500.0)));
        handle.apply(&governor.observe(Some(500.0)));
        assert!(handle.is_open());

        let orch = orchestrator().with_governor(handle);
        let result = scan(&orch, &ScanRequest::new(temp.path()));
        assert!(matches!(result.failure, Some(ScanFailure::MemoryCircuitOpen(_))));
    }

    #[test]
    fn test_reused_walk_keeps_its_stats() {
        let temp = TempDir::new().unwrap();
        for name in ["a.zip", "a.jpg", "b.rar", "c.png"] {
            File::create(temp.path().join(name)).unwrap();
        }

        let orch = orchestrator();
        let best = scan(&orch, &ScanRequest::new(temp.path()));
        let request = ScanRequest::builder()
            .directory(temp.path())
            .strategy(MatchStrategy::FirstMatch)
            .build()
            .unwrap();
        let first = scan(&orch, &request);

        assert!(!first.stats.from_cache);
        assert_eq!(first.stats.relevant_files, first.total_files() as u64);
        assert_eq!(first.stats.dirs_visited, best.stats.dirs_visited);
        assert_eq!(first.stats.files_seen, best.stats.files_seen);

        let (walks, _) = orch.cache().stats();
        assert_eq!(walks.hits, 1);
    }
}
