//! Depth-first directory walker that builds a [`FileMap`].

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use pairscan_core::{
    EstimateSize, FileKind, FileMap, PathClassifier, ScanConfig, ScanError, ScanStats, ScanWarning,
    WarningKind,
};

use crate::governor::GovernorHandle;
use crate::progress::Stage;
use crate::visited::VisitedSet;

/// Per-walk state threaded through the traversal.
pub struct WalkContext<'a> {
    interrupt: &'a (dyn Fn() -> bool + Sync),
    visited: &'a VisitedSet,
    progress: Option<Stage<'a>>,
    governor: Option<&'a GovernorHandle>,
    stats: ScanStats,
    warnings: Vec<ScanWarning>,
    errors: usize,
    items: u64,
    last_progress_items: u64,
}

impl<'a> WalkContext<'a> {
    pub fn new(interrupt: &'a (dyn Fn() -> bool + Sync), visited: &'a VisitedSet) -> Self {
        Self {
            interrupt,
            visited,
            progress: None,
            governor: None,
            stats: ScanStats::default(),
            warnings: Vec::new(),
            errors: 0,
            items: 0,
            last_progress_items: 0,
        }
    }

    /// Report walk progress into `stage`.
    pub fn with_progress(mut self, stage: Stage<'a>) -> Self {
        self.progress = Some(stage);
        self
    }

    /// Abort the walk when the memory circuit opens.
    pub fn with_governor(mut self, governor: &'a GovernorHandle) -> Self {
        self.governor = Some(governor);
        self
    }

    fn check_cancelled(&self) -> Result<(), ScanError> {
        if (self.interrupt)() {
            return Err(ScanError::Interrupted);
        }
        if let Some(reason) = self.governor.and_then(GovernorHandle::reason) {
            return Err(ScanError::MemoryCircuitOpen { reason });
        }
        Ok(())
    }

    fn record_error(&mut self, warning: ScanWarning, max_errors: usize) -> Result<(), ScanError> {
        warn!(path = %warning.path.display(), "{}", warning.message);
        self.warnings.push(warning);
        self.errors += 1;
        if self.errors > max_errors {
            return Err(ScanError::TooManyErrors { count: self.errors });
        }
        Ok(())
    }

    fn note_progress(&mut self, every: u64, pending_dirs: usize, current: &Path) {
        let Some(stage) = self.progress else {
            return;
        };
        if self.items - self.last_progress_items < every.max(1) {
            return;
        }
        self.last_progress_items = self.items;
        // The remaining tree size is unknown, so the fraction approaches 1
        // as the pending stack drains.
        let done = self.stats.dirs_visited as f64;
        let fraction = done / (done + pending_dirs as f64 + 1.0);
        stage.reporter().note_items(self.stats.relevant_files);
        stage.report(fraction, &format!("Scanning {}", current.display()));
    }
}

/// Result of a completed walk.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub file_map: FileMap,
    pub stats: ScanStats,
    pub warnings: Vec<ScanWarning>,
}

impl EstimateSize for WalkOutcome {
    fn estimated_bytes(&self) -> usize {
        let warnings: usize = self
            .warnings
            .iter()
            .map(|w| std::mem::size_of::<ScanWarning>() + w.path.as_os_str().len() + w.message.len())
            .sum();
        std::mem::size_of::<Self>() + self.file_map.estimated_bytes() + warnings
    }
}

/// One listed directory, split into what to record and where to descend.
#[derive(Default)]
struct Listing {
    files: Vec<(PathBuf, FileKind)>,
    subdirs: Vec<PathBuf>,
}

/// Iterative depth-first walker.
pub struct DirectoryWalker {
    config: ScanConfig,
    classifier: PathClassifier,
}

impl DirectoryWalker {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            classifier: PathClassifier::from_config(&config),
            config,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn classifier(&self) -> &PathClassifier {
        &self.classifier
    }

    /// Walk `root`, descending at most `max_depth` levels (0 lists only
    /// `root` itself).
    ///
    /// Unreadable subdirectories become warnings; an unreadable root is an
    /// error.
    pub fn walk(
        &self,
        root: &Path,
        max_depth: Option<u32>,
        mut ctx: WalkContext<'_>,
    ) -> Result<WalkOutcome, ScanError> {
        let mut file_map = FileMap::new();
        let mut stack: Vec<(PathBuf, u32)> = vec![(root.to_path_buf(), 0)];

        while let Some((dir, depth)) = stack.pop() {
            ctx.check_cancelled()?;

            let canonical = match dir.canonicalize() {
                Ok(path) => path,
                Err(err) if depth == 0 => return Err(ScanError::io(&dir, err)),
                Err(err) => {
                    ctx.stats.dirs_skipped += 1;
                    ctx.record_error(ScanWarning::from_io(&dir, &err), self.config.max_errors)?;
                    continue;
                }
            };
            if ctx.visited.try_enter_canonical(canonical) {
                trace!(path = %dir.display(), "Skipping already visited directory");
                ctx.stats.dirs_skipped += 1;
                ctx.warnings.push(ScanWarning::symlink_loop(&dir));
                continue;
            }

            if max_depth.is_some_and(|max| depth > max) {
                ctx.stats.dirs_skipped += 1;
                continue;
            }

            let listing = match self.list(&dir, &mut ctx) {
                Ok(listing) => listing,
                Err(ListError::Cancelled(err)) => return Err(err),
                Err(ListError::Io(err)) if depth == 0 => return Err(ScanError::io(&dir, err)),
                Err(ListError::Io(err)) => {
                    ctx.stats.dirs_skipped += 1;
                    ctx.record_error(ScanWarning::from_io(&dir, &err), self.config.max_errors)?;
                    continue;
                }
            };
            ctx.stats.dirs_visited += 1;

            if listing.files.is_empty() && listing.subdirs.is_empty() {
                trace!(path = %dir.display(), "Nothing relevant below directory");
                ctx.stats.dirs_skipped += 1;
                ctx.note_progress(self.config.progress_every, stack.len(), &dir);
                continue;
            }

            for (path, kind) in listing.files {
                if file_map.insert(&dir, path, kind) {
                    ctx.stats.relevant_files += 1;
                }
            }

            let within_depth = max_depth.is_none_or(|max| depth < max);
            if within_depth {
                // Reverse so the alphabetically first subdirectory is popped first.
                stack.extend(listing.subdirs.into_iter().rev().map(|sub| (sub, depth + 1)));
            } else {
                ctx.stats.dirs_skipped += listing.subdirs.len() as u64;
            }

            ctx.note_progress(self.config.progress_every, stack.len(), &dir);
        }

        debug!(
            root = %root.display(),
            dirs = ctx.stats.dirs_visited,
            skipped = ctx.stats.dirs_skipped,
            files = ctx.stats.relevant_files,
            warnings = ctx.warnings.len(),
            "Walk finished"
        );

        Ok(WalkOutcome {
            file_map,
            stats: ctx.stats,
            warnings: ctx.warnings,
        })
    }

    /// List `dir` once, classifying files and picking eligible subdirectories.
    fn list(&self, dir: &Path, ctx: &mut WalkContext<'_>) -> Result<Listing, ListError> {
        let mut entries: Vec<fs::DirEntry> = fs::read_dir(dir)
            .map_err(ListError::Io)?
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    trace!(path = %dir.display(), error = %err, "Unreadable directory entry");
                    None
                }
            })
            .collect();
        entries.sort_by_key(fs::DirEntry::file_name);

        let check_every = self.config.interrupt_check_every.max(1);
        let mut listing = Listing::default();

        for entry in entries {
            ctx.stats.files_seen += 1;
            ctx.items += 1;
            if ctx.items % check_every == 0 {
                ctx.check_cancelled().map_err(ListError::Cancelled)?;
            }

            let name = entry.file_name();
            let name = name.to_string_lossy();
            if self.config.should_skip_hidden(&name) {
                continue;
            }

            let path = entry.path();
            let Ok(mut file_type) = entry.file_type() else {
                ctx.warnings.push(ScanWarning::new(
                    &path,
                    "Could not read file type",
                    WarningKind::MetadataError,
                ));
                continue;
            };

            if file_type.is_symlink() {
                if !self.config.follow_symlinks {
                    trace!(path = %path.display(), "Not following symlink");
                    continue;
                }
                match fs::metadata(&path) {
                    Ok(meta) => file_type = meta.file_type(),
                    Err(_) => {
                        ctx.warnings.push(ScanWarning::new(
                            &path,
                            "Broken symlink",
                            WarningKind::Skipped,
                        ));
                        continue;
                    }
                }
            }

            if file_type.is_dir() {
                if self.config.should_ignore(&name) {
                    trace!(path = %path.display(), "Ignored folder");
                    ctx.stats.dirs_skipped += 1;
                } else {
                    listing.subdirs.push(path);
                }
            } else if file_type.is_file() {
                let kind = self.classifier.classify(&path);
                if kind.is_relevant() {
                    listing.files.push((path, kind));
                }
            }
        }

        Ok(listing)
    }
}

enum ListError {
    Io(std::io::Error),
    Cancelled(ScanError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            File::create(dir.join(name)).unwrap();
        }
    }

    fn walk(root: &Path, max_depth: Option<u32>) -> WalkOutcome {
        let visited = VisitedSet::default();
        let interrupt = || false;
        DirectoryWalker::new(ScanConfig::default())
            .walk(root, max_depth, WalkContext::new(&interrupt, &visited))
            .unwrap()
    }

    #[test]
    fn test_records_only_relevant_files() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), &["a.zip", "a.jpg", "readme.txt"]);

        let outcome = walk(temp.path(), None);
        assert_eq!(outcome.file_map.len(), 2);
        assert_eq!(outcome.stats.files_seen, 3);
        assert_eq!(outcome.stats.relevant_files, 2);
        assert_eq!(outcome.stats.dirs_visited, 1);
    }

    #[test]
    fn test_depth_limit() {
        let temp = TempDir::new().unwrap();
        let deep = temp.path().join("one").join("two");
        fs::create_dir_all(&deep).unwrap();
        touch(temp.path(), &["top.zip"]);
        touch(&temp.path().join("one"), &["mid.zip"]);
        touch(&deep, &["low.zip"]);

        assert_eq!(walk(temp.path(), Some(0)).file_map.len(), 1);
        assert_eq!(walk(temp.path(), Some(1)).file_map.len(), 2);
        assert_eq!(walk(temp.path(), None).file_map.len(), 3);
    }

    #[test]
    fn test_ignored_folders_not_descended() {
        let temp = TempDir::new().unwrap();
        let git = temp.path().join(".git");
        fs::create_dir(&git).unwrap();
        touch(&git, &["objects.zip"]);

        let outcome = walk(temp.path(), None);
        assert!(outcome.file_map.is_empty());
        assert_eq!(outcome.stats.dirs_visited, 1);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let visited = VisitedSet::default();
        let interrupt = || false;
        let result = DirectoryWalker::new(ScanConfig::default()).walk(
            Path::new("/definitely/not/here"),
            None,
            WalkContext::new(&interrupt, &visited),
        );
        assert!(matches!(result, Err(ScanError::NotFound { .. })));
    }

    #[test]
    fn test_interrupt_before_start() {
        let temp = TempDir::new().unwrap();
        let visited = VisitedSet::default();
        let interrupt = || true;
        let result = DirectoryWalker::new(ScanConfig::default()).walk(
            temp.path(),
            None,
            WalkContext::new(&interrupt, &visited),
        );
        assert!(matches!(result, Err(ScanError::Interrupted)));
        assert!(visited.is_empty());
    }

    #[test]
    fn test_directories_without_relevant_entries_are_pruned() {
        let temp = TempDir::new().unwrap();
        let notes = temp.path().join("notes");
        let empty = temp.path().join("empty");
        fs::create_dir(&notes).unwrap();
        fs::create_dir(&empty).unwrap();
        touch(temp.path(), &["a.zip"]);
        touch(&notes, &["todo.txt"]);

        let outcome = walk(temp.path(), None);
        assert_eq!(outcome.file_map.len(), 1);
        assert_eq!(outcome.stats.dirs_visited, 3);
        assert_eq!(outcome.stats.dirs_skipped, 2);
    }

    #[test]
    fn test_vanished_subdirectory_becomes_warning() {
        let temp = TempDir::new().unwrap();
        let gone = temp.path().join("a_gone");
        fs::create_dir(&gone).unwrap();
        touch(&gone, &["lost.zip"]);
        let kept = temp.path().join("b_kept");
        fs::create_dir(&kept).unwrap();
        touch(&kept, &["kept.zip"]);
        touch(temp.path(), &["top.zip"]);

        // The directory disappears between being listed and being entered.
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let interrupt = || {
            if calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 1 {
                let _ = fs::remove_dir_all(&gone);
            }
            false
        };
        let visited = VisitedSet::default();
        let outcome = DirectoryWalker::new(ScanConfig::default())
            .walk(temp.path(), None, WalkContext::new(&interrupt, &visited))
            .unwrap();

        assert_eq!(outcome.file_map.len(), 2);
        assert_eq!(outcome.stats.dirs_skipped, 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].path, gone);
    }

    #[test]
    fn test_error_budget_exhausted() {
        let temp = TempDir::new().unwrap();
        let gone = temp.path().join("gone");
        fs::create_dir(&gone).unwrap();
        touch(temp.path(), &["top.zip"]);

        let calls = std::sync::atomic::AtomicUsize::new(0);
        let interrupt = || {
            if calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 1 {
                let _ = fs::remove_dir_all(&gone);
            }
            false
        };
        let config = ScanConfig::builder().max_errors(0usize).build().unwrap();
        let visited = VisitedSet::default();
        let result = DirectoryWalker::new(config).walk(
            temp.path(),
            None,
            WalkContext::new(&interrupt, &visited),
        );
        assert!(matches!(result, Err(ScanError::TooManyErrors { count: 1 })));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let locked = temp.path().join("locked");
        fs::create_dir(&locked).unwrap();
        touch(&locked, &["hidden.zip"]);
        touch(temp.path(), &["a.zip", "a.jpg"]);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users read through the mode bits; nothing to check then.
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let outcome = walk(temp.path(), None);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(outcome.file_map.len(), 2);
        assert_eq!(outcome.stats.dirs_skipped, 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].kind, WarningKind::PermissionDenied);
        assert_eq!(outcome.warnings[0].path, locked);
    }
}
