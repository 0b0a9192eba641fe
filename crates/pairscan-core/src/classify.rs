//! Extension-based path classification.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{ScanConfig, normalize_extension};

/// What a path is, judged by its extension alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    Archive,
    Preview,
    Ignored,
}

impl FileKind {
    /// Archive or preview.
    pub fn is_relevant(self) -> bool {
        !matches!(self, FileKind::Ignored)
    }
}

/// Classifies paths as archive, preview or ignored without touching the disk.
///
/// The extension sets are case-folded once at construction.
#[derive(Debug, Clone)]
pub struct PathClassifier {
    archives: HashSet<String>,
    previews: HashSet<String>,
}

impl PathClassifier {
    /// Build a classifier from two extension lists.
    pub fn new<A, P>(archive_extensions: A, preview_extensions: P) -> Self
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        Self {
            archives: archive_extensions
                .into_iter()
                .map(|e| normalize_extension(e.as_ref()))
                .filter(|e| !e.is_empty())
                .collect(),
            previews: preview_extensions
                .into_iter()
                .map(|e| normalize_extension(e.as_ref()))
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Build a classifier from scan configuration.
    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(&config.archive_extensions, &config.preview_extensions)
    }

    /// Classify a path by its extension.
    pub fn classify(&self, path: &Path) -> FileKind {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return FileKind::Ignored;
        };
        self.classify_extension(ext)
    }

    /// Classify a bare extension (no leading dot).
    pub fn classify_extension(&self, ext: &str) -> FileKind {
        // Most extensions are already lowercase; avoid the allocation then.
        if ext.bytes().any(|b| b.is_ascii_uppercase()) || !ext.is_ascii() {
            let folded = ext.to_lowercase();
            return self.lookup(&folded);
        }
        self.lookup(ext)
    }

    fn lookup(&self, ext: &str) -> FileKind {
        if self.archives.contains(ext) {
            FileKind::Archive
        } else if self.previews.contains(ext) {
            FileKind::Preview
        } else {
            FileKind::Ignored
        }
    }

    /// Whether a file name has a relevant extension.
    pub fn is_relevant(&self, path: &Path) -> bool {
        self.classify(path).is_relevant()
    }
}

impl Default for PathClassifier {
    fn default() -> Self {
        Self::from_config(&ScanConfig::default())
    }
}
