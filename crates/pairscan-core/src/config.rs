//! Scan and cache configuration types.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration for directory walking and file classification.
///
/// Supplied once when an orchestrator is built and never changed while it
/// is alive.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ScanConfig {
    /// Extensions of archive files (with or without a leading dot).
    #[builder(default = "default_archive_extensions()")]
    #[serde(default = "default_archive_extensions")]
    pub archive_extensions: Vec<String>,

    /// Extensions of preview files (with or without a leading dot).
    #[builder(default = "default_preview_extensions()")]
    #[serde(default = "default_preview_extensions")]
    pub preview_extensions: Vec<String>,

    /// Folder names never descended into. `*` is allowed as a leading or
    /// trailing wildcard.
    #[builder(default = "default_ignored_folders()")]
    #[serde(default = "default_ignored_folders")]
    pub ignored_folders: Vec<String>,

    /// Include hidden entries (starting with `.`).
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub include_hidden: bool,

    /// Follow symbolic links to directories.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub follow_symlinks: bool,

    /// Default maximum depth when a request does not set one (None = unlimited).
    #[builder(default)]
    #[serde(default)]
    pub max_depth: Option<u32>,

    /// Upper bound on remembered directories for loop protection.
    #[builder(default = "10_000")]
    #[serde(default = "default_max_visited")]
    pub max_visited: usize,

    /// Emit walk progress after this many processed items.
    #[builder(default = "100")]
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,

    /// Poll the interrupt predicate after this many directory entries.
    #[builder(default = "64")]
    #[serde(default = "default_interrupt_check_every")]
    pub interrupt_check_every: u64,

    /// Abort the walk once this many per-directory errors have piled up.
    #[builder(default = "1_000")]
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,
}

fn default_true() -> bool {
    true
}

fn default_archive_extensions() -> Vec<String> {
    ["zip", "rar", "7z", "tar", "gz", "blend"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_preview_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp", "bmp", "tga"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_ignored_folders() -> Vec<String> {
    [".git", "__pycache__", "node_modules", ".thumbnails"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_visited() -> usize {
    10_000
}

fn default_progress_every() -> u64 {
    100
}

fn default_interrupt_check_every() -> u64 {
    64
}

fn default_max_errors() -> usize {
    1_000
}

impl ScanConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        let archives = self.archive_extensions.clone().unwrap_or_else(default_archive_extensions);
        let previews = self.preview_extensions.clone().unwrap_or_else(default_preview_extensions);
        check_extension_lists(&archives, &previews)?;
        if self.max_visited == Some(0) {
            return Err("max_visited must be greater than 0".to_string());
        }
        Ok(())
    }
}

fn check_extension_lists(archives: &[String], previews: &[String]) -> Result<(), String> {
    if archives.is_empty() {
        return Err("At least one archive extension is required".to_string());
    }
    if previews.is_empty() {
        return Err("At least one preview extension is required".to_string());
    }
    for ext in archives {
        let ext = normalize_extension(ext);
        if previews.iter().any(|p| normalize_extension(p) == ext) {
            return Err(format!("Extension '{ext}' is both an archive and a preview extension"));
        }
    }
    Ok(())
}

/// Lowercase an extension and strip a leading dot.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

impl ScanConfig {
    /// Create a new scan config builder.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Re-check invariants for configs that did not come through the builder
    /// (e.g. deserialized ones).
    pub fn validate(&self) -> Result<(), String> {
        check_extension_lists(&self.archive_extensions, &self.preview_extensions)?;
        if self.max_visited == 0 {
            return Err("max_visited must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Check if a folder name is on the ignore list.
    pub fn should_ignore(&self, name: &str) -> bool {
        self.ignored_folders.iter().any(|pattern| {
            if name == pattern {
                return true;
            }
            if let Some(prefix) = pattern.strip_suffix('*') {
                if name.starts_with(prefix) {
                    return true;
                }
            }
            if let Some(suffix) = pattern.strip_prefix('*') {
                if name.ends_with(suffix) {
                    return true;
                }
            }
            false
        })
    }

    /// Check if hidden entries should be skipped.
    pub fn should_skip_hidden(&self, name: &str) -> bool {
        !self.include_hidden && name.starts_with('.')
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            archive_extensions: default_archive_extensions(),
            preview_extensions: default_preview_extensions(),
            ignored_folders: default_ignored_folders(),
            include_hidden: true,
            follow_symlinks: true,
            max_depth: None,
            max_visited: default_max_visited(),
            progress_every: default_progress_every(),
            interrupt_check_every: default_interrupt_check_every(),
            max_errors: default_max_errors(),
        }
    }
}

/// Bounds for the scan cache.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct CacheConfig {
    /// Entries older than this many seconds are expired.
    #[builder(default = "300")]
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum number of entries per cache tier.
    #[builder(default = "50")]
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Estimated byte budget per cache tier.
    #[builder(default = "64 * 1024 * 1024")]
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_max_entries() -> usize {
    50
}

fn default_max_bytes() -> usize {
    64 * 1024 * 1024
}

impl CacheConfig {
    /// Create a new cache config builder.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
            max_bytes: default_max_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ScanConfig::builder()
            .archive_extensions(vec!["zip".to_string()])
            .preview_extensions(vec![".PNG".to_string()])
            .follow_symlinks(false)
            .build()
            .unwrap();

        assert_eq!(config.archive_extensions, vec!["zip"]);
        assert!(!config.follow_symlinks);
        assert_eq!(config.max_visited, 10_000);
    }

    #[test]
    fn test_builder_rejects_overlapping_extensions() {
        let result = ScanConfig::builder()
            .archive_extensions(vec!["zip".to_string(), "png".to_string()])
            .preview_extensions(vec![".PNG".to_string()])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_empty_lists() {
        let result = ScanConfig::builder().archive_extensions(Vec::<String>::new()).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_should_ignore() {
        let config = ScanConfig::builder()
            .ignored_folders(vec!["node_modules".to_string(), "*.tmp".to_string(), "cache*".to_string()])
            .build()
            .unwrap();

        assert!(config.should_ignore("node_modules"));
        assert!(config.should_ignore("build.tmp"));
        assert!(config.should_ignore("cache_v2"));
        assert!(!config.should_ignore("textures"));
    }

    #[test]
    fn test_should_skip_hidden() {
        let mut config = ScanConfig::default();
        assert!(!config.should_skip_hidden(".assets"));

        config.include_hidden = false;
        assert!(config.should_skip_hidden(".assets"));
        assert!(!config.should_skip_hidden("assets"));
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension(".JPG"), "jpg");
        assert_eq!(normalize_extension(" zip "), "zip");
    }

    #[test]
    fn test_cache_config_defaults() {
        let config = CacheConfig::builder().max_entries(10usize).build().unwrap();
        assert_eq!(config.max_entries, 10);
        assert_eq!(config.ttl_secs, 300);
    }
}
