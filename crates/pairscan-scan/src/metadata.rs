//! Special-folder lookup.

use std::path::Path;

use pairscan_core::{MetadataError, SpecialFolder};

/// Read-only source of folders flagged through sidecar metadata.
///
/// Errors are never fatal to a scan; they are logged and treated as "no
/// special folders".
pub trait MetadataProvider: Send + Sync {
    fn get_special_folders(&self, directory: &Path) -> Result<Vec<SpecialFolder>, MetadataError>;
}

impl<F> MetadataProvider for F
where
    F: Fn(&Path) -> Result<Vec<SpecialFolder>, MetadataError> + Send + Sync,
{
    fn get_special_folders(&self, directory: &Path) -> Result<Vec<SpecialFolder>, MetadataError> {
        self(directory)
    }
}

/// Provider that knows no special folders.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMetadata;

impl MetadataProvider for NoMetadata {
    fn get_special_folders(&self, _directory: &Path) -> Result<Vec<SpecialFolder>, MetadataError> {
        Ok(Vec::new())
    }
}
