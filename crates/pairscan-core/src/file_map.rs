//! Discovered files keyed by directory and case-folded base name.

use std::path::{Path, PathBuf};

use compact_str::CompactString;
use indexmap::IndexMap;

use crate::classify::FileKind;
use crate::model::EstimateSize;

/// Normalize a directory path for use as a cache or map key.
///
/// Canonicalizes when the path exists; otherwise makes it absolute without
/// touching the disk.
pub fn normalize_directory(path: &Path) -> PathBuf {
    match path.canonicalize() {
        Ok(p) => p,
        Err(_) => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

/// Case-folded file stem used for matching (`Foo.ZIP` -> `foo`).
pub fn base_name_key(path: &Path) -> Option<CompactString> {
    let stem = path.file_stem()?.to_string_lossy();
    if stem.is_empty() {
        return None;
    }
    Some(CompactString::new(stem.to_lowercase()))
}

/// Key of a [`FileMap`] bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileKey {
    /// Normalized directory containing the files.
    pub directory: PathBuf,
    /// Lowercased base name shared by the files.
    pub base_name: CompactString,
}

impl FileKey {
    pub fn new(directory: impl Into<PathBuf>, base_name: impl Into<CompactString>) -> Self {
        Self {
            directory: directory.into(),
            base_name: base_name.into(),
        }
    }
}

/// A discovered file and its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedFile {
    /// Path with its original case.
    pub path: PathBuf,
    /// Archive or preview.
    pub kind: FileKind,
}

/// All archives and previews found directly inside one directory, in
/// encounter order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryGroup {
    pub directory: PathBuf,
    pub archives: Vec<PathBuf>,
    pub previews: Vec<PathBuf>,
}

/// Mapping from `(directory, base name)` to the files sharing it.
///
/// Buckets and the files inside them keep insertion order, which is the
/// order the walker encountered them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMap {
    entries: IndexMap<FileKey, Vec<MappedFile>>,
    file_count: usize,
}

impl FileMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a relevant file found in `directory`.
    ///
    /// Ignored files and paths without a stem are dropped; returns whether
    /// the file was added.
    pub fn insert(&mut self, directory: &Path, path: PathBuf, kind: FileKind) -> bool {
        if !kind.is_relevant() {
            return false;
        }
        let Some(base_name) = base_name_key(&path) else {
            return false;
        };
        self.entries
            .entry(FileKey::new(directory, base_name))
            .or_default()
            .push(MappedFile { path, kind });
        self.file_count += 1;
        true
    }

    /// Files stored under a key.
    pub fn get(&self, key: &FileKey) -> Option<&[MappedFile]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Iterate over buckets in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&FileKey, &[MappedFile])> {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Iterate over every stored file.
    pub fn files(&self) -> impl Iterator<Item = &MappedFile> {
        self.entries.values().flatten()
    }

    /// Total number of relevant files.
    pub fn len(&self) -> usize {
        self.file_count
    }

    /// Check whether no files were recorded.
    pub fn is_empty(&self) -> bool {
        self.file_count == 0
    }

    /// Number of distinct `(directory, base name)` keys.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Split the map into per-directory groups, preserving encounter order.
    pub fn directory_groups(&self) -> Vec<DirectoryGroup> {
        let mut groups: IndexMap<&Path, DirectoryGroup> = IndexMap::new();
        for (key, files) in &self.entries {
            let group = groups
                .entry(key.directory.as_path())
                .or_insert_with(|| DirectoryGroup {
                    directory: key.directory.clone(),
                    ..DirectoryGroup::default()
                });
            for file in files {
                match file.kind {
                    FileKind::Archive => group.archives.push(file.path.clone()),
                    FileKind::Preview => group.previews.push(file.path.clone()),
                    FileKind::Ignored => {}
                }
            }
        }
        groups.into_values().collect()
    }
}

impl EstimateSize for FileMap {
    fn estimated_bytes(&self) -> usize {
        let per_key = std::mem::size_of::<FileKey>() + std::mem::size_of::<Vec<MappedFile>>();
        let keys: usize = self
            .entries
            .keys()
            .map(|k| per_key + k.directory.as_os_str().len() + k.base_name.len())
            .sum();
        let files: usize = self
            .files()
            .map(|f| std::mem::size_of::<MappedFile>() + f.path.as_os_str().len())
            .sum();
        std::mem::size_of::<Self>() + keys + files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name_key() {
        assert_eq!(base_name_key(Path::new("/a/Foo.ZIP")).as_deref(), Some("foo"));
        assert_eq!(base_name_key(Path::new("/a/pack.tar.gz")).as_deref(), Some("pack.tar"));
        assert_eq!(base_name_key(Path::new("/")), None);
    }

    #[test]
    fn test_insert_groups_by_case_folded_name() {
        let dir = Path::new("/lib");
        let mut map = FileMap::new();
        assert!(map.insert(dir, PathBuf::from("/lib/Tree.zip"), FileKind::Archive));
        assert!(map.insert(dir, PathBuf::from("/lib/tree.jpg"), FileKind::Preview));
        assert!(!map.insert(dir, PathBuf::from("/lib/notes.txt"), FileKind::Ignored));

        assert_eq!(map.len(), 2);
        assert_eq!(map.key_count(), 1);

        let files = map.get(&FileKey::new("/lib", "tree")).unwrap();
        assert_eq!(files[0].path, PathBuf::from("/lib/Tree.zip"));
        assert_eq!(files[1].kind, FileKind::Preview);
    }

    #[test]
    fn test_directory_groups_keep_order() {
        let mut map = FileMap::new();
        map.insert(Path::new("/b"), PathBuf::from("/b/x.zip"), FileKind::Archive);
        map.insert(Path::new("/a"), PathBuf::from("/a/y.png"), FileKind::Preview);
        map.insert(Path::new("/b"), PathBuf::from("/b/z.jpg"), FileKind::Preview);

        let groups = map.directory_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].directory, PathBuf::from("/b"));
        assert_eq!(groups[0].archives, vec![PathBuf::from("/b/x.zip")]);
        assert_eq!(groups[0].previews, vec![PathBuf::from("/b/z.jpg")]);
        assert_eq!(groups[1].previews, vec![PathBuf::from("/a/y.png")]);
    }

    #[test]
    fn test_estimate_grows_with_content() {
        let mut map = FileMap::new();
        let empty = map.estimated_bytes();
        map.insert(Path::new("/lib"), PathBuf::from("/lib/a.zip"), FileKind::Archive);
        assert!(map.estimated_bytes() > empty);
    }
}
