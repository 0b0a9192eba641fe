use pairscan_core::{
    FileKind, FileMap, FilePair, MatchStrategy, PathClassifier, ScanConfig, ScanResult,
    SpecialFolder, normalize_directory,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_classifier_from_default_config() {
    let classifier = PathClassifier::from_config(&ScanConfig::default());

    assert_eq!(classifier.classify(Path::new("a.zip")), FileKind::Archive);
    assert_eq!(classifier.classify(Path::new("a.Blend")), FileKind::Archive);
    assert_eq!(classifier.classify(Path::new("a.jpeg")), FileKind::Preview);
    assert_eq!(classifier.classify(Path::new("a.psd")), FileKind::Ignored);
}

#[test]
fn test_file_pair_with_real_files() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("rock.zip");
    let preview = temp.path().join("rock.png");
    fs::write(&archive, b"pk").unwrap();
    fs::write(&preview, b"png").unwrap();

    let pair = FilePair::new(&archive, &preview, temp.path()).unwrap();
    assert_eq!(pair.archive_path(), archive.as_path());
    assert_eq!(pair.preview_path(), preview.as_path());
    assert_eq!(pair.base_directory(), temp.path());

    fs::remove_file(&preview).unwrap();
    assert!(FilePair::new(&archive, &preview, temp.path()).is_err());
}

#[test]
fn test_normalize_directory_resolves_dots() {
    let temp = TempDir::new().unwrap();
    fs::create_dir(temp.path().join("sub")).unwrap();

    let dotted = temp.path().join("sub").join("..").join("sub");
    let normalized = normalize_directory(&dotted);
    assert_eq!(normalized, normalize_directory(&temp.path().join("sub")));
    assert!(!normalized.to_string_lossy().contains(".."));
}

#[test]
fn test_normalize_missing_directory_is_absolute() {
    let normalized = normalize_directory(Path::new("does-not-exist-anywhere"));
    assert!(normalized.is_absolute());
}

#[test]
fn test_file_map_counts() {
    let mut map = FileMap::new();
    let dir = PathBuf::from("/lib");
    map.insert(&dir, dir.join("a.zip"), FileKind::Archive);
    map.insert(&dir, dir.join("A.jpg"), FileKind::Preview);
    map.insert(&dir, dir.join("b.rar"), FileKind::Archive);

    assert_eq!(map.len(), 3);
    assert_eq!(map.key_count(), 2);
    assert_eq!(map.files().filter(|f| f.kind == FileKind::Archive).count(), 2);
}

#[test]
fn test_scan_result_json_round_trip() {
    let mut result = ScanResult::new("/lib", MatchStrategy::FirstMatch);
    result.file_pairs.push(FilePair::unchecked("/lib/a.zip", "/lib/a.jpg", "/lib").unwrap());
    result.unpaired_archives.push(PathBuf::from("/lib/b.rar"));
    result.special_folders.push(SpecialFolder::new("Favorites", "/lib/fav", true));

    let json = serde_json::to_string(&result).unwrap();
    let back: ScanResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back, result);
    assert_eq!(back.total_files(), 3);
}

#[test]
fn test_config_deserializes_with_defaults() {
    let config: ScanConfig = serde_json::from_str(r#"{"archive_extensions": ["cbz"]}"#).unwrap();
    assert_eq!(config.archive_extensions, vec!["cbz"]);
    assert!(config.preview_extensions.contains(&"png".to_string()));
    assert!(config.follow_symlinks);
    assert!(config.validate().is_ok());
}
