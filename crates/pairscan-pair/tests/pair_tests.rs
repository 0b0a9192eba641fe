use pairscan_core::{FileKind, FileMap, MatchStrategy, PathClassifier};
use pairscan_pair::{BestMatch, PairingConfig, PairingEngine, PairingStrategy};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn unchecked_engine() -> PairingEngine {
    PairingEngine::with_config(
        PairingConfig::builder()
            .verify_files(false)
            .build()
            .unwrap(),
    )
}

fn map_from(dir: &Path, names: &[&str]) -> FileMap {
    let classifier = PathClassifier::default();
    let mut map = FileMap::new();
    for name in names {
        let path = dir.join(name);
        let kind = classifier.classify(&path);
        map.insert(dir, path, kind);
    }
    map
}

#[test]
fn test_first_match_min_count_per_key() {
    let dir = Path::new("/assets");
    let map = map_from(
        dir,
        &[
            "a.zip", "a.rar", "a.7z", "a.jpg", "a.png", // 3 archives, 2 previews
            "b.zip", "b.jpg", "b.png", "b.gif", // 1 archive, 3 previews
            "c.zip", // none
        ],
    );

    let outcome = unchecked_engine()
        .pair_file_map(&map, MatchStrategy::FirstMatch, &|| false)
        .unwrap();

    assert_eq!(outcome.pairs.len(), 3);
    let pairs: Vec<(&Path, &Path)> = outcome
        .pairs
        .iter()
        .map(|p| (p.archive_path(), p.preview_path()))
        .collect();
    assert!(pairs.contains(&(dir.join("a.zip").as_path(), dir.join("a.jpg").as_path())));
    assert!(pairs.contains(&(dir.join("a.rar").as_path(), dir.join("a.png").as_path())));
    assert!(pairs.contains(&(dir.join("b.zip").as_path(), dir.join("b.jpg").as_path())));
}

#[test]
fn test_accounting_holds_for_every_strategy() {
    let dir = Path::new("/assets");
    let map = map_from(
        dir,
        &[
            "tree.zip", "tree.jpg", "tree_big.png", "rock.rar", "rock-v2.png", "Sky.7z",
            "sky.webp", "sky.gif", "lonely.png", "orphan.zip", "grass.blend",
        ],
    );

    for kind in [MatchStrategy::FirstMatch, MatchStrategy::BestMatch] {
        let engine = unchecked_engine();
        let outcome = engine.pair_file_map(&map, kind, &|| false).unwrap();
        let (archives, previews) = PairingEngine::identify_unpaired(&map, &outcome.processed);

        assert_eq!(
            outcome.pairs.len() * 2 + archives.len() + previews.len(),
            map.len(),
            "accounting broken for {kind}"
        );

        // Running it again gives the same answer.
        let again = PairingEngine::identify_unpaired(&map, &outcome.processed);
        assert_eq!(again, (archives, previews));
    }
}

#[test]
fn test_best_match_example() {
    let strategy = BestMatch::new(&PairingConfig {
        verify_files: false,
        ..PairingConfig::default()
    });
    let dir = PathBuf::from("/x");
    let previews = vec![dir.join("foobar.png"), dir.join("foo.png"), dir.join("foo.jpg")];

    let batch = strategy.create_pairs(&[dir.join("foo.zip")], &previews, &dir);
    assert_eq!(batch.pairs[0].preview_path(), dir.join("foo.jpg"));
}

#[test]
fn test_custom_extension_preference() {
    let mut config = PairingConfig {
        verify_files: false,
        ..PairingConfig::default()
    };
    config.extension_preference.insert("png".to_string(), 99);
    let strategy = BestMatch::new(&config);
    let dir = PathBuf::from("/x");

    let batch = strategy.create_pairs(
        &[dir.join("foo.zip")],
        &[dir.join("foo.jpg"), dir.join("foo.png")],
        &dir,
    );
    assert_eq!(batch.pairs[0].preview_path(), dir.join("foo.png"));
}

#[test]
fn test_pairs_per_directory_only() {
    let mut map = FileMap::new();
    let a = Path::new("/a");
    let b = Path::new("/b");
    map.insert(a, a.join("x.zip"), FileKind::Archive);
    map.insert(b, b.join("x.jpg"), FileKind::Preview);

    let outcome = unchecked_engine()
        .pair_file_map(&map, MatchStrategy::BestMatch, &|| false)
        .unwrap();
    assert!(outcome.pairs.is_empty());
}

#[test]
fn test_parallel_and_serial_agree() {
    let mut map = FileMap::new();
    for d in 0..40 {
        let dir = PathBuf::from(format!("/lib/d{d}"));
        for n in 0..5 {
            map.insert(&dir, dir.join(format!("item{n}.zip")), FileKind::Archive);
            map.insert(&dir, dir.join(format!("item{n}_preview.png")), FileKind::Preview);
        }
    }

    let parallel = unchecked_engine()
        .pair_file_map(&map, MatchStrategy::BestMatch, &|| false)
        .unwrap();
    let serial = PairingEngine::with_config(PairingConfig {
        verify_files: false,
        parallel: false,
        ..PairingConfig::default()
    })
    .pair_file_map(&map, MatchStrategy::BestMatch, &|| false)
    .unwrap();

    assert_eq!(parallel.pairs, serial.pairs);
    assert_eq!(parallel.pairs.len(), 200);
}

#[test]
fn test_verified_pairs_with_real_files() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path();
    for name in ["a.zip", "a.jpg", "b.zip"] {
        fs::write(dir.join(name), b"x").unwrap();
    }
    let map = map_from(dir, &["a.zip", "a.jpg", "b.zip", "b.jpg"]); // b.jpg never written

    let outcome = PairingEngine::new()
        .pair_file_map(&map, MatchStrategy::FirstMatch, &|| false)
        .unwrap();
    assert_eq!(outcome.pairs.len(), 1);
    assert_eq!(outcome.failures, 1);

    let (archives, previews) = PairingEngine::identify_unpaired(&map, &outcome.processed);
    assert_eq!(archives, vec![dir.join("b.zip")]);
    assert_eq!(previews, vec![dir.join("b.jpg")]);
    assert!(!outcome.processed.contains(&dir.join("b.zip")));
}
