//! Archive/preview pairing for pairscan.
//!
//! Turns a [`FileMap`] produced by a directory walk into pairs plus the
//! archives and previews that stayed alone.
//!
//! # Strategies
//!
//! - **FirstMatch** - identical base names only, consumed in encounter order.
//! - **BestMatch** - a prefix trie over preview names finds exact matches,
//!   prefix matches in either direction and punctuation-insensitive
//!   matches. Candidates are scored (exact 1000, prefix 500, other 100)
//!   plus a per-format bonus, so `foo.jpg` beats `foo.png` beats
//!   `foobar.png` for an archive named `foo`.
//!
//! ```rust,no_run
//! use pairscan_core::{FileKind, FileMap, MatchStrategy};
//! use pairscan_pair::PairingEngine;
//! use std::path::Path;
//!
//! let mut map = FileMap::new();
//! let lib = Path::new("/lib");
//! map.insert(lib, lib.join("a.zip"), FileKind::Archive);
//! map.insert(lib, lib.join("a.jpg"), FileKind::Preview);
//!
//! let engine = PairingEngine::new();
//! let outcome = engine.pair_file_map(&map, MatchStrategy::BestMatch, &|| false).unwrap();
//! let (archives, previews) = PairingEngine::identify_unpaired(&map, &outcome.processed);
//! println!("{} pairs, {} lone archives, {} lone previews",
//!     outcome.pairs.len(), archives.len(), previews.len());
//! ```

mod config;
mod engine;
mod strategy;
mod trie;

pub use config::{PairingConfig, PairingConfigBuilder, default_extension_preference};
pub use engine::{PairingEngine, PairingOutcome};
pub use strategy::{
    BestMatch, EXACT_SCORE, FALLBACK_SCORE, FirstMatch, PREFIX_SCORE, PairBatch, PairingStrategy,
};
pub use trie::PrefixTrie;

// Re-export core types for convenience
pub use pairscan_core::{FileMap, FilePair, MatchStrategy};
