//! Core types and traits for pairscan.
//!
//! This crate provides the data structures shared by the scanning and
//! pairing engines: the file map produced by a walk, archive/preview pairs,
//! scan results, configuration and the error taxonomy.

mod classify;
mod config;
mod error;
mod file_map;
mod model;

pub use classify::{FileKind, PathClassifier};
pub use config::{CacheConfig, CacheConfigBuilder, ScanConfig, ScanConfigBuilder, normalize_extension};
pub use error::{CircuitOpenReason, MetadataError, PairError, ScanError, ScanWarning, WarningKind};
pub use file_map::{DirectoryGroup, FileKey, FileMap, MappedFile, base_name_key, normalize_directory};
pub use model::{
    EstimateSize, FilePair, MatchStrategy, ScanFailure, ScanResult, ScanStats, SpecialFolder,
};
