//! Pairing configuration.

use std::collections::HashMap;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use pairscan_core::MatchStrategy;

/// Configuration for the pairing engine.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct PairingConfig {
    /// Strategy used when a caller does not pick one.
    #[builder(default)]
    #[serde(default)]
    pub strategy: MatchStrategy,

    /// Maximum candidates scored per archive.
    #[builder(default = "20")]
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,

    /// Bonus added to a candidate's score by preview extension. Unlisted
    /// extensions get 0.
    #[builder(default = "default_extension_preference()")]
    #[serde(default = "default_extension_preference")]
    pub extension_preference: HashMap<String, i32>,

    /// Check that both files exist before creating a pair.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub verify_files: bool,

    /// Pair directories on the rayon pool.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub parallel: bool,
}

fn default_true() -> bool {
    true
}

fn default_candidate_limit() -> usize {
    20
}

/// Default preview format ranking: jpg > jpeg > png > webp > gif > bmp > tga.
pub fn default_extension_preference() -> HashMap<String, i32> {
    [
        ("jpg", 60),
        ("jpeg", 55),
        ("png", 50),
        ("webp", 45),
        ("gif", 40),
        ("bmp", 30),
        ("tga", 20),
    ]
    .into_iter()
    .map(|(ext, bonus)| (ext.to_string(), bonus))
    .collect()
}

impl PairingConfig {
    /// Create a new config builder.
    pub fn builder() -> PairingConfigBuilder {
        PairingConfigBuilder::default()
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            strategy: MatchStrategy::default(),
            candidate_limit: default_candidate_limit(),
            extension_preference: default_extension_preference(),
            verify_files: true,
            parallel: true,
        }
    }
}
