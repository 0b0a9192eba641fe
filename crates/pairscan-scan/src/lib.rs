//! Scanning engine for pairscan.
//!
//! This crate walks directory trees, pairs what it finds, caches results
//! and feeds them to a consumer without running the process out of memory.
//!
//! # Overview
//!
//! - **Walking** - iterative depth-first traversal with loop protection,
//!   depth limits, ignore lists and cooperative cancellation
//! - **Caching** - walks and finished results, TTL and LRU bounded, per depth limit
//! - **Progress** - throttled percent/message updates through a [`ProgressSink`]
//! - **Memory governance** - a circuit breaker that aborts scans and
//!   dispatches under sustained memory pressure, plus adaptive batch sizing
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pairscan_scan::{ScanConfig, ScanOrchestrator, ScanRequest, TracingSink};
//!
//! let orchestrator = ScanOrchestrator::new(ScanConfig::default()).unwrap();
//! let result = orchestrator.scan(
//!     &ScanRequest::new("/path/to/library"),
//!     &|| false,
//!     Arc::new(TracingSink),
//! );
//!
//! println!("{} pairs", result.file_pairs.len());
//! println!("{} archives without preview", result.unpaired_archives.len());
//! ```
//!
//! # Progress Monitoring
//!
//! Subscribe to progress events on a tokio channel:
//!
//! ```rust,no_run
//! use pairscan_scan::BroadcastSink;
//!
//! let sink = BroadcastSink::default();
//! let mut rx = sink.subscribe();
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = rx.recv().await {
//!         println!("{}% {}", event.percent, event.message);
//!     }
//! });
//! ```

mod cache;
mod dispatch;
mod governor;
mod metadata;
mod orchestrator;
mod progress;
mod visited;
mod walker;

pub use cache::{BoundedCache, CacheEntry, CacheError, CacheStats, ScanCache};
pub use dispatch::{
    BatchDispatcher, BatchSizer, BatchSizerConfig, BatchSizerConfigBuilder, DispatchSummary,
};
pub use governor::{
    CircuitTransition, GovernorConfig, GovernorConfigBuilder, GovernorDecision, GovernorHandle,
    MemoryMonitor, MemorySampler, MemoryStatus, PressureLevel, ResourceGovernor, SysinfoSampler,
};
pub use metadata::{MetadataProvider, NoMetadata};
pub use orchestrator::{ScanOrchestrator, ScanRequest, ScanRequestBuilder};
pub use progress::{
    BroadcastSink, CompositeSink, NullSink, ProgressConfig, ProgressEvent, ProgressReporter,
    ProgressSink, Stage, TracingSink,
};
pub use visited::VisitedSet;
pub use walker::{DirectoryWalker, WalkContext, WalkOutcome};

// Re-export core types for convenience
pub use pairscan_core::{
    CircuitOpenReason, FilePair, MatchStrategy, ScanConfig, ScanError, ScanFailure, ScanResult,
    ScanStats, ScanWarning, WarningKind,
};
