//! Error types for scanning and pairing operations.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the memory circuit breaker opened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitOpenReason {
    /// Resident memory at the time the circuit opened.
    pub memory_mb: f64,
    /// Configured memory limit.
    pub limit_mb: f64,
    /// Average growth per sample over the trend window.
    pub trend_mb_per_sample: f64,
}

impl fmt::Display for CircuitOpenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.0} MB of {:.0} MB in use (trend {:+.1} MB/sample)",
            self.memory_mb, self.limit_mb, self.trend_mb_per_sample
        )
    }
}

/// Errors that abort a whole scan or dispatch.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Operation was cancelled through the interrupt predicate.
    #[error("Scan interrupted")]
    Interrupted,

    /// Too many per-directory errors occurred.
    #[error("Too many errors ({count}), aborting")]
    TooManyErrors { count: usize },

    /// Invalid configuration or request parameters.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Requested path is not a directory.
    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Another scan of the same directory is still running.
    #[error("A scan of {path} is already in progress")]
    AlreadyScanning { path: PathBuf },

    /// The memory circuit breaker opened.
    #[error("Memory circuit open: {reason}")]
    MemoryCircuitOpen { reason: CircuitOpenReason },
}

impl ScanError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Whether this error was caused by cancellation rather than a failure.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// The circuit breaker payload, if this is a memory abort.
    pub fn circuit_reason(&self) -> Option<CircuitOpenReason> {
        match self {
            Self::MemoryCircuitOpen { reason } => Some(*reason),
            _ => None,
        }
    }
}

/// A specific archive/preview combination could not be turned into a pair.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PairError {
    /// One side of the pair does not exist on disk.
    #[error("File does not exist: {path}")]
    MissingFile { path: PathBuf },

    /// A path has no usable file name.
    #[error("Invalid path: {path}")]
    InvalidPath { path: PathBuf },
}

/// The metadata collaborator could not answer.
#[derive(Debug, Error)]
#[error("Metadata lookup failed for {path}: {message}")]
pub struct MetadataError {
    pub path: PathBuf,
    pub message: String,
}

/// Kind of scan warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// Permission was denied.
    PermissionDenied,
    /// Error reading a directory.
    ReadError,
    /// Error reading metadata.
    MetadataError,
    /// Directory already visited through another path.
    SymlinkLoop,
    /// Entry deliberately not processed (depth limit, broken link).
    Skipped,
}

/// Non-fatal warning encountered during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Path where the warning occurred.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl ScanWarning {
    /// Create a new scan warning.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Create a warning from an I/O error, classifying permission problems.
    pub fn from_io(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        let path = path.into();
        if error.kind() == std::io::ErrorKind::PermissionDenied {
            return Self {
                message: format!("Permission denied: {}", path.display()),
                path,
                kind: WarningKind::PermissionDenied,
            };
        }
        Self {
            message: format!("Read error: {error}"),
            path,
            kind: WarningKind::ReadError,
        }
    }

    /// Create a loop warning.
    pub fn symlink_loop(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            message: format!("Already visited: {}", path.display()),
            path,
            kind: WarningKind::SymlinkLoop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_io() {
        let err = ScanError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, ScanError::PermissionDenied { .. }));
    }

    #[test]
    fn test_warning_from_io() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let warning = ScanWarning::from_io("/locked", &denied);
        assert_eq!(warning.kind, WarningKind::PermissionDenied);
        assert!(warning.message.contains("Permission denied"));

        let other = std::io::Error::other("disk on fire");
        assert_eq!(ScanWarning::from_io("/x", &other).kind, WarningKind::ReadError);
    }

    #[test]
    fn test_circuit_reason_display() {
        let err = ScanError::MemoryCircuitOpen {
            reason: CircuitOpenReason {
                memory_mb: 2100.0,
                limit_mb: 2048.0,
                trend_mb_per_sample: 12.5,
            },
        };
        assert!(err.to_string().contains("2100 MB of 2048 MB"));
        assert_eq!(err.circuit_reason().map(|r| r.limit_mb), Some(2048.0));
    }
}
