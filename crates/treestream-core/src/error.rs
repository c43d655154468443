//! Error types for scanning operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced synchronously to the caller.
///
/// Failures on individual entries during a walk are not represented here;
/// they travel as [`ScanEvent::Error`](crate::ScanEvent::Error) and never
/// abort the scan.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The root path was empty.
    #[error("Root path is empty")]
    EmptyRoot,

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

    /// Root path is not a directory.
    #[error("Root path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// A tree was requested before any scan was started.
    #[error("No scan started")]
    NoScanStarted,

    /// A rescan was requested before any root was set.
    #[error("No root set")]
    NoRootSet,

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
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
}
