//! Resolved-path tracking for cycle protection.

use std::path::PathBuf;

use dashmap::DashSet;

/// Tracks directories already claimed for listing during one scan.
///
/// Keys are real (symlink-free) paths, so a directory reached both directly
/// and through one or more symlinks is listed once. Insertion is atomic: when
/// several workers race on the same path, exactly one of them wins.
#[derive(Debug, Default)]
pub struct VisitedPaths {
    seen: DashSet<PathBuf>,
}

impl VisitedPaths {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            seen: DashSet::new(),
        }
    }

    /// Claim a path. Returns `true` if this is the first time seeing it.
    pub fn insert(&self, path: impl Into<PathBuf>) -> bool {
        self.seen.insert(path.into())
    }

    /// Get the number of claimed paths.
    pub fn len(&self) -> usize {
        self.seen.len()
    }
}
