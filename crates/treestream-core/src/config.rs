//! Scan policy.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// Workers spawned when the configured concurrency is lower.
pub const MIN_WORKERS: usize = 8;

const DEFAULT_SKIP_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    ".cache",
    "dist",
    "build",
    "out",
    "coverage",
    ".next",
    ".nuxt",
    ".svelte-kit",
    "venv",
    ".venv",
    "__pycache__",
    "target",
    ".idea",
    ".vscode",
];

const DEFAULT_SKIP_FILE_EXTS: &[&str] = &[".o", ".obj", ".class", ".pyc", ".so", ".dll", ".exe"];

/// Which entries a scan skips and how far it goes.
///
/// Every ceiling here is a silent policy drop: entries cut by depth, fan-out
/// or skip lists never produce an error event.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct ScanConfig {
    /// Directory names that are reported but never descended into
    /// (compared case-insensitively).
    #[builder(default = "default_skip_dirs()")]
    pub skip_dirs: Vec<String>,

    /// File extensions (with leading dot) that are not reported at all.
    #[builder(default = "default_skip_file_exts()")]
    pub skip_file_exts: Vec<String>,

    /// Do not descend into directories whose name starts with a dot.
    #[builder(default = "true")]
    pub skip_dot_dirs: bool,

    /// Do not report entries whose name starts with a dot.
    #[builder(default = "false")]
    pub skip_dot_files: bool,

    /// Number of directory levels below the root that are listed
    /// (None = unlimited). With `Some(1)` only the root is listed.
    #[builder(default = "Some(6)")]
    pub max_depth: Option<usize>,

    /// Entries read per directory before the rest is dropped (None = unlimited).
    #[builder(default = "Some(5000)")]
    pub max_entries_per_dir: Option<usize>,

    /// Resolve symlinks and traverse the ones pointing at directories.
    #[builder(default = "true")]
    pub follow_symlinks: bool,

    /// Number of concurrent workers (raised to [`MIN_WORKERS`]).
    #[builder(default = "16")]
    pub concurrency: usize,
}

fn default_skip_dirs() -> Vec<String> {
    DEFAULT_SKIP_DIRS.iter().map(|s| s.to_string()).collect()
}

fn default_skip_file_exts() -> Vec<String> {
    DEFAULT_SKIP_FILE_EXTS.iter().map(|s| s.to_string()).collect()
}

impl ScanConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(Some(0)) = self.max_entries_per_dir {
            return Err("max_entries_per_dir must be positive (use None for unlimited)".to_string());
        }
        if let Some(exts) = &self.skip_file_exts
            && let Some(bad) = exts.iter().find(|e| !e.starts_with('.'))
        {
            return Err(format!("skip_file_exts entry '{bad}' must start with '.'"));
        }
        Ok(())
    }
}

impl ScanConfig {
    /// Create a new scan config builder.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Check a config that did not come through the builder, e.g. one
    /// deserialized from a file.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.max_entries_per_dir == Some(0) {
            return Err(ScanError::InvalidConfig {
                message: "max_entries_per_dir must be positive (omit it for unlimited)".to_string(),
            });
        }
        if let Some(bad) = self.skip_file_exts.iter().find(|e| !e.starts_with('.')) {
            return Err(ScanError::InvalidConfig {
                message: format!("skip_file_exts entry '{bad}' must start with '.'"),
            });
        }
        Ok(())
    }

    /// Number of workers a scan spawns.
    pub fn worker_count(&self) -> usize {
        self.concurrency.max(MIN_WORKERS)
    }

    /// Check if a directory name is on the prune list.
    ///
    /// Names are compared after Unicode lowercasing, the same folding
    /// sibling order uses.
    pub fn should_prune_dir(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.skip_dirs.iter().any(|d| d.to_lowercase() == name)
    }

    /// Check if a directory is excluded from traversal by the hidden policy.
    pub fn should_skip_hidden_dir(&self, name: &str) -> bool {
        self.skip_dot_dirs && name.starts_with('.')
    }

    /// Check if an entry is dropped from listings by the hidden policy.
    pub fn should_skip_hidden_entry(&self, name: &str) -> bool {
        self.skip_dot_files && name.starts_with('.')
    }

    /// Check if a lowercased extension is on the skip list.
    pub fn should_skip_extension(&self, extension: &str) -> bool {
        !extension.is_empty()
            && self
                .skip_file_exts
                .iter()
                .any(|e| e.to_lowercase() == extension)
    }

    /// Check if a directory at `depth` (root = 0) gets listed.
    pub fn lists_depth(&self, depth: usize) -> bool {
        self.max_depth.is_none_or(|max| depth < max)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            skip_dirs: default_skip_dirs(),
            skip_file_exts: default_skip_file_exts(),
            skip_dot_dirs: true,
            skip_dot_files: false,
            max_depth: Some(6),
            max_entries_per_dir: Some(5000),
            follow_symlinks: true,
            concurrency: 16,
        }
    }
}
