//! Config file loading and command-line overrides.

use std::path::{Path, PathBuf};

use clap::Args;
use color_eyre::eyre::{Context, Result};
use tracing::debug;

use treestream_core::ScanConfig;

/// Location of the per-user config file, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("treestream").join("config.toml"))
}

/// Load the scan policy from `explicit`, else from the per-user config file
/// when it exists, else the stock policy.
pub fn load_config(explicit: Option<&Path>) -> Result<ScanConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.is_file() => path,
            _ => return Ok(ScanConfig::default()),
        },
    };

    debug!(path = %path.display(), "Loading config");
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    parse_config(&text).with_context(|| format!("Invalid config {}", path.display()))
}

/// Parse a TOML config; missing keys keep the stock policy.
pub fn parse_config(text: &str) -> Result<ScanConfig> {
    let config: ScanConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
}

/// Scan policy flags shared by every subcommand.
#[derive(Debug, Default, Args)]
pub struct ScanArgs {
    /// Levels below the root that are listed
    #[arg(short = 'd', long, conflicts_with = "unlimited_depth")]
    pub max_depth: Option<usize>,

    /// List every level
    #[arg(long)]
    pub unlimited_depth: bool,

    /// Entries read per directory before the rest is dropped
    #[arg(long)]
    pub max_entries: Option<usize>,

    /// Number of concurrent workers
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Report symlinks without traversing them
    #[arg(long)]
    pub no_follow_symlinks: bool,

    /// Descend into directories whose name starts with a dot
    #[arg(long)]
    pub hidden_dirs: bool,

    /// Leave out entries whose name starts with a dot
    #[arg(long)]
    pub skip_dot_files: bool,

    /// Extra directory name to report but not descend into (repeatable)
    #[arg(long = "skip-dir", value_name = "NAME")]
    pub skip_dirs: Vec<String>,

    /// Extra file extension to leave out, with leading dot (repeatable)
    #[arg(long = "skip-ext", value_name = "EXT")]
    pub skip_exts: Vec<String>,
}

impl ScanArgs {
    /// Apply the flags on top of a loaded config and re-check it.
    pub fn apply(&self, mut config: ScanConfig) -> Result<ScanConfig> {
        if self.unlimited_depth {
            config.max_depth = None;
        } else if let Some(depth) = self.max_depth {
            config.max_depth = Some(depth);
        }
        if let Some(limit) = self.max_entries {
            config.max_entries_per_dir = Some(limit);
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if self.no_follow_symlinks {
            config.follow_symlinks = false;
        }
        if self.hidden_dirs {
            config.skip_dot_dirs = false;
        }
        if self.skip_dot_files {
            config.skip_dot_files = true;
        }
        config.skip_dirs.extend(self.skip_dirs.iter().cloned());
        config.skip_file_exts.extend(self.skip_exts.iter().cloned());

        config.validate()?;
        Ok(config)
    }
}
