//! treestream - concurrent directory scanner with a streamed, incrementally built tree.
//!
//! Usage:
//!   treestream tree [PATH]     Scan and print the finished tree
//!   treestream stream [PATH]   Print scan events as JSON lines while scanning
//!   treestream --help          Show help

mod config;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result};
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

use treestream_core::Node;
use treestream_scan::{ScanConfig, ScanController, ScanEvent};

use crate::config::{ScanArgs, load_config};

#[derive(Parser)]
#[command(
    name = "treestream",
    version,
    about = "Concurrent, cancellable directory scanner",
    long_about = "treestream walks a directory with a pool of workers and builds its tree \
                  incrementally.\n\nUse `treestream tree` for the finished tree or \
                  `treestream stream` to watch events as they arrive."
)]
struct Cli {
    /// Config file (defaults to <config dir>/treestream/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan and print the tree once the scan completes
    Tree {
        /// Path to scan
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,

        /// Number of entries to show per directory
        #[arg(short = 'n', long, default_value = "20")]
        top: usize,

        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Print scan events as JSON lines while the scan runs
    Stream {
        /// Path to scan
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Events drained per poll
        #[arg(long, default_value = "1000")]
        batch: usize,

        /// Milliseconds between polls
        #[arg(long, default_value = "50")]
        interval: u64,

        #[command(flatten)]
        scan: ScanArgs,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Tree {
            path,
            format,
            top,
            scan,
        } => {
            let config = scan.apply(base)?;
            run_tree(&path, config, format, top).await?;
        }
        Command::Stream {
            path,
            batch,
            interval,
            scan,
        } => {
            let config = scan.apply(base)?;
            run_stream(&path, config, batch, Duration::from_millis(interval)).await?;
        }
    }

    Ok(())
}

/// Scan to completion and print the folded tree.
async fn run_tree(path: &Path, config: ScanConfig, format: OutputFormat, top: usize) -> Result<()> {
    let controller = ScanController::new(config, Handle::current());
    controller
        .start_scan(path)
        .with_context(|| format!("Cannot scan {}", path.display()))?;

    eprintln!("Scanning {}...", path.display());
    let started = Instant::now();

    let mut nodes = 0usize;
    let mut errors = 0usize;
    'poll: loop {
        for event in controller.poll_stream(0) {
            match event {
                ScanEvent::Node { .. } => nodes += 1,
                ScanEvent::Error { message } => {
                    errors += 1;
                    tracing::warn!("{message}");
                }
                ScanEvent::Done => break 'poll,
            }
        }
        eprint!("\r {nodes} entries");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    eprintln!();

    let tree = controller.poll_tree()?;

    match format {
        OutputFormat::Text => {
            let (files, dirs) = count_kinds(&tree);
            println!("{}", "─".repeat(60));
            println!(" {} - {}", tree.path.display(), format_size(total_size(&tree)));
            println!(" {files} files, {dirs} directories");
            println!(" Scanned in {:.2}s", started.elapsed().as_secs_f64());
            println!("{}", "─".repeat(60));
            print_node(&tree, 0, top);

            if errors > 0 {
                println!();
                println!("{errors} error(s) during scan");
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&tree)?);
        }
    }

    Ok(())
}

/// Print every event as one JSON line until the scan completes.
async fn run_stream(path: &Path, config: ScanConfig, batch: usize, interval: Duration) -> Result<()> {
    let controller = ScanController::new(config, Handle::current());
    controller
        .start_scan(path)
        .with_context(|| format!("Cannot scan {}", path.display()))?;

    let stdout = std::io::stdout();
    loop {
        let events = controller.poll_stream(batch);
        let mut out = stdout.lock();
        let mut done = false;
        for event in &events {
            serde_json::to_writer(&mut out, event)?;
            writeln!(out)?;
            done |= event.is_done();
        }
        out.flush()?;
        drop(out);

        if done {
            return Ok(());
        }
        if events.is_empty() {
            tokio::time::sleep(interval).await;
        }
    }
}

/// Print a node and its children.
fn print_node(node: &Node, depth: usize, top: usize) {
    let indent = "  ".repeat(depth);
    let name = if depth == 0 {
        node.path.display().to_string()
    } else {
        node.name.to_string()
    };

    if node.is_dir() {
        println!(
            "{indent}▼ {:<40} {:>10} {:>6} items",
            truncate(&format!("{name}/"), 40),
            format_size(total_size(node)),
            node.children().len()
        );
    } else {
        println!(
            "{indent}  {:<40} {:>10}",
            truncate(&name, 40),
            format_size(node.size)
        );
    }

    let children = node.children();
    for child in children.iter().take(top) {
        print_node(child, depth + 1, top);
    }
    let remaining = children.len().saturating_sub(top);
    if remaining > 0 {
        println!("{indent}    ... and {remaining} more");
    }
}

/// Sum of file sizes below a node.
fn total_size(node: &Node) -> u64 {
    let mut total = 0;
    node.walk(&mut |n| {
        if !n.is_dir() {
            total += n.size;
        }
    });
    total
}

fn count_kinds(node: &Node) -> (usize, usize) {
    let (mut files, mut dirs) = (0, 0);
    node.walk(&mut |n| {
        if n.is_dir() {
            dirs += 1;
        } else {
            files += 1;
        }
    });
    (files, dirs)
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to max length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 1).collect();
        format!("{head}…")
    }
}
