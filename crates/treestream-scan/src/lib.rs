//! Streaming scan engine for treestream.
//!
//! This crate walks a directory subtree with a pool of async workers and
//! streams every discovered entry as a [`ScanEvent`], while a
//! [`ScanController`] folds those events into one canonical tree that
//! callers can snapshot at any time.
//!
//! # Overview
//!
//! - **Worker pool** over a shared bounded job queue
//! - **Cooperative cancellation** via `CancellationToken`
//! - **Cycle protection** through a shared set of resolved paths
//! - **Lossy progress feed** that never stalls the walk
//!
//! # Example
//!
//! ```rust,no_run
//! use treestream_scan::{ScanConfig, ScanController};
//!
//! # async fn run() -> Result<(), treestream_scan::ScanError> {
//! let controller = ScanController::new(ScanConfig::default(), tokio::runtime::Handle::current());
//! controller.start_scan("/path/to/scan")?;
//!
//! loop {
//!     let events = controller.poll_stream(256);
//!     if events.iter().any(|e| e.is_done()) {
//!         break;
//!     }
//!     tokio::time::sleep(std::time::Duration::from_millis(50)).await;
//! }
//!
//! let tree = controller.poll_tree()?;
//! println!("{} entries", tree.subtree_len());
//! # Ok(())
//! # }
//! ```

mod controller;
mod delivery;
mod scanner;
mod visited;

pub use controller::{EVENT_FEED_CAPACITY, MAX_POLL_BATCH, ScanController};
pub use delivery::{Delivery, DeliveryPolicy};
pub use scanner::{ScanOutcome, Scanner, resolve_root};
pub use visited::VisitedPaths;

// Re-export core types for convenience
pub use treestream_core::{Node, NodeKind, ScanConfig, ScanError, ScanEvent, ScanTree};
