//! Core types and traits for treestream.
//!
//! This crate provides the data structures shared by the scan engine and its
//! consumers: discovered nodes, scan events, the scan policy, and the
//! incremental tree builder that folds streamed nodes into one tree.

mod config;
mod error;
mod event;
mod node;
mod tree;

pub use config::{ScanConfig, ScanConfigBuilder};
pub use error::ScanError;
pub use event::ScanEvent;
pub use node::{Node, NodeKind, extension_of, is_hidden_name};
pub use tree::{ScanTree, sibling_order};
