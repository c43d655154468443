//! Events streamed by the scan engine.

use serde::{Deserialize, Serialize};

use crate::node::Node;

/// One unit of scan output.
///
/// A scan produces any number of `Node` and `Error` events followed by exactly
/// one `Done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ScanEvent {
    /// A discovered entry, children not populated.
    Node { node: Node },
    /// A per-entry failure; the walk continues.
    Error {
        #[serde(rename = "err")]
        message: String,
    },
    /// Terminal event.
    Done,
}

impl ScanEvent {
    /// Wrap a discovered node.
    pub fn node(node: Node) -> Self {
        Self::Node { node }
    }

    /// Create an error event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Check if this is the terminal event.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// The carried node, if any.
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node { node } => Some(node),
            _ => None,
        }
    }
}
