//! File and directory node types.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use compact_str::{CompactString, format_compact};
use serde::{Deserialize, Serialize};

/// Type of file system node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Regular file (and anything else that is neither a directory nor a link).
    File,
    /// Directory.
    Dir,
    /// Symbolic link, classified without following it.
    Symlink,
}

impl NodeKind {
    /// Classify an `lstat` result.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let file_type = metadata.file_type();
        if file_type.is_symlink() {
            NodeKind::Symlink
        } else if file_type.is_dir() {
            NodeKind::Dir
        } else {
            NodeKind::File
        }
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, NodeKind::Dir)
    }

    /// Check if this is a symlink.
    pub fn is_symlink(&self) -> bool {
        matches!(self, NodeKind::Symlink)
    }
}

/// A single discovered filesystem entry.
///
/// Scan events carry nodes with `children` left empty; directories are filled
/// in later by [`ScanTree::apply`](crate::ScanTree::apply) as their entries
/// stream in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Base name.
    pub name: CompactString,

    /// Absolute path.
    pub path: PathBuf,

    /// Node type.
    #[serde(rename = "type")]
    pub kind: NodeKind,

    /// Size in bytes, 0 for directories.
    pub size: u64,

    /// Last modification time.
    #[serde(rename = "modified")]
    pub modified_at: DateTime<Utc>,

    /// Children, sorted directories-first then by case-insensitive name.
    /// `Some` exactly when `kind` is [`NodeKind::Dir`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Node>>,

    /// Whether the name marks the entry as hidden.
    pub is_hidden: bool,

    /// Lowercased extension including the leading dot, empty for directories.
    #[serde(default, skip_serializing_if = "CompactString::is_empty")]
    pub extension: CompactString,

    /// Set on symlinks whose resolved target is a directory.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_symlink_target_dir: bool,
}

impl Node {
    /// Build a node from an `lstat` result for `path`.
    pub fn from_metadata(path: impl Into<PathBuf>, metadata: &Metadata) -> Self {
        let path = path.into();
        let name = base_name(&path);
        let kind = NodeKind::from_metadata(metadata);
        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(UNIX_EPOCH));

        let (size, extension, children) = if kind.is_dir() {
            (0, CompactString::default(), Some(Vec::new()))
        } else {
            (metadata.len(), extension_of(&name), None)
        };

        Self {
            is_hidden: is_hidden_name(&name),
            name,
            path,
            kind,
            size,
            modified_at,
            children,
            extension,
            is_symlink_target_dir: false,
        }
    }

    /// Create an empty directory node standing in for a directory whose own
    /// discovery event has not arrived yet.
    pub fn placeholder_dir(
        name: impl Into<CompactString>,
        path: impl Into<PathBuf>,
        modified_at: DateTime<Utc>,
    ) -> Self {
        let name = name.into();
        Self {
            is_hidden: is_hidden_name(&name),
            name,
            path: path.into(),
            kind: NodeKind::Dir,
            size: 0,
            modified_at,
            children: Some(Vec::new()),
            extension: CompactString::default(),
            is_symlink_target_dir: false,
        }
    }

    /// Check if this node is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Direct children, empty for non-directories.
    pub fn children(&self) -> &[Node] {
        self.children.as_deref().unwrap_or_default()
    }

    /// Find a direct child by exact name.
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children().iter().find(|c| c.name == name)
    }

    /// Total number of nodes in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.children().iter().map(Node::subtree_len).sum::<usize>()
    }

    /// Visit every node of the subtree in depth-first pre-order.
    pub fn walk(&self, visit: &mut impl FnMut(&Node)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }
}

/// Hidden-entry naming convention: a leading dot.
pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

/// Lowercased extension of `name` with its leading dot (`"Photo.JPG"` →
/// `".jpg"`). Dotfiles such as `.bashrc` have no extension.
pub fn extension_of(name: &str) -> CompactString {
    Path::new(name)
        .extension()
        .map(|ext| format_compact!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn base_name(path: &Path) -> CompactString {
    path.file_name()
        .map(|n| CompactString::new(n.to_string_lossy()))
        .unwrap_or_else(|| CompactString::new(path.to_string_lossy()))
}
