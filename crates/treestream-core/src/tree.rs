//! Incremental tree builder.

use std::cmp::Ordering;
use std::ffi::OsStr;
use std::path::{Component, Path};

use compact_str::CompactString;

use crate::node::Node;

/// Sibling order: directories first, then case-insensitive name.
///
/// Names that differ only in case fall back to a byte-wise comparison, then to
/// the raw path, so the order is total.
pub fn sibling_order(a: &Node, b: &Node) -> Ordering {
    b.is_dir()
        .cmp(&a.is_dir())
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.path.cmp(&b.path))
}

/// One logical tree rooted at the scan root, grown one discovered node at a
/// time.
///
/// Nodes may arrive in any order. A node whose ancestors are still missing
/// materializes them as placeholder directories, which are reconciled when
/// their own discovery events arrive. Siblings are re-sorted on every
/// insertion, so the ordering invariant holds between any two `apply` calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTree {
    root: Node,
}

impl ScanTree {
    /// Create a tree consisting of the root node only.
    pub fn new(mut root: Node) -> Self {
        root.children.get_or_insert_with(Vec::new);
        Self { root }
    }

    /// The root node.
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Deep copy of the whole tree.
    pub fn snapshot(&self) -> Node {
        self.root.clone()
    }

    /// Consume the tree and return its root.
    pub fn into_root(self) -> Node {
        self.root
    }

    /// Merge one discovered node into the tree.
    ///
    /// Returns `false` when the node lies outside the root and was discarded.
    pub fn apply(&mut self, discovered: &Node) -> bool {
        let Some(segments) = relative_segments(&self.root.path, &discovered.path) else {
            return false;
        };

        let Some((last, parents)) = segments.split_last() else {
            self.root.size = discovered.size;
            self.root.modified_at = discovered.modified_at;
            return true;
        };

        let mut current = &mut self.root;
        for segment in parents {
            let parent_path = current.path.join(segment);
            let children = current.children.get_or_insert_with(Vec::new);
            let idx = match position_of(children, segment) {
                Some(idx) => idx,
                None => {
                    let placeholder = Node::placeholder_dir(
                        CompactString::new(segment.to_string_lossy()),
                        parent_path,
                        discovered.modified_at,
                    );
                    insert_sorted(children, placeholder)
                }
            };
            current = &mut children[idx];
            if !current.is_dir() {
                current.kind = crate::NodeKind::Dir;
                current.size = 0;
                current.extension = CompactString::default();
                current.children.get_or_insert_with(Vec::new);
            }
        }

        let children = current.children.get_or_insert_with(Vec::new);
        match position_of(children, last) {
            Some(idx) => {
                overwrite(&mut children[idx], discovered);
                children.sort_by(sibling_order);
            }
            None => {
                let mut fresh = discovered.clone();
                fresh.children = fresh.is_dir().then(Vec::new);
                insert_sorted(children, fresh);
            }
        }
        true
    }
}

/// Split `path` relative to `root` into raw name segments.
///
/// `None` if `path` is not under `root` or contains anything other than plain
/// names after the root prefix.
fn relative_segments<'a>(root: &Path, path: &'a Path) -> Option<Vec<&'a OsStr>> {
    let rel = path.strip_prefix(root).ok()?;
    rel.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| match c {
            Component::Normal(name) => Some(name),
            _ => None,
        })
        .collect()
}

/// Siblings are keyed by the raw file name, not the display name, so names
/// that are not valid UTF-8 stay distinct.
fn position_of(children: &[Node], name: &OsStr) -> Option<usize> {
    children
        .iter()
        .position(|c| c.path.file_name() == Some(name))
}

fn insert_sorted(children: &mut Vec<Node>, node: Node) -> usize {
    let path = node.path.clone();
    children.push(node);
    children.sort_by(sibling_order);
    children
        .iter()
        .position(|c| c.path == path)
        .unwrap_or(children.len() - 1)
}

fn overwrite(existing: &mut Node, discovered: &Node) {
    existing.kind = discovered.kind;
    existing.size = discovered.size;
    existing.modified_at = discovered.modified_at;
    existing.is_hidden = discovered.is_hidden;
    existing.extension = discovered.extension.clone();
    existing.is_symlink_target_dir = discovered.is_symlink_target_dir;
    if existing.is_dir() {
        existing.children.get_or_insert_with(Vec::new);
    } else {
        existing.children = None;
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::UNIX_EPOCH;

    use chrono::{DateTime, Utc};

    use super::*;
    use crate::NodeKind;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from(UNIX_EPOCH)
    }

    fn node(path: &str, kind: NodeKind, size: u64) -> Node {
        let path = PathBuf::from(path);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let mut node = Node::placeholder_dir(name.as_str(), path, epoch());
        node.kind = kind;
        node.size = size;
        if !kind.is_dir() {
            node.children = None;
            node.extension = crate::extension_of(&name);
        }
        node
    }

    fn names(node: &Node) -> Vec<&str> {
        node.children().iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_root_event_updates_only_size_and_mtime() {
        let mut tree = ScanTree::new(node("/r", NodeKind::Dir, 0));
        tree.apply(&node("/r/a.txt", NodeKind::File, 3));

        let mut root_event = node("/r", NodeKind::Dir, 4096);
        root_event.modified_at = epoch() + chrono::Duration::seconds(5);
        assert!(tree.apply(&root_event));

        assert_eq!(tree.root().size, 4096);
        assert_eq!(tree.root().modified_at, root_event.modified_at);
        assert_eq!(names(tree.root()), vec!["a.txt"]);
    }

    #[test]
    fn test_out_of_root_node_is_discarded() {
        let mut tree = ScanTree::new(node("/r", NodeKind::Dir, 0));
        assert!(!tree.apply(&node("/elsewhere/x", NodeKind::File, 1)));
        assert!(!tree.apply(&node("/r/../escape", NodeKind::File, 1)));
        assert!(tree.root().children().is_empty());
    }

    #[test]
    fn test_directories_sort_before_files() {
        let mut tree = ScanTree::new(node("/r", NodeKind::Dir, 0));
        tree.apply(&node("/r/a.txt", NodeKind::File, 10));
        tree.apply(&node("/r/b", NodeKind::Dir, 0));
        tree.apply(&node("/r/C.md", NodeKind::File, 1));
        tree.apply(&node("/r/A", NodeKind::Dir, 0));

        assert_eq!(names(tree.root()), vec!["A", "b", "a.txt", "C.md"]);
    }

    #[test]
    fn test_deep_child_creates_placeholders() {
        let mut tree = ScanTree::new(node("/r", NodeKind::Dir, 0));
        tree.apply(&node("/r/x/y/z.txt", NodeKind::File, 7));

        let x = tree.root().child("x").unwrap();
        assert!(x.is_dir());
        assert_eq!(x.path, PathBuf::from("/r/x"));
        let y = x.child("y").unwrap();
        assert_eq!(y.child("z.txt").unwrap().size, 7);

        // The real event for `x` reconciles the placeholder without losing children.
        let mut real_x = node("/r/x", NodeKind::Dir, 0);
        real_x.is_hidden = false;
        tree.apply(&real_x);
        let x = tree.root().child("x").unwrap();
        assert_eq!(names(x), vec!["y"]);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut tree = ScanTree::new(node("/r", NodeKind::Dir, 0));
        let file = node("/r/b/c.txt", NodeKind::File, 5);
        tree.apply(&file);
        let once = tree.clone();
        tree.apply(&file);
        assert_eq!(tree, once);
    }

    #[test]
    fn test_overwrite_updates_fields_in_place() {
        let mut tree = ScanTree::new(node("/r", NodeKind::Dir, 0));
        tree.apply(&node("/r/f", NodeKind::File, 1));
        tree.apply(&node("/r/f", NodeKind::File, 99));

        assert_eq!(tree.root().children().len(), 1);
        assert_eq!(tree.root().child("f").unwrap().size, 99);
    }

    #[test]
    fn test_new_directory_has_empty_children() {
        let mut tree = ScanTree::new(node("/r", NodeKind::Dir, 0));
        tree.apply(&node("/r/node_modules", NodeKind::Dir, 0));
        assert_eq!(
            tree.root().child("node_modules").unwrap().children,
            Some(Vec::new())
        );
    }

    #[test]
    fn test_case_variants_are_distinct_siblings() {
        let mut tree = ScanTree::new(node("/r", NodeKind::Dir, 0));
        tree.apply(&node("/r/readme", NodeKind::File, 1));
        tree.apply(&node("/r/README", NodeKind::File, 2));
        assert_eq!(names(tree.root()), vec!["README", "readme"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_names_stay_distinct() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let raw_node = |bytes: &[u8], size: u64| {
            let path = Path::new("/r/dir").join(OsStr::from_bytes(bytes));
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            let mut node = node("/r/dir/placeholder", NodeKind::File, size);
            node.name = name.into();
            node.path = path;
            node
        };

        let mut tree = ScanTree::new(node("/r", NodeKind::Dir, 0));
        let first = raw_node(b"a\xff", 1);
        let second = raw_node(b"a\xfe", 2);
        tree.apply(&first);
        tree.apply(&second);
        tree.apply(&first);

        let dir = tree.root().child("dir").unwrap();
        assert_eq!(dir.path, PathBuf::from("/r/dir"));
        assert_eq!(dir.children().len(), 2);
        let mut paths: Vec<&Path> = dir.children().iter().map(|c| c.path.as_path()).collect();
        paths.sort();
        let mut expected = vec![first.path.as_path(), second.path.as_path()];
        expected.sort();
        assert_eq!(paths, expected);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut tree = ScanTree::new(node("/r", NodeKind::Dir, 0));
        tree.apply(&node("/r/a", NodeKind::File, 1));
        let snap = tree.snapshot();
        tree.apply(&node("/r/b", NodeKind::File, 1));

        assert_eq!(snap.children().len(), 1);
        assert_eq!(tree.root().children().len(), 2);
    }
}
