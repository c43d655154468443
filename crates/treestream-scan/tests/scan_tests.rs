use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use treestream_scan::{Node, NodeKind, ScanConfig, ScanController, ScanEvent, Scanner};

async fn wait_for_done(controller: &ScanController) -> Vec<ScanEvent> {
    let mut events = Vec::new();
    for _ in 0..1000 {
        let batch = controller.poll_stream(0);
        let done = batch.iter().any(ScanEvent::is_done);
        events.extend(batch);
        if done {
            return events;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("scan did not finish");
}

async fn scan_raw(scanner: &Scanner, root: std::path::PathBuf) -> Vec<ScanEvent> {
    let (tx, mut rx) = mpsc::channel(64);
    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    });
    scanner.scan(CancellationToken::new(), root, tx).await;
    collector.await.unwrap()
}

fn names(node: &Node) -> Vec<&str> {
    node.children().iter().map(|c| c.name.as_str()).collect()
}

fn assert_sorted(node: &Node) {
    for pair in node.children().windows(2) {
        assert!(
            treestream_core::sibling_order(&pair[0], &pair[1]).is_lt(),
            "{} should sort before {}",
            pair[0].name,
            pair[1].name
        );
    }
    node.children().iter().for_each(assert_sorted);
}

fn build_wide_tree(root: &Path, dirs: usize, files: usize) {
    for d in 0..dirs {
        let dir = root.join(format!("dir{d:03}"));
        fs::create_dir(&dir).unwrap();
        for f in 0..files {
            fs::write(dir.join(format!("file{f:03}.txt")), "content").unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hidden_file_scenario() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::write(root.join("a.txt"), "0123456789").unwrap();
    fs::create_dir(root.join("b")).unwrap();
    fs::write(root.join("b/.secret"), "shh").unwrap();

    let controller = ScanController::new(ScanConfig::default(), Handle::current());
    controller.start_scan(root).unwrap();
    wait_for_done(&controller).await;

    let tree = controller.poll_tree().unwrap();
    assert_eq!(names(&tree), vec!["b", "a.txt"]);

    let b = tree.child("b").unwrap();
    assert_eq!(b.kind, NodeKind::Dir);
    let a = tree.child("a.txt").unwrap();
    assert_eq!(a.kind, NodeKind::File);
    assert_eq!(a.size, 10);
    assert_eq!(a.extension, ".txt");

    let secret = b.child(".secret").unwrap();
    assert!(secret.is_hidden);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pruned_directory_is_listed_but_empty() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
    fs::write(root.join("node_modules/pkg/index.js"), "module.exports = {}").unwrap();

    let config = ScanConfig::builder()
        .skip_dirs(vec!["node_modules".to_string()])
        .build()
        .unwrap();
    let controller = ScanController::new(config, Handle::current());
    controller.start_scan(root).unwrap();
    wait_for_done(&controller).await;

    let tree = controller.poll_tree().unwrap();
    let modules = tree.child("node_modules").unwrap();
    assert_eq!(modules.children, Some(Vec::new()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_depth_ceiling_of_one() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("d1/d2")).unwrap();
    fs::write(root.join("d1/inner.txt"), "x").unwrap();
    fs::write(root.join("top.txt"), "x").unwrap();

    let config = ScanConfig::builder().max_depth(Some(1)).build().unwrap();
    let outcome = Scanner::new(config).collect(root).await.unwrap();

    let tree = outcome.tree;
    assert_eq!(names(&tree), vec!["d1", "top.txt"]);
    assert_eq!(tree.child("d1").unwrap().children, Some(Vec::new()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_all_paths_under_root_and_sorted() {
    let temp = TempDir::new().unwrap();
    build_wide_tree(temp.path(), 12, 12);
    fs::create_dir_all(temp.path().join("dir000/Nested/deeper")).unwrap();
    fs::write(temp.path().join("dir000/Nested/deeper/Z.md"), "z").unwrap();

    let config = ScanConfig::builder().max_depth(None::<usize>).build().unwrap();
    let outcome = Scanner::new(config).collect(temp.path()).await.unwrap();
    let root_path = temp.path().canonicalize().unwrap();

    let mut count = 0;
    outcome.tree.walk(&mut |node| {
        count += 1;
        assert!(node.path.starts_with(&root_path));
    });
    // root + 12 dirs + 144 files + Nested + deeper + Z.md
    assert_eq!(count, 1 + 12 + 144 + 3);
    assert_sorted(&outcome.tree);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_scan_yields_done_and_nothing_after() {
    let temp = TempDir::new().unwrap();
    build_wide_tree(temp.path(), 40, 40);

    let controller = ScanController::new(ScanConfig::default(), Handle::current());
    controller.start_scan(temp.path()).unwrap();
    controller.stop_scan();
    controller.stop_scan();

    let events = wait_for_done(&controller).await;
    assert_eq!(events.iter().filter(|e| e.is_done()).count(), 1);
    assert!(events.last().unwrap().is_done());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(controller.poll_stream(0).is_empty());
    assert!(!controller.is_scanning());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_mid_scan() {
    let first = TempDir::new().unwrap();
    build_wide_tree(first.path(), 30, 30);
    let second = TempDir::new().unwrap();
    fs::write(second.path().join("only.txt"), "x").unwrap();

    let controller = ScanController::new(ScanConfig::default(), Handle::current());
    controller.start_scan(first.path()).unwrap();
    controller.start_scan(second.path()).unwrap();

    let events = wait_for_done(&controller).await;
    let second_root = second.path().canonicalize().unwrap();
    for node in events.iter().filter_map(ScanEvent::as_node) {
        assert!(node.path.starts_with(&second_root));
    }

    let tree = controller.poll_tree().unwrap();
    assert_eq!(tree.path, second_root);
    assert_eq!(names(&tree), vec!["only.txt"]);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_symlink_cycle_terminates() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().canonicalize().unwrap();
    fs::create_dir(root.join("a")).unwrap();
    fs::write(root.join("a/file.txt"), "x").unwrap();
    std::os::unix::fs::symlink(&root, root.join("a/loop")).unwrap();

    let config = ScanConfig::builder()
        .follow_symlinks(true)
        .max_depth(None::<usize>)
        .build()
        .unwrap();
    let scanner = Scanner::new(config);
    let outcome = tokio::time::timeout(Duration::from_secs(10), scanner.collect(&root))
        .await
        .expect("scan must terminate")
        .unwrap();

    let a = outcome.tree.child("a").unwrap();
    assert_eq!(names(a), vec!["file.txt", "loop"]);
    let link = a.child("loop").unwrap();
    assert_eq!(link.kind, NodeKind::Symlink);
    assert!(link.is_symlink_target_dir);
    assert!(link.children.is_none());
    assert_eq!(outcome.tree.subtree_len(), 4);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_symlink_not_resolved_when_following_disabled() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::create_dir(root.join("real")).unwrap();
    std::os::unix::fs::symlink(root.join("real"), root.join("alias")).unwrap();

    let config = ScanConfig::builder().follow_symlinks(false).build().unwrap();
    let outcome = Scanner::new(config).collect(root).await.unwrap();

    let alias = outcome.tree.child("alias").unwrap();
    assert_eq!(alias.kind, NodeKind::Symlink);
    assert!(!alias.is_symlink_target_dir);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_events_serialize_as_json_lines() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a.txt"), "x").unwrap();

    let controller = ScanController::new(ScanConfig::default(), Handle::current());
    controller.start_scan(temp.path()).unwrap();
    let events = wait_for_done(&controller).await;

    for event in &events {
        let json = serde_json::to_value(event).unwrap();
        assert!(json["kind"] == "node" || json["kind"] == "error" || json["kind"] == "done");
    }
    assert_eq!(serde_json::to_value(events.last().unwrap()).unwrap()["kind"], "done");
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_symlink_to_sibling_directory_is_listed_once() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().canonicalize().unwrap();
    fs::create_dir(root.join("real")).unwrap();
    fs::write(root.join("real/one.txt"), "1").unwrap();
    fs::write(root.join("real/two.txt"), "22").unwrap();
    std::os::unix::fs::symlink(root.join("real"), root.join("alias")).unwrap();

    let scanner = Scanner::new(ScanConfig::builder().follow_symlinks(true).build().unwrap());
    let events = scan_raw(&scanner, root.clone()).await;

    for name in ["one.txt", "two.txt"] {
        let sightings = events
            .iter()
            .filter_map(ScanEvent::as_node)
            .filter(|n| n.path == root.join("real").join(name))
            .count();
        assert_eq!(sightings, 1, "{name} listed more than once");
    }
    assert!(
        !events
            .iter()
            .filter_map(ScanEvent::as_node)
            .any(|n| n.path.starts_with(root.join("alias")) && n.path != root.join("alias"))
    );

    let outcome = scanner.collect(&root).await.unwrap();
    let alias = outcome.tree.child("alias").unwrap();
    assert_eq!(alias.kind, NodeKind::Symlink);
    assert!(alias.is_symlink_target_dir);
    assert!(alias.children.is_none());
    assert_eq!(names(outcome.tree.child("real").unwrap()), vec!["one.txt", "two.txt"]);
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_non_utf8_names_are_kept_apart() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let temp = TempDir::new().unwrap();
    let root = temp.path().canonicalize().unwrap();
    let first = root.join(OsStr::from_bytes(b"a\xff"));
    let second = root.join(OsStr::from_bytes(b"a\xfe"));
    fs::write(&first, "1").unwrap();
    fs::write(&second, "22").unwrap();

    let outcome = Scanner::new(ScanConfig::default()).collect(&root).await.unwrap();

    let children = outcome.tree.children();
    assert_eq!(children.len(), 2);
    for child in children {
        assert!(child.path.exists(), "{} not on disk", child.path.display());
    }
    let mut sizes: Vec<u64> = children.iter().map(|c| c.size).collect();
    sizes.sort();
    assert_eq!(sizes, vec![1, 2]);
}
