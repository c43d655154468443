//! Work-queue driven parallel directory scanner.

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use compact_str::CompactString;
use tokio::fs;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use treestream_core::{
    Node, NodeKind, ScanConfig, ScanError, ScanEvent, ScanTree, extension_of,
};

use crate::visited::VisitedPaths;

/// Capacity of the shared job queue. Jobs that do not fit stay with the
/// worker that produced them.
const JOB_QUEUE_CAPACITY: usize = 1024;

/// Capacity of the event channel used by [`Scanner::collect`].
const COLLECT_CHANNEL_CAPACITY: usize = 256;

/// Validate a scan root and return its canonical path and metadata.
///
/// Fails if the path is empty, cannot be resolved, or is not a directory.
pub fn resolve_root(path: &Path) -> Result<(PathBuf, Metadata), ScanError> {
    if path.as_os_str().is_empty() {
        return Err(ScanError::EmptyRoot);
    }
    let root = path.canonicalize().map_err(|e| ScanError::io(path, e))?;
    let metadata = std::fs::metadata(&root).map_err(|e| ScanError::io(&root, e))?;
    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory { path: root });
    }
    Ok((root, metadata))
}

/// Result of a scan run to completion with [`Scanner::collect`].
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// The folded tree.
    pub tree: Node,
    /// Per-entry failures reported during the walk.
    pub errors: Vec<String>,
}

/// Parallel streaming scanner.
///
/// Cheap to clone; clones share the same policy.
#[derive(Debug, Clone)]
pub struct Scanner {
    config: Arc<ScanConfig>,
}

impl Scanner {
    /// Create a scanner applying `config`.
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// The policy this scanner applies.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Walk the subtree at `root`, sending one event per discovered entry.
    ///
    /// Always finishes with exactly one [`ScanEvent::Done`], including when
    /// `cancel` fires or the root itself cannot be read. No event follows it.
    /// Cancellation is observed at queue and send boundaries; a filesystem
    /// call already in flight runs to completion first.
    pub async fn scan(
        &self,
        cancel: CancellationToken,
        root: PathBuf,
        events: mpsc::Sender<ScanEvent>,
    ) {
        self.run_jobs(cancel, vec![Job { path: root, depth: 0 }], events)
            .await;
    }

    /// Walk outward from `seeds` until the queue drains or `cancel` fires.
    async fn run_jobs(
        &self,
        cancel: CancellationToken,
        seeds: Vec<Job>,
        events: mpsc::Sender<ScanEvent>,
    ) {
        // The queue is sized to hold every seed.
        let (jobs, queue) = mpsc::channel(JOB_QUEUE_CAPACITY.max(seeds.len()));
        let pending = AtomicUsize::new(seeds.len());
        for seed in seeds {
            let _ = jobs.try_send(seed);
        }

        let walk = Arc::new(Walk {
            config: Arc::clone(&self.config),
            cancel: cancel.child_token(),
            drained: CancellationToken::new(),
            events: events.clone(),
            visited: VisitedPaths::new(),
            pending,
            jobs,
            queue: Mutex::new(queue),
        });

        let mut workers = JoinSet::new();
        let worker_count = self.config.worker_count();
        for _ in 0..worker_count {
            workers.spawn(Arc::clone(&walk).run_worker());
        }

        tokio::select! {
            _ = walk.cancel.cancelled() => debug!("Scan cancelled"),
            _ = walk.drained.cancelled() => debug!("Scan queue drained"),
        }
        // Idle workers wait on `drained`; release them on the cancel path too.
        walk.drained.cancel();

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                warn!("Scan worker failed: {err}");
            }
        }

        debug!("Scan finished, {} directories listed", walk.visited.len());
        let _ = events.send(ScanEvent::Done).await;
    }

    /// Run a whole scan of `root` and fold its events into a tree.
    pub async fn collect(&self, root: impl AsRef<Path>) -> Result<ScanOutcome, ScanError> {
        let (root, metadata) = resolve_root(root.as_ref())?;
        let (tx, mut rx) = mpsc::channel(COLLECT_CHANNEL_CAPACITY);

        let mut tree = ScanTree::new(Node::from_metadata(&root, &metadata));
        let mut errors = Vec::new();

        let scan = self.scan(CancellationToken::new(), root, tx);
        let fold = async {
            while let Some(event) = rx.recv().await {
                match event {
                    ScanEvent::Node { node } => {
                        tree.apply(&node);
                    }
                    ScanEvent::Error { message } => errors.push(message),
                    ScanEvent::Done => break,
                }
            }
        };
        tokio::join!(scan, fold);

        Ok(ScanOutcome {
            tree: tree.into_root(),
            errors,
        })
    }
}

/// A directory waiting to be processed.
#[derive(Debug)]
struct Job {
    path: PathBuf,
    depth: usize,
}

/// One entry of a directory listing.
struct Listed {
    name: CompactString,
    path: PathBuf,
    is_dir: bool,
}

/// State shared by the workers of a single scan.
struct Walk {
    config: Arc<ScanConfig>,
    cancel: CancellationToken,
    /// Fired once no job is queued or in progress.
    drained: CancellationToken,
    events: mpsc::Sender<ScanEvent>,
    visited: VisitedPaths,
    /// Jobs enqueued but not yet finished.
    pending: AtomicUsize,
    jobs: mpsc::Sender<Job>,
    queue: Mutex<mpsc::Receiver<Job>>,
}

impl Walk {
    async fn run_worker(self: Arc<Self>) {
        let mut overflow = Vec::new();
        loop {
            let job = match overflow.pop() {
                Some(job) => job,
                None => {
                    let next = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => None,
                        _ = self.drained.cancelled() => None,
                        job = async { self.queue.lock().await.recv().await } => job,
                    };
                    match next {
                        Some(job) => job,
                        None => break,
                    }
                }
            };

            if self.cancel.is_cancelled() {
                break;
            }
            self.process(job, &mut overflow).await;
            self.finish_job();
        }
    }

    fn enqueue(&self, job: Job, overflow: &mut Vec<Job>) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(err) = self.jobs.try_send(job) {
            overflow.push(err.into_inner());
        }
    }

    fn finish_job(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.cancel();
        }
    }

    /// Send an event unless the scan is cancelled. Returns `false` when the
    /// current job should stop.
    async fn emit(&self, event: ScanEvent) -> bool {
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            sent = self.events.send(event) => sent,
        };
        if sent.is_err() {
            debug!("Event receiver dropped, stopping scan");
            self.cancel.cancel();
            return false;
        }
        true
    }

    async fn report(&self, op: &str, path: &Path, err: io::Error) -> bool {
        warn!("{op} failed: {}: {err}", path.display());
        self.emit(ScanEvent::error(format!("{op} failed: {}: {err}", path.display())))
            .await
    }

    async fn process(&self, job: Job, overflow: &mut Vec<Job>) {
        let metadata = match fs::symlink_metadata(&job.path).await {
            Ok(metadata) => metadata,
            Err(err) => {
                self.report("stat", &job.path, err).await;
                return;
            }
        };

        let node = Node::from_metadata(&job.path, &metadata);
        let name = node.name.clone();
        let is_dir = node.is_dir();
        if !self.emit(ScanEvent::node(node)).await || !is_dir {
            return;
        }

        // The root is listed regardless of its own name.
        if job.depth > 0
            && (self.config.should_prune_dir(&name) || self.config.should_skip_hidden_dir(&name))
        {
            debug!("Pruned {}", job.path.display());
            return;
        }
        if !self.config.lists_depth(job.depth) {
            return;
        }

        let real = fs::canonicalize(&job.path)
            .await
            .unwrap_or_else(|_| job.path.clone());
        if !self.visited.insert(real) {
            debug!("Already visited {}", job.path.display());
            return;
        }

        let entries = match self.list(&job.path).await {
            Ok(entries) => entries,
            Err(err) => {
                self.report("readDir", &job.path, err).await;
                return;
            }
        };

        let child_depth = job.depth + 1;
        let descend = self.config.lists_depth(child_depth);

        for entry in entries {
            if self.config.should_skip_hidden_entry(&entry.name) {
                continue;
            }
            if !entry.is_dir && self.config.should_skip_extension(&extension_of(&entry.name)) {
                continue;
            }

            let metadata = match fs::symlink_metadata(&entry.path).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    if !self.report("stat", &entry.path, err).await {
                        return;
                    }
                    continue;
                }
            };

            let mut node = Node::from_metadata(&entry.path, &metadata);
            let mut next = None;
            match node.kind {
                NodeKind::Dir => {
                    let traversable = !self.config.should_prune_dir(&entry.name)
                        && !self.config.should_skip_hidden_dir(&entry.name);
                    if descend && traversable {
                        next = Some(entry.path.clone());
                    }
                }
                NodeKind::Symlink if self.config.follow_symlinks => {
                    if let Some(target) = resolve_dir_target(&entry.path).await {
                        node.is_symlink_target_dir = true;
                        if descend {
                            next = Some(target);
                        }
                    }
                }
                _ => {}
            }

            if !self.emit(ScanEvent::node(node)).await {
                return;
            }
            if let Some(path) = next {
                self.enqueue(
                    Job {
                        path,
                        depth: child_depth,
                    },
                    overflow,
                );
            }
        }
    }

    /// Read a directory, keep the first entries by name up to the entry
    /// limit, and sort them directories-first, then by case-insensitive name.
    async fn list(&self, dir: &Path) -> io::Result<Vec<Listed>> {
        let mut read_dir = fs::read_dir(dir).await?;
        let mut raw = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            raw.push(entry);
        }

        raw.sort_by_key(|entry| entry.file_name());
        if let Some(limit) = self.config.max_entries_per_dir
            && raw.len() > limit
        {
            debug!(
                "Truncated listing of {} from {} to {limit} entries",
                dir.display(),
                raw.len()
            );
            raw.truncate(limit);
        }

        let mut entries = Vec::with_capacity(raw.len());
        for entry in raw {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            entries.push(Listed {
                name: CompactString::new(entry.file_name().to_string_lossy()),
                path: entry.path(),
                is_dir,
            });
        }

        entries.sort_by(|a, b| {
            b.is_dir
                .cmp(&a.is_dir)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(entries)
    }
}

/// Resolve a symlink and return its real target if that is a directory.
async fn resolve_dir_target(link: &Path) -> Option<PathBuf> {
    let target = fs::canonicalize(link).await.ok()?;
    let metadata = fs::metadata(&target).await.ok()?;
    metadata.is_dir().then_some(target)
}
