//! Scan session controller.
//!
//! A [`ScanController`] runs at most one scan at a time. Starting a scan
//! cancels the previous one, gives the new session a fresh canonical tree and
//! a fresh event feed, and returns immediately; the walk continues on the
//! runtime the controller was created with. Callers then poll:
//!
//! - [`ScanController::poll_stream`] drains buffered events for live feedback.
//! - [`ScanController::poll_tree`] returns a deep copy of the canonical tree.
//!
//! The feed is lossy. Node events that do not fit are dropped after
//! a short retry window, while the tree always receives every node, so the
//! tree is the source of truth and the feed is only a progress signal.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use treestream_core::{Node, ScanConfig, ScanError, ScanEvent, ScanTree};

use crate::delivery::{DeliveryPolicy, Feed};
use crate::scanner::{Scanner, resolve_root};

/// Buffered events between the session and its poller.
pub const EVENT_FEED_CAPACITY: usize = 1024;

/// Largest batch returned by one [`ScanController::poll_stream`] call.
pub const MAX_POLL_BATCH: usize = 1000;

/// Buffered events between the scan engine and the session's event sink.
const ENGINE_CHANNEL_CAPACITY: usize = 256;

/// A canonical tree shared between a session's event sink and its readers.
///
/// The sink holds the write lock for one `apply`; readers hold the read lock
/// only long enough to clone.
type LiveTree = Arc<RwLock<ScanTree>>;

/// State of the current (or last) session.
#[derive(Default)]
struct Session {
    root: Option<PathBuf>,
    cancel: Option<CancellationToken>,
    tree: Option<LiveTree>,
    feed: Option<mpsc::Receiver<ScanEvent>>,
    active: Option<Arc<AtomicBool>>,
}

/// Orchestrates one scan at a time over a canonical tree.
pub struct ScanController {
    scanner: Scanner,
    delivery: DeliveryPolicy,
    runtime: Handle,
    session: Mutex<Session>,
}

impl ScanController {
    /// Create a controller that spawns its scans on `runtime`.
    pub fn new(config: ScanConfig, runtime: Handle) -> Self {
        Self {
            scanner: Scanner::new(config),
            delivery: DeliveryPolicy::default(),
            runtime,
            session: Mutex::new(Session::default()),
        }
    }

    /// Replace the feed delivery policy used by subsequent scans.
    pub fn with_delivery(mut self, delivery: DeliveryPolicy) -> Self {
        self.delivery = delivery;
        self
    }

    /// The policy applied by this controller's scans.
    pub fn config(&self) -> &ScanConfig {
        self.scanner.config()
    }

    /// Begin a scan of `root`, cancelling any scan in progress.
    ///
    /// Fails without touching the current session if `root` is empty, cannot
    /// be resolved, or is not a directory.
    pub fn start_scan(&self, root: impl AsRef<Path>) -> Result<(), ScanError> {
        let (root, metadata) = resolve_root(root.as_ref())?;

        let mut session = self.session.lock();
        if let Some(previous) = session.cancel.take() {
            previous.cancel();
            debug!("Cancelled previous scan");
        }

        let cancel = CancellationToken::new();
        let tree: LiveTree = Arc::new(RwLock::new(ScanTree::new(Node::from_metadata(
            &root, &metadata,
        ))));
        let active = Arc::new(AtomicBool::new(true));
        let (engine_tx, engine_rx) = mpsc::channel(ENGINE_CHANNEL_CAPACITY);
        let (feed_tx, feed_rx) = mpsc::channel(EVENT_FEED_CAPACITY);

        info!("Starting scan of {}", root.display());

        let scanner = self.scanner.clone();
        let scan_cancel = cancel.clone();
        let scan_root = root.clone();
        self.runtime
            .spawn(async move { scanner.scan(scan_cancel, scan_root, engine_tx).await });
        self.runtime.spawn(pump_events(
            engine_rx,
            Arc::clone(&tree),
            feed_tx,
            self.delivery,
            Arc::clone(&active),
        ));

        *session = Session {
            root: Some(root),
            cancel: Some(cancel),
            tree: Some(tree),
            feed: Some(feed_rx),
            active: Some(active),
        };
        Ok(())
    }

    /// Start a new scan of the last root.
    pub fn rescan(&self) -> Result<(), ScanError> {
        let root = self.session.lock().root.clone().ok_or(ScanError::NoRootSet)?;
        self.start_scan(root)
    }

    /// Request cancellation of the current scan. Idempotent.
    ///
    /// The session winds down on its own and still delivers its terminal
    /// event through [`poll_stream`](Self::poll_stream).
    pub fn stop_scan(&self) {
        if let Some(cancel) = &self.session.lock().cancel {
            if !cancel.is_cancelled() {
                info!("Stopping scan");
            }
            cancel.cancel();
        }
    }

    /// Drain up to `max` buffered events without blocking.
    ///
    /// `max` is clamped to `1..=MAX_POLL_BATCH`, with 0 meaning the ceiling.
    /// Stops right after the terminal event. Returns an empty batch when no
    /// session is active or nothing is buffered.
    pub fn poll_stream(&self, max: usize) -> Vec<ScanEvent> {
        let max = if max == 0 { MAX_POLL_BATCH } else { max.min(MAX_POLL_BATCH) };

        let mut session = self.session.lock();
        let Some(feed) = session.feed.as_mut() else {
            return Vec::new();
        };

        let mut events = Vec::new();
        let mut closed = false;
        while events.len() < max {
            match feed.try_recv() {
                Ok(event) => {
                    let done = event.is_done();
                    events.push(event);
                    if done {
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        if closed {
            session.feed = None;
        }
        events
    }

    /// Deep copy of the canonical tree as of now.
    pub fn poll_tree(&self) -> Result<Node, ScanError> {
        let tree = self
            .session
            .lock()
            .tree
            .clone()
            .ok_or(ScanError::NoScanStarted)?;
        let snapshot = tree.read().snapshot();
        Ok(snapshot)
    }

    /// Root of the current (or last) session.
    pub fn root_path(&self) -> Option<PathBuf> {
        self.session.lock().root.clone()
    }

    /// Whether the current session is still processing events.
    pub fn is_scanning(&self) -> bool {
        self.session
            .lock()
            .active
            .as_ref()
            .is_some_and(|active| active.load(Ordering::Acquire))
    }
}

impl Drop for ScanController {
    fn drop(&mut self) {
        if let Some(cancel) = &self.session.get_mut().cancel {
            cancel.cancel();
        }
    }
}

/// Event sink of one session: applies node events to the tree, then forwards
/// them to the feed per `delivery`. A feed nobody drains costs at most one
/// retry window per congestion episode, so the tree keeps pace with the walk. The terminal event is forwarded once the
/// session is marked idle, after which the feed closes.
async fn pump_events(
    mut engine_rx: mpsc::Receiver<ScanEvent>,
    tree: LiveTree,
    feed: mpsc::Sender<ScanEvent>,
    delivery: DeliveryPolicy,
    active: Arc<AtomicBool>,
) {
    let mut feed = Feed::new(feed);
    // A closed engine channel without `Done` means the engine task died; the
    // feed still gets its terminal event.
    while let Some(event) = engine_rx.recv().await {
        if event.is_done() {
            break;
        }
        if let ScanEvent::Node { node } = &event {
            tree.write().apply(node);
        }
        let rule = delivery.for_event(&event);
        feed.deliver(event, rule).await;
    }

    active.store(false, Ordering::Release);
    feed.deliver(ScanEvent::Done, delivery.done).await;
    debug!("Scan session closed");
}
