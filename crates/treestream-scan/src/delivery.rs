//! Delivery policy for the lossy event feed.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use tracing::debug;

use treestream_core::ScanEvent;

/// Retry window granted to a node event when the feed is full.
pub const NODE_RETRY_WINDOW: Duration = Duration::from_millis(10);

/// What to do with an event when the feed has no free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Discard the event.
    Drop,
    /// Wait up to the given duration for a slot, then discard.
    Retry(Duration),
    /// Wait until a slot frees up or the consumer goes away.
    Block,
}

/// Per-kind delivery rules for the progress feed.
///
/// The canonical tree is updated regardless of delivery, so dropping a node
/// event only thins the live feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Rule for node-discovered events.
    pub node: Delivery,
    /// Rule for scan-error events.
    pub error: Delivery,
    /// Rule for the terminal event.
    pub done: Delivery,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            node: Delivery::Retry(NODE_RETRY_WINDOW),
            error: Delivery::Drop,
            done: Delivery::Block,
        }
    }
}

impl DeliveryPolicy {
    /// Rule applying to `event`.
    pub fn for_event(&self, event: &ScanEvent) -> Delivery {
        match event {
            ScanEvent::Node { .. } => self.node,
            ScanEvent::Error { .. } => self.error,
            ScanEvent::Done => self.done,
        }
    }
}

/// Sending half of a session's feed.
///
/// A retry window is spent once per congestion episode: after a window
/// expires the feed counts as congested, and retried events are dropped
/// without waiting until a send goes through again.
pub(crate) struct Feed {
    tx: mpsc::Sender<ScanEvent>,
    congested: bool,
}

impl Feed {
    pub(crate) fn new(tx: mpsc::Sender<ScanEvent>) -> Self {
        Self {
            tx,
            congested: false,
        }
    }

    /// Push `event` into the feed following `delivery`.
    ///
    /// Returns whether the event was enqueued.
    pub(crate) async fn deliver(&mut self, event: ScanEvent, delivery: Delivery) -> bool {
        let event = match self.tx.try_send(event) {
            Ok(()) => {
                self.congested = false;
                return true;
            }
            Err(TrySendError::Closed(_)) => return false,
            Err(TrySendError::Full(event)) => event,
        };

        let sent = match delivery {
            Delivery::Drop => return false,
            Delivery::Retry(_) if self.congested => return false,
            Delivery::Retry(window) => {
                let sent = self.tx.send_timeout(event, window).await.is_ok();
                if !sent {
                    debug!("Event feed congested, dropping node events");
                }
                sent
            }
            Delivery::Block => self.tx.send(event).await.is_ok(),
        };
        self.congested = !sent;
        sent
    }
}
