use std::fmt;
use tokio::sync::broadcast;

/// Notifications emitted by the catalog and the scanner
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEvent {
    /// The catalog registered its collections
    Init,
    /// Scan progress in percent (0.0 to 100.0). Best effort: ticks may be
    /// dropped or coalesced by slow observers.
    Updating(f64),
    /// Terminal event of an update; exactly one per `update()` call
    Updated(bool),
    /// A record was added; carries its collection-relative path
    MediaAdded(String),
}

/// Receives catalog events. Implementations must not block for long:
/// they are called from the scanning thread.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: CatalogEvent);
}

impl<F> EventSink for F
where
    F: Fn(CatalogEvent) + Send + Sync,
{
    fn notify(&self, event: CatalogEvent) {
        self(event)
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn notify(&self, _event: CatalogEvent) {}
}

/// Fans events out to any number of tokio receivers.
///
/// A receiver that falls behind by more than the channel capacity loses
/// the oldest events (`RecvError::Lagged`), which is acceptable for
/// progress ticks.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<CatalogEvent>,
    capacity: usize,
}

impl fmt::Debug for BroadcastNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastNotifier")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastNotifier {
    fn notify(&self, event: CatalogEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}
