//! Lifecycle events emitted by the sync engine.
//!
//! Callers observe a cycle through these events instead of return values
//! alone: a push can be acknowledged (`Completed`) and its markers cleared
//! even when a later step of the same cycle fails.
//!
//! ```rust,ignore
//! let events = engine.subscribe();
//! engine.request()?;
//!
//! while let Ok(record) = events.try_recv() {
//!     println!("{}: {:?}", record.sequence, record.event);
//! }
//! ```

use drivesync_protocol::RejectionCode;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// A client-observable engine event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The transport is established and the engine is idle.
    Connected,
    /// The upstream push was acknowledged; these paths had their marker
    /// cleared.
    Completed {
        /// Paths whose marker was cleared.
        cleared: Vec<String>,
    },
    /// A full downstream and upstream round trip finished.
    Synced,
    /// A step failed.
    Error {
        /// Gatekeeper code, `None` for transport and local failures.
        code: Option<RejectionCode>,
        /// Human-readable detail.
        message: String,
        /// Paths involved, for conflicts.
        paths: Vec<String>,
    },
    /// The transport was closed and the session token discarded.
    Disconnected,
}

impl SyncEvent {
    /// Returns true for [`SyncEvent::Error`].
    pub fn is_error(&self) -> bool {
        matches!(self, SyncEvent::Error { .. })
    }

    /// The rejection code carried by an error event.
    pub fn code(&self) -> Option<RejectionCode> {
        match self {
            SyncEvent::Error { code, .. } => *code,
            _ => None,
        }
    }
}

/// An event with its position in the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Monotonic sequence, starting at 1.
    pub sequence: u64,
    /// The event.
    pub event: SyncEvent,
}

/// Distributes engine events to subscribers and keeps a bounded history.
pub struct EventFeed {
    subscribers: RwLock<Vec<Sender<EventRecord>>>,
    history: RwLock<Vec<EventRecord>>,
    max_history: usize,
    next_sequence: AtomicU64,
}

impl EventFeed {
    /// Creates a new event feed.
    pub fn new() -> Self {
        Self::with_max_history(1024)
    }

    /// Creates an event feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Subscribes to every future event.
    pub fn subscribe(&self) -> Receiver<EventRecord> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event to all subscribers and returns its sequence.
    pub fn emit(&self, event: SyncEvent) -> u64 {
        // Hold the history lock while sending so subscribers see history order.
        let mut history = self.history.write();
        let record = EventRecord {
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
            event,
        };

        history.push(record.clone());
        if history.len() > self.max_history {
            let to_remove = history.len() - self.max_history;
            history.drain(0..to_remove);
        }

        self.subscribers
            .write()
            .retain(|tx| tx.send(record.clone()).is_ok());
        record.sequence
    }

    /// Events with a sequence greater than `cursor`, up to `limit`.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<EventRecord> {
        self.history
            .read()
            .iter()
            .filter(|record| record.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// The latest sequence in history.
    pub fn latest_sequence(&self) -> u64 {
        self.history
            .read()
            .last()
            .map(|record| record.sequence)
            .unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns the number of events in history.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(code: RejectionCode) -> SyncEvent {
        SyncEvent::Error {
            code: Some(code),
            message: String::new(),
            paths: Vec::new(),
        }
    }

    #[test]
    fn subscribers_receive_in_order() {
        let feed = EventFeed::new();
        let rx = feed.subscribe();

        feed.emit(SyncEvent::Connected);
        feed.emit(SyncEvent::Synced);

        assert_eq!(rx.recv().unwrap().event, SyncEvent::Connected);
        let second = rx.recv().unwrap();
        assert_eq!(second.event, SyncEvent::Synced);
        assert_eq!(second.sequence, 2);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let feed = EventFeed::new();
        let rx1 = feed.subscribe();
        let rx2 = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 2);

        drop(rx1);
        feed.emit(SyncEvent::Connected);
        assert_eq!(feed.subscriber_count(), 1);
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn history_is_bounded_and_pollable() {
        let feed = EventFeed::with_max_history(3);
        for _ in 0..5 {
            feed.emit(SyncEvent::Synced);
        }

        assert_eq!(feed.history_len(), 3);
        assert_eq!(feed.latest_sequence(), 5);

        let polled = feed.poll(3, 10);
        assert_eq!(
            polled.iter().map(|r| r.sequence).collect::<Vec<_>>(),
            vec![4, 5]
        );
        assert_eq!(feed.poll(0, 1).len(), 1);
    }

    #[test]
    fn error_events_expose_code() {
        assert!(error(RejectionCode::SessionLocked).is_error());
        assert_eq!(
            error(RejectionCode::OutOfOrder).code(),
            Some(RejectionCode::OutOfOrder)
        );
        assert_eq!(SyncEvent::Connected.code(), None);
    }
}
