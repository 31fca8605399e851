//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use drivesync_protocol::{SyncEnvelope, SyncReply};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// A sync transport exchanges envelopes with the sync server.
///
/// This trait abstracts the network layer, allowing for different implementations
/// (HTTP, WebSocket, in-process for testing, etc.). Every request is
/// answered by exactly one [`SyncReply`]; gatekeeper refusals arrive as
/// `SyncReply::Rejected`, not as transport errors.
pub trait SyncTransport: Send + Sync {
    /// Establishes the connection.
    fn connect(&self) -> SyncResult<()>;

    /// Sends one request and waits for its reply.
    fn send(&self, envelope: &SyncEnvelope) -> SyncResult<SyncReply>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}

/// A mock transport for testing.
///
/// Replies are served from a queue in order; every envelope sent is
/// recorded.
#[derive(Debug, Default)]
pub struct MockTransport {
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    replies: Mutex<VecDeque<SyncResult<SyncReply>>>,
    sent: Mutex<Vec<SyncEnvelope>>,
}

impl MockTransport {
    /// Creates a new, disconnected mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply.
    pub fn push_reply(&self, reply: SyncReply) {
        self.replies.lock().push_back(Ok(reply));
    }

    /// Queues a transport failure.
    pub fn push_error(&self, error: SyncError) {
        self.replies.lock().push_back(Err(error));
    }

    /// Makes the next `connect` calls fail.
    pub fn refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every envelope sent so far.
    pub fn sent(&self) -> Vec<SyncEnvelope> {
        self.sent.lock().clone()
    }

    /// Replies not yet consumed.
    pub fn pending_replies(&self) -> usize {
        self.replies.lock().len()
    }
}

impl SyncTransport for MockTransport {
    fn connect(&self) -> SyncResult<()> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("connection refused"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send(&self, envelope: &SyncEnvelope) -> SyncResult<SyncReply> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.sent.lock().push(envelope.clone());
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Protocol("no mock reply queued".into())))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivesync_protocol::{Phase, Rejection, SyncMessage};

    fn envelope() -> SyncEnvelope {
        SyncEnvelope::new(Some(b"alice".to_vec()), None, SyncMessage::EndRequest)
    }

    #[test]
    fn mock_transport_connection() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());

        transport.connect().unwrap();
        assert!(transport.is_connected());

        transport.close().unwrap();
        assert!(!transport.is_connected());
    }

    #[test]
    fn mock_transport_refuses_connect() {
        let transport = MockTransport::new();
        transport.refuse_connect(true);
        assert!(transport.connect().unwrap_err().is_retryable());
        assert!(!transport.is_connected());
    }

    #[test]
    fn mock_transport_not_connected_error() {
        let transport = MockTransport::new();
        let result = transport.send(&envelope());
        assert!(matches!(result, Err(SyncError::NotConnected)));
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn mock_transport_serves_queue_in_order() {
        let transport = MockTransport::new();
        transport.connect().unwrap();
        transport.push_reply(SyncReply::Ok(SyncMessage::PhaseReport(Phase::Synced)));
        transport.push_reply(SyncReply::Rejected(Rejection::no_active_session()));

        assert!(transport.send(&envelope()).unwrap().into_result().is_ok());
        assert!(transport.send(&envelope()).unwrap().into_result().is_err());
        assert!(matches!(
            transport.send(&envelope()),
            Err(SyncError::Protocol(_))
        ));
        assert_eq!(transport.sent().len(), 3);
        assert_eq!(transport.pending_replies(), 0);
    }
}
