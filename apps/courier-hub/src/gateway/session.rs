//! Per-connection session state held by the hub.

use std::sync::Arc;

use courier_common::id::{prefixed_ulid, prefix};
use courier_common::Envelope;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outbound queue entries. Envelopes are shared between every recipient.
pub type OutboundRx = mpsc::Receiver<Arc<Envelope>>;

/// The hub's side of an authenticated connection: its id, the producer end
/// of its bounded outbound queue, and the signal that ends the connection
/// when the hub sheds it.
///
/// The hub holds the only sender, so dropping a `Session` closes the queue.
#[derive(Debug)]
pub struct Session {
    id: String,
    outbound: mpsc::Sender<Arc<Envelope>>,
    shed: CancellationToken,
}

impl Session {
    /// Create a session with an outbound queue of `capacity` envelopes.
    /// Returns the receiver the connection's outbound loop drains.
    pub fn new(capacity: usize) -> (Self, OutboundRx) {
        Self::with_id(prefixed_ulid(prefix::SESSION), capacity)
    }

    pub fn with_id(id: impl Into<String>, capacity: usize) -> (Self, OutboundRx) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let session = Self {
            id: id.into(),
            outbound,
            shed: CancellationToken::new(),
        };
        (session, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fires once the hub has shed this session. The connection must stop
    /// both loops and drop its socket without draining the queue.
    pub fn shed_signal(&self) -> CancellationToken {
        self.shed.clone()
    }

    /// Non-blocking enqueue. Fails when the queue is full or the connection
    /// has already stopped draining it.
    pub fn try_enqueue(
        &self,
        envelope: Arc<Envelope>,
    ) -> Result<(), mpsc::error::TrySendError<Arc<Envelope>>> {
        self.outbound.try_send(envelope)
    }

    /// Drop the session and tell its connection to go away.
    pub fn shed(self) {
        self.shed.cancel();
    }
}
