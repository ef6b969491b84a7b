//! Protocol-thread entry points.
//!
//! Every callback only enqueues a [`ProtocolEvent`] on a bounded channel; the
//! bus side handles it in [`super::Bridge::run`]. The `on_*` methods block
//! when the queue is full, which back-pressures the protocol thread rather
//! than dropping receipts. The run loop uses [`EventSink::try_forward`]
//! instead so it can keep serving its own queues while it waits.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::protocol::{IncomingAck, IncomingMessage, IncomingReceipt, ProtocolEvent};

/// The bus side stopped consuming protocol events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event bridge closed")]
pub struct SinkClosed;

/// Sending half of the protocol → bus event queue.
///
/// Must only be used from a non-async thread such as the protocol run loop.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ProtocolEvent>,
}

impl EventSink {
    /// Create a sink and the receiver the bridge consumes.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProtocolEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue any event.
    ///
    /// # Errors
    ///
    /// Returns [`SinkClosed`] if the bridge has stopped.
    pub fn forward(&self, event: ProtocolEvent) -> Result<(), SinkClosed> {
        self.tx.blocking_send(event).map_err(|_| SinkClosed)
    }

    /// Enqueue without waiting, handing the event back if the queue is full.
    ///
    /// # Errors
    ///
    /// [`TrySendError::Full`] carries the event for a later retry;
    /// [`TrySendError::Closed`] means the bridge has stopped.
    pub fn try_forward(&self, event: ProtocolEvent) -> Result<(), TrySendError<ProtocolEvent>> {
        self.tx.try_send(event)
    }

    /// An inbound text message arrived.
    ///
    /// # Errors
    ///
    /// Returns [`SinkClosed`] if the bridge has stopped.
    pub fn on_message(&self, message: IncomingMessage) -> Result<(), SinkClosed> {
        self.forward(ProtocolEvent::Message(message))
    }

    /// A delivery or read receipt arrived.
    ///
    /// # Errors
    ///
    /// Returns [`SinkClosed`] if the bridge has stopped.
    pub fn on_receipt(&self, receipt: IncomingReceipt) -> Result<(), SinkClosed> {
        self.forward(ProtocolEvent::Receipt(receipt))
    }

    /// A server acknowledgement arrived.
    ///
    /// # Errors
    ///
    /// Returns [`SinkClosed`] if the bridge has stopped.
    pub fn on_ack(&self, ack: IncomingAck) -> Result<(), SinkClosed> {
        self.forward(ProtocolEvent::Ack(ack))
    }

    /// The client connected.
    ///
    /// # Errors
    ///
    /// Returns [`SinkClosed`] if the bridge has stopped.
    pub fn on_connected(&self) -> Result<(), SinkClosed> {
        self.forward(ProtocolEvent::Connected)
    }

    /// The client lost its connection.
    ///
    /// # Errors
    ///
    /// Returns [`SinkClosed`] if the bridge has stopped.
    pub fn on_disconnected(&self, reason: impl Into<String>) -> Result<(), SinkClosed> {
        self.forward(ProtocolEvent::Disconnected {
            reason: reason.into(),
        })
    }
}
