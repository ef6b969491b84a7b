//! Contract for the external WhatsApp protocol client.
//!
//! The client is driven from a dedicated thread by
//! [`crate::lifecycle::LifecycleController`]: it connects, then is polled for
//! events in a blocking loop, interleaved with outgoing stanzas queued by the
//! bus side. Wire encoding, encryption and the session handshake all live
//! behind this trait.

pub mod ids;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use ids::{MessageIdSource, SequentialIds};

/// Errors reported by a protocol client.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The initial connect or authentication failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// An operation needs a live connection.
    #[error("not connected")]
    NotConnected,

    /// A stanza could not be sent.
    #[error("send failed: {0}")]
    Send(String),

    /// The transport underneath the client failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Delivery or read receipt type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    /// The message reached the recipient's device.
    Delivery,
    /// The recipient opened the message.
    Read,
}

impl ReceiptKind {
    /// Wire name of the receipt type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivery => "delivery",
            Self::Read => "read",
        }
    }
}

/// A text message received from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Protocol-assigned id of the inbound message.
    pub id: String,
    /// Sender JID.
    pub from: String,
    /// Group participant JID, when the message was sent to a group.
    pub participant: Option<String>,
    /// Undecoded message body.
    pub body: Vec<u8>,
}

/// A receipt for a message this bridge sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingReceipt {
    /// Protocol id of the message the receipt refers to.
    pub id: String,
    /// JID the receipt came from.
    pub from: String,
    /// Delivery or read.
    pub kind: ReceiptKind,
}

/// A server acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingAck {
    /// Protocol id being acknowledged.
    pub id: String,
    /// Acknowledgement class; only `message` acks correlate to sends.
    pub class: String,
}

/// Acknowledgement class for sent messages.
pub const ACK_CLASS_MESSAGE: &str = "message";

/// Acknowledgement class used when confirming a receipt.
pub const ACK_CLASS_RECEIPT: &str = "receipt";

/// Something the protocol client reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// Inbound text message.
    Message(IncomingMessage),
    /// Delivery/read receipt.
    Receipt(IncomingReceipt),
    /// Server acknowledgement.
    Ack(IncomingAck),
    /// Connection established.
    Connected,
    /// Connection lost.
    Disconnected {
        /// Reason supplied by the client.
        reason: String,
    },
}

/// Something to hand down to the protocol client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingStanza {
    /// A text message with a pre-assigned id.
    Text {
        /// Protocol message id.
        id: String,
        /// Recipient JID.
        to: String,
        /// UTF-8 text body.
        body: String,
    },
    /// A receipt for an inbound message.
    Receipt {
        /// Id of the inbound message.
        id: String,
        /// Original sender JID.
        to: String,
        /// Receipt type.
        kind: ReceiptKind,
        /// Group participant, if any.
        participant: Option<String>,
    },
    /// An acknowledgement for an inbound receipt.
    Ack {
        /// Id carried by the receipt.
        id: String,
        /// Sender of the receipt.
        to: String,
        /// Acknowledgement class.
        class: String,
        /// Receipt type being acknowledged.
        kind: Option<ReceiptKind>,
    },
}

/// Result of one poll of the client.
#[derive(Debug)]
pub enum Poll {
    /// An event arrived.
    Event(ProtocolEvent),
    /// Nothing happened before the timeout.
    Idle,
    /// The client's stream ended cleanly.
    Closed,
}

/// Blocking WhatsApp protocol client.
///
/// Implementations are moved onto the run-loop thread and only touched there.
pub trait ProtocolClient: Send + 'static {
    /// Open the connection and authenticate.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Connect`] if the session cannot be established.
    fn connect(&mut self) -> Result<(), ProtocolError>;

    /// Begin an orderly disconnect. Events may still arrive afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the disconnect request cannot be issued.
    fn disconnect(&mut self) -> Result<(), ProtocolError>;

    /// Write a stanza to the network.
    ///
    /// # Errors
    ///
    /// Returns an error if the stanza cannot be written.
    fn send(&mut self, stanza: OutgoingStanza) -> Result<(), ProtocolError>;

    /// Service I/O for up to `timeout`, returning at most one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying transport fails irrecoverably.
    fn poll(&mut self, timeout: Duration) -> Result<Poll, ProtocolError>;
}
