//! Message bus records and the publisher contract.
//!
//! The bus itself (routing, queueing, persistence) is external. This module
//! defines the envelopes exchanged with it and two publishers: an in-process
//! channel and a JSON-lines stream.

pub mod channel;
pub mod stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::status::StatusObservation;

pub use channel::ChannelBus;
pub use stdio::{read_outbound_lines, JsonLinesBus};

/// Transport name stamped on inbound messages.
pub const TRANSPORT_NAME: &str = "whatsapp";

/// Transport type stamped on inbound messages.
pub const TRANSPORT_TYPE: &str = "whatsapp";

/// Errors publishing to the bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The bus side has gone away.
    #[error("bus closed")]
    Closed,

    /// Writing a record failed.
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded.
    #[error("bus encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An outbound message handed to the transport by the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Bus-assigned message id.
    pub message_id: String,
    /// Destination subscriber address.
    pub to_addr: String,
    /// Source address.
    pub from_addr: String,
    /// Text content; a missing body is sent as empty text.
    #[serde(default)]
    pub content: Option<String>,
}

/// An inbound message published to the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Bus-assigned id for this inbound message.
    pub message_id: String,
    /// Our own subscriber address.
    pub to_addr: String,
    /// Sender subscriber address.
    pub from_addr: String,
    /// Decoded text.
    pub content: String,
    /// Always [`TRANSPORT_NAME`].
    pub transport_name: String,
    /// Always [`TRANSPORT_TYPE`].
    pub transport_type: String,
    /// Protocol id of the inbound message.
    pub provider_message_id: String,
    /// RFC 3339 receive time.
    pub timestamp: String,
}

impl InboundMessage {
    /// Build an inbound message with a fresh id and the current time.
    pub fn new(
        to_addr: impl Into<String>,
        from_addr: impl Into<String>,
        content: impl Into<String>,
        provider_message_id: impl Into<String>,
    ) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().simple().to_string(),
            to_addr: to_addr.into(),
            from_addr: from_addr.into(),
            content: content.into(),
            transport_name: TRANSPORT_NAME.to_owned(),
            transport_type: TRANSPORT_TYPE.to_owned(),
            provider_message_id: provider_message_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Delivery report status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Reached the recipient.
    Delivered,
    /// Accepted but not yet delivered.
    Pending,
    /// Could not be delivered.
    Failed,
}

/// An event about an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum BusEvent {
    /// The protocol server accepted the message.
    Ack {
        /// Bus id of the original message.
        user_message_id: String,
        /// Protocol id it was sent under.
        sent_message_id: String,
    },
    /// The transport refused the message.
    Nack {
        /// Bus id of the original message.
        user_message_id: String,
        /// Why it was refused.
        nack_reason: String,
    },
    /// The recipient's device reported the message.
    DeliveryReport {
        /// Bus id of the original message.
        user_message_id: String,
        /// Reported status.
        delivery_status: DeliveryStatus,
    },
}

impl BusEvent {
    /// Bus id the event refers to.
    pub fn user_message_id(&self) -> &str {
        match self {
            Self::Ack {
                user_message_id, ..
            }
            | Self::Nack {
                user_message_id, ..
            }
            | Self::DeliveryReport {
                user_message_id, ..
            } => user_message_id,
        }
    }
}

/// Anything the transport publishes, as one tagged record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum BusRecord {
    /// Inbound message.
    Inbound(InboundMessage),
    /// Ack, nack or delivery report.
    Event(BusEvent),
    /// Status observation.
    Status(StatusObservation),
}

/// Publishing side of the message bus.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Publish one record.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the bus cannot accept the record.
    async fn publish(&self, record: BusRecord) -> Result<(), BusError>;

    /// Publish an inbound message.
    ///
    /// # Errors
    ///
    /// See [`Self::publish`].
    async fn publish_inbound(&self, message: InboundMessage) -> Result<(), BusError> {
        self.publish(BusRecord::Inbound(message)).await
    }

    /// Publish an ack, nack or delivery report.
    ///
    /// # Errors
    ///
    /// See [`Self::publish`].
    async fn publish_event(&self, event: BusEvent) -> Result<(), BusError> {
        self.publish(BusRecord::Event(event)).await
    }

    /// Publish a status observation.
    ///
    /// # Errors
    ///
    /// See [`Self::publish`].
    async fn publish_status(&self, status: StatusObservation) -> Result<(), BusError> {
        self.publish(BusRecord::Status(status)).await
    }
}
