//! Wire format of events returned by the sidecar's `/events/poll` endpoint.

use base64::Engine as _;
use serde::Deserialize;

use super::SidecarError;
use crate::protocol::{IncomingAck, IncomingMessage, IncomingReceipt, ProtocolEvent, ReceiptKind};

/// An event reported by the sidecar.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum SidecarEvent {
    /// An inbound message. The body is base64 so undecodable payloads survive transit.
    #[serde(rename = "message")]
    Message {
        /// Protocol id of the message.
        id: String,
        /// Sender JID.
        jid: String,
        /// Group participant JID, if any.
        #[serde(default)]
        participant: Option<String>,
        /// Base64-encoded body bytes.
        body_b64: String,
    },
    /// A delivery or read receipt.
    #[serde(rename = "receipt")]
    Receipt {
        /// Protocol id the receipt refers to.
        id: String,
        /// JID the receipt came from.
        jid: String,
        /// `delivery` when absent.
        #[serde(default)]
        receipt_type: Option<ReceiptKind>,
    },
    /// A server acknowledgement.
    #[serde(rename = "ack")]
    Ack {
        /// Protocol id being acknowledged.
        id: String,
        /// Acknowledgement class.
        class: String,
    },
    /// WhatsApp connection established.
    #[serde(rename = "connected")]
    Connected,
    /// WhatsApp connection lost.
    #[serde(rename = "disconnected")]
    Disconnected {
        /// Human-readable reason, if available.
        #[serde(default)]
        reason: Option<String>,
    },
    /// The sidecar closed the session for good.
    #[serde(rename = "closed")]
    Closed,
}

impl SidecarEvent {
    /// Convert into a protocol event. `Ok(None)` means the stream has closed.
    ///
    /// # Errors
    ///
    /// Returns [`SidecarError::MalformedEvent`] if a message body is not valid base64.
    pub fn into_protocol_event(self) -> Result<Option<ProtocolEvent>, SidecarError> {
        let event = match self {
            Self::Message {
                id,
                jid,
                participant,
                body_b64,
            } => {
                let body = base64::engine::general_purpose::STANDARD
                    .decode(body_b64.as_bytes())
                    .map_err(|e| SidecarError::MalformedEvent(format!("message {id}: {e}")))?;
                ProtocolEvent::Message(IncomingMessage {
                    id,
                    from: jid,
                    participant,
                    body,
                })
            }
            Self::Receipt {
                id,
                jid,
                receipt_type,
            } => ProtocolEvent::Receipt(IncomingReceipt {
                id,
                from: jid,
                kind: receipt_type.unwrap_or(ReceiptKind::Delivery),
            }),
            Self::Ack { id, class } => ProtocolEvent::Ack(IncomingAck { id, class }),
            Self::Connected => ProtocolEvent::Connected,
            Self::Disconnected { reason } => ProtocolEvent::Disconnected {
                reason: reason.unwrap_or_else(|| "unknown".to_owned()),
            },
            Self::Closed => return Ok(None),
        };
        Ok(Some(event))
    }
}
