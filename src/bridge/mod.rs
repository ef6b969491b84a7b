//! Bus-side handling of outbound messages and protocol events.
//!
//! [`Bridge`] is driven from a single task on the bus context. Outbound
//! messages get a protocol id, a correlation entry and a queued send; protocol
//! events are resolved against the correlation store and turned into bus
//! acks, delivery reports, inbound messages and status observations.
//!
//! Failures are contained here: a handler logs and reports status, it never
//! stops the loop.

pub mod sink;

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::address::{AddressError, AddressNormalizer};
use crate::bus::{BusEvent, BusPublisher, DeliveryStatus, InboundMessage, OutboundMessage};
use crate::correlation::{CorrelationError, CorrelationStore, StoreError};
use crate::lifecycle::{LifecycleError, ProtocolHandle};
use crate::protocol::{
    IncomingAck, IncomingMessage, IncomingReceipt, MessageIdSource, OutgoingStanza, ProtocolEvent,
    ReceiptKind, ACK_CLASS_MESSAGE, ACK_CLASS_RECEIPT,
};
use crate::status::{
    StatusEdgeDetector, StatusLevel, StatusObservation, COMPONENT_CONNECTION, COMPONENT_INBOUND,
    COMPONENT_OUTBOUND,
};

pub use sink::{EventSink, SinkClosed};

/// Errors from handling an outbound message.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The destination address could not be normalised.
    #[error(transparent)]
    InvalidAddress(#[from] AddressError),

    /// The correlation could not be recorded.
    #[error("correlation store failed: {0}")]
    Store(#[from] StoreError),

    /// The protocol run loop is not accepting work.
    #[error(transparent)]
    Protocol(#[from] LifecycleError),
}

/// Static settings for a bridge.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Our own subscriber address, e.g. `+27010203040`.
    pub own_address: String,
    /// If set, every inbound text is also sent to this address.
    pub echo_to: Option<String>,
}

/// Shared collaborators of a bridge.
pub struct Bridge {
    normalizer: AddressNormalizer,
    correlations: Arc<CorrelationStore>,
    status: Arc<StatusEdgeDetector>,
    ids: Arc<dyn MessageIdSource>,
    protocol: ProtocolHandle,
    bus: Arc<dyn BusPublisher>,
    settings: BridgeSettings,
}

impl Bridge {
    /// Assemble a bridge.
    pub fn new(
        normalizer: AddressNormalizer,
        correlations: Arc<CorrelationStore>,
        status: Arc<StatusEdgeDetector>,
        ids: Arc<dyn MessageIdSource>,
        protocol: ProtocolHandle,
        bus: Arc<dyn BusPublisher>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            normalizer,
            correlations,
            status,
            ids,
            protocol,
            bus,
            settings,
        }
    }

    /// The correlation store this bridge writes to.
    pub fn correlations(&self) -> &Arc<CorrelationStore> {
        &self.correlations
    }

    /// Process protocol events and outbound messages until the event queue closes.
    ///
    /// Events and outbound messages are each handled in arrival order. Once the
    /// outbound queue closes, remaining protocol events are still drained.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<ProtocolEvent>,
        mut outbound: mpsc::Receiver<OutboundMessage>,
    ) {
        let mut outbound_open = true;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                message = outbound.recv(), if outbound_open => match message {
                    Some(message) => {
                        // Errors are already reported as nack + status.
                        let _ = self.handle_outbound(&message).await;
                    }
                    None => {
                        debug!("outbound queue closed");
                        outbound_open = false;
                    }
                },
            }
        }
        info!("event bridge stopped");
    }

    /// Dispatch one protocol event to its handler.
    pub async fn handle_event(&self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::Message(message) => self.on_message(message).await,
            ProtocolEvent::Receipt(receipt) => self.on_receipt(receipt).await,
            ProtocolEvent::Ack(ack) => self.on_ack(ack).await,
            ProtocolEvent::Connected => self.on_connected().await,
            ProtocolEvent::Disconnected { reason } => self.on_disconnected(&reason).await,
        }
    }

    /// Send a bus message through the protocol client.
    ///
    /// The correlation is recorded before the send is queued. Returns the
    /// protocol id the message was sent under. On failure a nack and an
    /// `outbound` status are published before the error is returned.
    ///
    /// # Errors
    ///
    /// See [`BridgeError`].
    pub async fn handle_outbound(&self, message: &OutboundMessage) -> Result<String, BridgeError> {
        match self.send_outbound(message).await {
            Ok(protocol_id) => {
                info!(
                    message_id = %message.message_id,
                    protocol_id = %protocol_id,
                    "outbound message queued"
                );
                self.emit_status(StatusObservation::new(
                    COMPONENT_OUTBOUND,
                    StatusLevel::Ok,
                    "outbound_ok",
                    "Outbound messages are being sent",
                ))
                .await;
                Ok(protocol_id)
            }
            Err(e) => {
                warn!(message_id = %message.message_id, error = %e, "outbound message failed");
                self.publish_event(BusEvent::Nack {
                    user_message_id: message.message_id.clone(),
                    nack_reason: e.to_string(),
                })
                .await;
                self.emit_status(
                    StatusObservation::new(
                        COMPONENT_OUTBOUND,
                        StatusLevel::Degraded,
                        "outbound_error",
                        format!("Outbound message failed: {e}"),
                    )
                    .with_details(json!({ "message_id": message.message_id })),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn send_outbound(&self, message: &OutboundMessage) -> Result<String, BridgeError> {
        let to = self.normalizer.to_protocol(&message.to_addr)?;
        let protocol_id = self.ids.next_id();
        self.correlations
            .record_default(&protocol_id, &message.message_id)
            .await?;
        let queued = self
            .protocol
            .send(OutgoingStanza::Text {
                id: protocol_id.clone(),
                to,
                body: message.content.clone().unwrap_or_default(),
            })
            .await;
        if let Err(e) = queued {
            if let Err(store_err) = self.correlations.discard(&protocol_id).await {
                warn!(%protocol_id, error = %store_err, "failed to discard unsent correlation");
            }
            return Err(e.into());
        }
        Ok(protocol_id)
    }

    /// An inbound text message arrived.
    pub async fn on_message(&self, message: IncomingMessage) {
        let from_addr = match self.normalizer.to_subscriber(&message.from) {
            Ok(addr) => addr,
            Err(e) => {
                self.inbound_failed(&message.id, "invalid_address", &e.to_string())
                    .await;
                return;
            }
        };
        // No receipt unless the body decodes.
        let content = match String::from_utf8(message.body) {
            Ok(text) => text,
            Err(e) => {
                self.inbound_failed(&message.id, "decode_error", &e.to_string())
                    .await;
                return;
            }
        };

        let receipt = OutgoingStanza::Receipt {
            id: message.id.clone(),
            to: message.from.clone(),
            kind: ReceiptKind::Read,
            participant: message.participant.clone(),
        };
        if let Err(e) = self.protocol.send(receipt).await {
            warn!(protocol_id = %message.id, error = %e, "failed to queue read receipt");
        }

        if let Some(target) = &self.settings.echo_to {
            let echo = OutboundMessage {
                message_id: uuid::Uuid::new_v4().simple().to_string(),
                to_addr: target.clone(),
                from_addr: self.settings.own_address.clone(),
                content: Some(content.clone()),
            };
            // A failed echo is reported by handle_outbound and does not stop delivery.
            let _ = self.handle_outbound(&echo).await;
        }

        let inbound = InboundMessage::new(
            self.settings.own_address.clone(),
            from_addr,
            content,
            message.id.clone(),
        );
        match self.bus.publish_inbound(inbound).await {
            Ok(()) => {
                debug!(protocol_id = %message.id, "inbound message published");
                self.emit_status(StatusObservation::new(
                    COMPONENT_INBOUND,
                    StatusLevel::Ok,
                    "inbound_ok",
                    "Inbound messages are being received",
                ))
                .await;
            }
            Err(e) => {
                error!(protocol_id = %message.id, error = %e, "failed to publish inbound message");
            }
        }
    }

    async fn inbound_failed(&self, protocol_id: &str, kind: &str, reason: &str) {
        warn!(protocol_id, kind, reason, "dropping inbound message");
        self.emit_status(
            StatusObservation::new(
                COMPONENT_INBOUND,
                StatusLevel::Degraded,
                kind,
                format!("Inbound message dropped: {reason}"),
            )
            .with_details(json!({ "protocol_id": protocol_id, "reason": reason })),
        )
        .await;
    }

    /// A delivery or read receipt arrived for a message we sent.
    pub async fn on_receipt(&self, receipt: IncomingReceipt) {
        let ack = OutgoingStanza::Ack {
            id: receipt.id.clone(),
            to: receipt.from.clone(),
            class: ACK_CLASS_RECEIPT.to_owned(),
            kind: Some(receipt.kind),
        };
        if let Err(e) = self.protocol.send(ack).await {
            warn!(protocol_id = %receipt.id, error = %e, "failed to queue receipt ack");
        }

        match self.correlations.resolve_and_retire(&receipt.id).await {
            Ok(bus_id) => {
                debug!(protocol_id = %receipt.id, kind = receipt.kind.as_str(), "receipt resolved");
                self.publish_event(BusEvent::DeliveryReport {
                    user_message_id: bus_id,
                    delivery_status: DeliveryStatus::Delivered,
                })
                .await;
            }
            Err(e) => self.correlation_missed(&receipt.id, "receipt", &e),
        }
    }

    /// A server acknowledgement arrived. The correlation is kept for the receipt.
    pub async fn on_ack(&self, ack: IncomingAck) {
        if ack.class != ACK_CLASS_MESSAGE {
            debug!(protocol_id = %ack.id, class = %ack.class, "ignoring non-message ack");
            return;
        }
        match self.correlations.resolve(&ack.id).await {
            Ok(bus_id) => {
                self.publish_event(BusEvent::Ack {
                    user_message_id: bus_id,
                    sent_message_id: ack.id,
                })
                .await;
            }
            Err(e) => self.correlation_missed(&ack.id, "ack", &e),
        }
    }

    fn correlation_missed(&self, protocol_id: &str, event: &str, err: &CorrelationError) {
        if err.is_not_found() {
            debug!(protocol_id, event, "no correlation, dropping");
        } else {
            error!(protocol_id, event, error = %err, "correlation lookup failed");
        }
    }

    /// The protocol client connected.
    pub async fn on_connected(&self) {
        self.emit_status(StatusObservation::new(
            COMPONENT_CONNECTION,
            StatusLevel::Ok,
            "connected",
            "Connected",
        ))
        .await;
    }

    /// The protocol client lost its connection.
    pub async fn on_disconnected(&self, reason: &str) {
        self.emit_status(
            StatusObservation::new(
                COMPONENT_CONNECTION,
                StatusLevel::Down,
                "disconnected",
                format!("Disconnected: {reason}"),
            )
            .with_details(json!({ "reason": reason })),
        )
        .await;
    }

    async fn emit_status(&self, observation: StatusObservation) {
        if !self
            .status
            .check_status(&observation.component, observation.status)
        {
            return;
        }
        info!(
            component = %observation.component,
            status = %observation.status,
            kind = %observation.kind,
            "status changed"
        );
        if let Err(e) = self.bus.publish_status(observation).await {
            error!(error = %e, "failed to publish status");
        }
    }

    async fn publish_event(&self, event: BusEvent) {
        let user_message_id = event.user_message_id().to_owned();
        if let Err(e) = self.bus.publish_event(event).await {
            error!(message_id = %user_message_id, error = %e, "failed to publish event");
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("domain", &self.normalizer.domain())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
