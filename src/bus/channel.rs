//! In-process bus publisher backed by an unbounded channel.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{BusError, BusPublisher, BusRecord};

/// Forwards every record to an `mpsc` receiver.
#[derive(Debug, Clone)]
pub struct ChannelBus {
    tx: mpsc::UnboundedSender<BusRecord>,
}

impl ChannelBus {
    /// Create a publisher and the receiver that observes it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BusRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl BusPublisher for ChannelBus {
    async fn publish(&self, record: BusRecord) -> Result<(), BusError> {
        self.tx.send(record).map_err(|_| BusError::Closed)
    }
}
