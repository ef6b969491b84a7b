//! JSON-lines bus: outbound messages in, published records out.
//!
//! Used by the `start` subcommand so the transport can sit behind any process
//! that speaks newline-delimited JSON.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::{BusError, BusPublisher, BusRecord, OutboundMessage};

/// Writes each record as one JSON line.
pub struct JsonLinesBus<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesBus<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> BusPublisher for JsonLinesBus<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn publish(&self, record: BusRecord) -> Result<(), BusError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Read outbound messages, one JSON object per line, until EOF.
///
/// Blank lines are skipped and malformed lines are logged and skipped.
/// Returns the number of messages forwarded.
///
/// # Errors
///
/// Returns an error if reading fails or the receiver is dropped.
pub async fn read_outbound_lines<R>(
    reader: R,
    tx: mpsc::Sender<OutboundMessage>,
) -> Result<usize, BusError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded: usize = 0;
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<OutboundMessage>(trimmed) {
            Ok(message) => {
                debug!(message_id = %message.message_id, "outbound message read");
                tx.send(message).await.map_err(|_| BusError::Closed)?;
                forwarded = forwarded.saturating_add(1);
            }
            Err(e) => {
                warn!(error = %e, "skipping malformed outbound line");
            }
        }
    }
    Ok(forwarded)
}
