//! Transport assembly: config → correlation backend → run loop → bridge.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::address::AddressNormalizer;
use crate::bridge::{Bridge, BridgeSettings, EventSink};
use crate::bus::{BusPublisher, OutboundMessage};
use crate::config::{Config, CorrelationBackendKind};
use crate::correlation::{CorrelationStore, KeyValueBackend, MemoryBackend, SqliteBackend};
use crate::lifecycle::{LifecycleController, LifecycleState, RunOutcome};
use crate::protocol::{MessageIdSource, ProtocolClient, SequentialIds};
use crate::status::StatusEdgeDetector;

/// Open the correlation backend selected in `config`.
///
/// # Errors
///
/// Returns an error if the SQLite database cannot be opened.
pub async fn open_backend(
    config: &Config,
    base_dir: &Path,
) -> anyhow::Result<Box<dyn KeyValueBackend>> {
    match config.correlation.backend {
        CorrelationBackendKind::Memory => Ok(Box::new(MemoryBackend::new())),
        CorrelationBackendKind::Sqlite => {
            let path = config.sqlite_path(base_dir);
            let backend = SqliteBackend::open(&path).await?;
            let purged = backend.purge_expired().await?;
            info!(path = %path.display(), purged, "sqlite correlation store opened");
            Ok(Box::new(backend))
        }
    }
}

/// A running WhatsApp transport.
pub struct WhatsAppTransport {
    controller: LifecycleController,
    bridge: Arc<Bridge>,
    bridge_task: JoinHandle<()>,
    outbound: mpsc::Sender<OutboundMessage>,
}

impl WhatsAppTransport {
    /// Start the protocol client and wait until it is connected.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be opened or the client fails to
    /// connect. The run loop is shut down before the error is returned.
    pub async fn setup<C: ProtocolClient>(
        config: &Config,
        base_dir: &Path,
        client: C,
        bus: Arc<dyn BusPublisher>,
    ) -> anyhow::Result<Self> {
        let backend = open_backend(config, base_dir).await?;
        Self::setup_with(config, backend, Arc::new(SequentialIds::new()), client, bus).await
    }

    /// Like [`Self::setup`] with an explicit backend and id source.
    ///
    /// # Errors
    ///
    /// Returns an error if the client fails to connect.
    pub async fn setup_with<C: ProtocolClient>(
        config: &Config,
        backend: Box<dyn KeyValueBackend>,
        ids: Arc<dyn MessageIdSource>,
        client: C,
        bus: Arc<dyn BusPublisher>,
    ) -> anyhow::Result<Self> {
        info!(
            phone = %config.whatsapp.phone,
            sidecar = %config.sidecar.base_url,
            "transport starting"
        );
        let settings = config.lifecycle.run_loop_settings();
        let correlations = Arc::new(
            CorrelationStore::new(backend, config.correlation.key_prefix.clone())
                .with_ttl(config.correlation.ttl()),
        );

        let mut controller = LifecycleController::new(settings);
        let (sink, events_rx) = EventSink::channel(settings.channel_capacity);
        let (outbound, outbound_rx) = mpsc::channel(settings.channel_capacity.max(1));

        let bridge = Arc::new(Bridge::new(
            AddressNormalizer::new(config.whatsapp.domain.clone()),
            correlations,
            Arc::new(StatusEdgeDetector::new()),
            ids,
            controller.handle(),
            bus,
            BridgeSettings {
                own_address: config.whatsapp.own_address(),
                echo_to: config.whatsapp.echo_to.clone(),
            },
        ));

        let runner = Arc::clone(&bridge);
        let bridge_task = tokio::spawn(async move { runner.run(events_rx, outbound_rx).await });

        if let Err(e) = controller.start(client, sink) {
            bridge_task.abort();
            return Err(e).context("failed to start protocol client");
        }

        let transport = Self {
            controller,
            bridge,
            bridge_task,
            outbound,
        };
        if let Err(e) = transport.controller.wait_connected().await {
            let outcome = transport.teardown().await;
            return Err(e).with_context(|| format!("protocol client did not connect: {outcome:?}"));
        }
        info!("transport ready");
        Ok(transport)
    }

    /// Queue for outbound bus messages.
    pub fn outbound(&self) -> mpsc::Sender<OutboundMessage> {
        self.outbound.clone()
    }

    /// The bridge handling events for this transport.
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.controller.state()
    }

    /// Send one outbound message directly, bypassing the queue.
    ///
    /// # Errors
    ///
    /// See [`Bridge::handle_outbound`].
    pub async fn handle_outbound(
        &self,
        message: &OutboundMessage,
    ) -> Result<String, crate::bridge::BridgeError> {
        self.bridge.handle_outbound(message).await
    }

    /// Stop the client, wait for the run loop and drain remaining events.
    pub async fn teardown(mut self) -> RunOutcome {
        self.controller.stop();
        let outcome = self.controller.join().await;
        drop(self.outbound);
        // The event sink went away with the run loop, so the bridge drains and exits.
        if let Err(e) = self.bridge_task.await {
            warn!(error = %e, "event bridge task failed");
        }
        outcome
    }
}

impl std::fmt::Debug for WhatsAppTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhatsAppTransport")
            .field("controller", &self.controller)
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}
