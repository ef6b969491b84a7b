//! Lifecycle of the protocol client's run loop.
//!
//! The client runs on its own OS thread: it connects, then alternates between
//! draining queued work and polling the client for events, which are forwarded
//! to the bus side through an [`EventSink`]. The loop returns a [`RunOutcome`]
//! instead of unwinding, so a requested shutdown is distinguishable from a
//! failure.
//!
//! Work arrives on two lanes. Stanzas use a bounded queue; disconnect and
//! terminate use an unbounded control lane that is always checked first, so
//! `stop()` and `kill()` get through however full the stanza queue is. The
//! run loop never parks on a full event queue: it keeps serving both lanes
//! until the bridge makes room.
//!
//! State transitions:
//!
//! ```text
//! idle -> starting -> connected -> stopping -> stopped
//!            \___________\__________________-> killed
//! ```

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::bridge::EventSink;
use crate::protocol::{OutgoingStanza, Poll, ProtocolClient, ProtocolError, ProtocolEvent};

/// Default time between `stop()` issuing a disconnect and forcing termination.
pub const DEFAULT_KILL_DELAY: Duration = Duration::from_secs(1);

/// Default poll timeout of the run loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default capacity of the stanza and event queues.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Pause between attempts to hand an event to a full event queue.
const FORWARD_RETRY: Duration = Duration::from_millis(1);

/// Name given to the run-loop thread.
const RUN_LOOP_THREAD_NAME: &str = "whatsapp-run-loop";

/// Lifecycle state of the bridge's single protocol session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not started.
    Idle,
    /// Run loop spawned, connect in progress.
    Starting,
    /// Connected and servicing I/O.
    Connected,
    /// Disconnect requested; termination scheduled.
    Stopping,
    /// Run loop has exited.
    Stopped,
    /// Terminated by [`LifecycleController::kill`].
    Killed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Connected => "connected",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Killed => "killed",
        };
        f.write_str(s)
    }
}

/// How the run loop ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The client closed its stream, or the bus side went away.
    Completed,
    /// The forced-termination signal was processed ("client done").
    Terminated,
    /// The client failed.
    Failed(ProtocolError),
}

impl RunOutcome {
    /// Whether the loop ended because shutdown was requested.
    pub fn is_client_done(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// Errors from the lifecycle controller.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// `start()` was called on a controller that is not idle.
    #[error("protocol client already started (state: {0})")]
    AlreadyStarted(LifecycleState),

    /// The run-loop thread could not be spawned.
    #[error("failed to spawn run loop: {0}")]
    Spawn(#[from] std::io::Error),

    /// The run loop ended before reaching `connected`.
    #[error("protocol client did not connect (state: {0})")]
    NotConnected(LifecycleState),

    /// The run loop is gone and can no longer accept commands.
    #[error("protocol run loop is not running")]
    RunLoopGone,
}

/// Shutdown signals, delivered ahead of any queued stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlSignal {
    Disconnect,
    Terminate,
}

/// Receiving ends owned by the run loop.
#[derive(Debug)]
struct Lanes {
    control: mpsc::UnboundedReceiver<ControlSignal>,
    stanzas: mpsc::Receiver<OutgoingStanza>,
}

/// Tuning for the run loop.
#[derive(Debug, Clone, Copy)]
pub struct RunLoopSettings {
    /// Poll timeout per iteration.
    pub poll_interval: Duration,
    /// Delay between disconnect and forced termination on `stop()`.
    pub kill_delay: Duration,
    /// Capacity of the stanza queue.
    pub channel_capacity: usize,
}

impl Default for RunLoopSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            kill_delay: DEFAULT_KILL_DELAY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Cloneable handle for queueing stanzas onto the run loop.
#[derive(Debug, Clone)]
pub struct ProtocolHandle {
    tx: mpsc::Sender<OutgoingStanza>,
}

impl ProtocolHandle {
    /// Queue a stanza. Waits for queue capacity only, never for the send.
    ///
    /// The run loop drains this queue even while its own events are backed
    /// up, so the wait is always bounded by the loop's progress.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::RunLoopGone`] once the run loop has exited.
    pub async fn send(&self, stanza: OutgoingStanza) -> Result<(), LifecycleError> {
        self.tx
            .send(stanza)
            .await
            .map_err(|_| LifecycleError::RunLoopGone)
    }
}

/// Owns the single protocol run loop of a bridge instance.
pub struct LifecycleController {
    state: Arc<watch::Sender<LifecycleState>>,
    stanzas: mpsc::Sender<OutgoingStanza>,
    control: mpsc::UnboundedSender<ControlSignal>,
    lanes: Option<Lanes>,
    done: Option<oneshot::Receiver<RunOutcome>>,
    settings: RunLoopSettings,
}

impl LifecycleController {
    /// Create an idle controller.
    pub fn new(settings: RunLoopSettings) -> Self {
        let (stanzas, stanza_rx) = mpsc::channel(settings.channel_capacity.max(1));
        let (control, control_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            state: Arc::new(state),
            stanzas,
            control,
            lanes: Some(Lanes {
                control: control_rx,
                stanzas: stanza_rx,
            }),
            done: None,
            settings,
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Handle for queueing outgoing stanzas.
    pub fn handle(&self) -> ProtocolHandle {
        ProtocolHandle {
            tx: self.stanzas.clone(),
        }
    }

    /// Spawn the run loop for `client`, forwarding its events to `events`.
    ///
    /// Valid exactly once per controller.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::AlreadyStarted`] on a second call, or
    /// [`LifecycleError::Spawn`] if the thread cannot be created.
    pub fn start<C: ProtocolClient>(
        &mut self,
        client: C,
        events: EventSink,
    ) -> Result<(), LifecycleError> {
        let current = self.state();
        if current != LifecycleState::Idle {
            return Err(LifecycleError::AlreadyStarted(current));
        }
        let lanes = self
            .lanes
            .take()
            .ok_or(LifecycleError::AlreadyStarted(current))?;

        self.state.send_replace(LifecycleState::Starting);
        info!("starting protocol client");

        let (done_tx, done_rx) = oneshot::channel();
        let state = Arc::clone(&self.state);
        let poll_interval = self.settings.poll_interval;

        let spawned = std::thread::Builder::new()
            .name(RUN_LOOP_THREAD_NAME.to_owned())
            .spawn(move || {
                let outcome = run_loop(client, lanes, &events, &state, poll_interval);
                state.send_modify(|s| {
                    if *s != LifecycleState::Killed {
                        *s = LifecycleState::Stopped;
                    }
                });
                // The controller may already be gone during teardown.
                let _ = done_tx.send(outcome);
            });

        if let Err(e) = spawned {
            self.state.send_replace(LifecycleState::Stopped);
            return Err(LifecycleError::Spawn(e));
        }
        self.done = Some(done_rx);
        Ok(())
    }

    /// Wait until the client is connected, or until it can no longer connect.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::NotConnected`] if the controller was never started or
    /// the run loop left `starting` for anything but `connected`.
    pub async fn wait_connected(&self) -> Result<(), LifecycleError> {
        let mut rx = self.state.subscribe();
        let current = *rx.borrow_and_update();
        if current == LifecycleState::Idle {
            return Err(LifecycleError::NotConnected(current));
        }
        let settled = rx
            .wait_for(|s| *s != LifecycleState::Starting)
            .await
            .map(|s| *s)
            .unwrap_or(LifecycleState::Stopped);
        if settled == LifecycleState::Connected {
            Ok(())
        } else {
            Err(LifecycleError::NotConnected(settled))
        }
    }

    /// Request an orderly shutdown.
    ///
    /// Signals a disconnect and, after the kill delay, the forced-termination
    /// signal. Safe before `connected`; a no-op once stopping or stopped.
    /// Must be called from within a Tokio runtime.
    pub fn stop(&self) {
        let mut previous = LifecycleState::Idle;
        let changed = self.state.send_if_modified(|s| {
            previous = *s;
            match *s {
                LifecycleState::Idle => {
                    *s = LifecycleState::Stopped;
                    true
                }
                LifecycleState::Starting | LifecycleState::Connected => {
                    *s = LifecycleState::Stopping;
                    true
                }
                LifecycleState::Stopping | LifecycleState::Stopped | LifecycleState::Killed => {
                    false
                }
            }
        });
        if !changed {
            debug!(state = %previous, "stop ignored");
            return;
        }
        if previous == LifecycleState::Idle {
            info!("protocol client stopped before start");
            return;
        }

        info!(from = %previous, "stopping protocol client");
        if self.control.send(ControlSignal::Disconnect).is_err() {
            return;
        }
        let control = self.control.clone();
        let kill_delay = self.settings.kill_delay;
        tokio::spawn(async move {
            tokio::time::sleep(kill_delay).await;
            if control.send(ControlSignal::Terminate).is_err() {
                debug!("run loop exited before forced termination");
            }
        });
    }

    /// Force the run loop to terminate without a disconnect.
    pub fn kill(&self) {
        let mut previous = LifecycleState::Idle;
        let changed = self.state.send_if_modified(|s| {
            previous = *s;
            if matches!(*s, LifecycleState::Stopped | LifecycleState::Killed) {
                false
            } else {
                *s = LifecycleState::Killed;
                true
            }
        });
        if !changed {
            return;
        }
        warn!(from = %previous, "killing protocol client");
        // The run loop may already have exited on its own.
        let _ = self.control.send(ControlSignal::Terminate);
    }

    /// Wait for the run loop to exit and report how it ended.
    ///
    /// A requested termination is logged at info level, any failure at error
    /// level. Returns [`RunOutcome::Completed`] if no loop was ever started or
    /// it has already been joined.
    pub async fn join(&mut self) -> RunOutcome {
        let Some(done) = self.done.take() else {
            return RunOutcome::Completed;
        };
        let outcome = done.await.unwrap_or_else(|_| {
            RunOutcome::Failed(ProtocolError::Transport(
                "run loop exited without reporting".to_owned(),
            ))
        });
        match &outcome {
            RunOutcome::Terminated => info!("protocol client done"),
            RunOutcome::Completed => info!("protocol client stream closed"),
            RunOutcome::Failed(e) => error!(error = %e, "protocol client failed"),
        }
        outcome
    }
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Body of the run-loop thread.
fn run_loop<C: ProtocolClient>(
    mut client: C,
    mut lanes: Lanes,
    events: &EventSink,
    state: &watch::Sender<LifecycleState>,
    poll_interval: Duration,
) -> RunOutcome {
    if let Err(e) = client.connect() {
        return RunOutcome::Failed(e);
    }
    // A stop() that raced the connect wins: no connected event in that case.
    let promoted = state.send_if_modified(|s| {
        if *s == LifecycleState::Starting {
            *s = LifecycleState::Connected;
            true
        } else {
            false
        }
    });
    if promoted {
        info!("protocol client connected");
    } else {
        let current = *state.borrow();
        debug!(state = %current, "connected after shutdown was requested");
    }
    match serve(&mut client, &mut lanes, events, poll_interval, promoted) {
        ControlFlow::Break(outcome) => outcome,
        ControlFlow::Continue(()) => RunOutcome::Completed,
    }
}

fn serve<C: ProtocolClient>(
    client: &mut C,
    lanes: &mut Lanes,
    events: &EventSink,
    poll_interval: Duration,
    announce: bool,
) -> ControlFlow<RunOutcome> {
    if announce {
        deliver(client, lanes, events, ProtocolEvent::Connected)?;
    }
    loop {
        drain_lanes(client, lanes)?;
        match client.poll(poll_interval) {
            Ok(Poll::Event(event)) => deliver(client, lanes, events, event)?,
            Ok(Poll::Idle) => {}
            Ok(Poll::Closed) => return ControlFlow::Break(RunOutcome::Completed),
            Err(e) => return ControlFlow::Break(RunOutcome::Failed(e)),
        }
    }
}

/// Hand `event` to the bridge, serving both lanes while its queue is full.
fn deliver<C: ProtocolClient>(
    client: &mut C,
    lanes: &mut Lanes,
    events: &EventSink,
    event: ProtocolEvent,
) -> ControlFlow<RunOutcome> {
    let mut pending = event;
    loop {
        match events.try_forward(pending) {
            Ok(()) => return ControlFlow::Continue(()),
            Err(TrySendError::Closed(_)) => return ControlFlow::Break(RunOutcome::Completed),
            Err(TrySendError::Full(event)) => {
                pending = event;
                drain_lanes(client, lanes)?;
                std::thread::sleep(FORWARD_RETRY);
            }
        }
    }
}

/// Apply queued control signals and stanzas until both lanes are empty.
fn drain_lanes<C: ProtocolClient>(client: &mut C, lanes: &mut Lanes) -> ControlFlow<RunOutcome> {
    loop {
        match lanes.control.try_recv() {
            Ok(ControlSignal::Disconnect) => {
                debug!("disconnecting protocol client");
                if let Err(e) = client.disconnect() {
                    warn!(error = %e, "disconnect failed");
                }
                continue;
            }
            Ok(ControlSignal::Terminate) => return ControlFlow::Break(RunOutcome::Terminated),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => return ControlFlow::Break(RunOutcome::Completed),
        }
        match lanes.stanzas.try_recv() {
            Ok(stanza) => {
                if let Err(e) = client.send(stanza) {
                    warn!(error = %e, "failed to send stanza");
                }
            }
            Err(TryRecvError::Empty) => return ControlFlow::Continue(()),
            Err(TryRecvError::Disconnected) => return ControlFlow::Break(RunOutcome::Completed),
        }
    }
}
