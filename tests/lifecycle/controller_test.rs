//! Tests for the run-loop lifecycle: start, stop, kill and client failures.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use vxwhatsapp::bridge::EventSink;
use vxwhatsapp::lifecycle::{
    LifecycleController, LifecycleError, LifecycleState, RunLoopSettings, RunOutcome,
};
use vxwhatsapp::protocol::{OutgoingStanza, ProtocolEvent};

use crate::support::{loopback, LoopbackClient, LoopbackServer, WAIT};

fn settings() -> RunLoopSettings {
    RunLoopSettings {
        poll_interval: Duration::from_millis(10),
        kill_delay: Duration::from_millis(20),
        channel_capacity: 16,
    }
}

/// A started controller plus the bus-side end of its event queue.
fn started(
    client: LoopbackClient,
) -> (LifecycleController, mpsc::Receiver<ProtocolEvent>) {
    let mut controller = LifecycleController::new(settings());
    let (sink, events) = EventSink::channel(16);
    if let Err(err) = controller.start(client, sink) {
        panic!("start should succeed: {err}");
    }
    (controller, events)
}

async fn next_event(events: &mut mpsc::Receiver<ProtocolEvent>) -> ProtocolEvent {
    match tokio::time::timeout(WAIT, events.recv()).await {
        Ok(Some(event)) => event,
        Ok(None) => panic!("event queue closed"),
        Err(_) => panic!("timed out waiting for an event"),
    }
}

async fn join(controller: &mut LifecycleController) -> RunOutcome {
    match tokio::time::timeout(WAIT, controller.join()).await {
        Ok(outcome) => outcome,
        Err(_) => panic!("run loop did not exit"),
    }
}

async fn connected() -> (
    LifecycleController,
    mpsc::Receiver<ProtocolEvent>,
    LoopbackServer,
) {
    let (client, server) = loopback();
    let (controller, mut events) = started(client);
    controller
        .wait_connected()
        .await
        .expect("client should connect");
    assert_eq!(next_event(&mut events).await, ProtocolEvent::Connected);
    (controller, events, server)
}

#[tokio::test]
async fn start_reaches_connected() {
    let (mut controller, _events, server) = connected().await;
    assert_eq!(controller.state(), LifecycleState::Connected);

    controller.stop();
    let outcome = join(&mut controller).await;
    assert!(outcome.is_client_done(), "unexpected outcome: {outcome:?}");
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert_eq!(server.disconnects(), 1);
}

#[tokio::test]
async fn second_start_is_rejected() {
    let (mut controller, _events, _server) = connected().await;
    let (again, _) = loopback();
    let (sink, _rx) = EventSink::channel(1);

    let result = controller.start(again, sink);
    assert!(matches!(
        result,
        Err(LifecycleError::AlreadyStarted(LifecycleState::Connected))
    ));

    controller.stop();
    join(&mut controller).await;
}

#[tokio::test]
async fn stop_is_idempotent() {
    let (mut controller, _events, server) = connected().await;

    controller.stop();
    controller.stop();
    assert_eq!(controller.state(), LifecycleState::Stopping);
    let outcome = join(&mut controller).await;
    assert!(matches!(outcome, RunOutcome::Terminated));

    controller.stop();
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert_eq!(server.disconnects(), 1);
}

#[tokio::test]
async fn stop_before_start_is_a_noop() {
    let mut controller = LifecycleController::new(settings());
    controller.stop();
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert!(matches!(controller.join().await, RunOutcome::Completed));
    assert!(matches!(
        controller.wait_connected().await,
        Err(LifecycleError::NotConnected(LifecycleState::Stopped))
    ));
}

#[tokio::test]
async fn wait_connected_before_start_fails() {
    let controller = LifecycleController::new(settings());
    assert!(matches!(
        controller.wait_connected().await,
        Err(LifecycleError::NotConnected(LifecycleState::Idle))
    ));
}

#[tokio::test]
async fn stop_during_connect_still_terminates() {
    let (client, server) = loopback();
    let (mut controller, mut events) =
        started(client.with_connect_delay(Duration::from_millis(100)));
    assert_eq!(controller.state(), LifecycleState::Starting);

    controller.stop();
    assert_eq!(controller.state(), LifecycleState::Stopping);
    assert!(matches!(
        controller.wait_connected().await,
        Err(LifecycleError::NotConnected(_))
    ));

    let outcome = join(&mut controller).await;
    assert!(outcome.is_client_done(), "unexpected outcome: {outcome:?}");
    assert_eq!(controller.state(), LifecycleState::Stopped);
    // The disconnect was queued while connecting and is still delivered.
    assert_eq!(server.disconnects(), 1);
    // A connection that was cancelled before it came up is never announced.
    assert!(matches!(events.try_recv(), Err(TryRecvError::Disconnected)));
}

#[tokio::test]
async fn stop_reaches_a_loop_blocked_on_a_full_event_queue() {
    let (client, mut server) = loopback();
    let mut controller = LifecycleController::new(settings());
    let (sink, events) = EventSink::channel(1);
    controller.start(client, sink).expect("start");
    controller
        .wait_connected()
        .await
        .expect("client should connect");

    // The Connected event takes the only slot; nobody reads the queue.
    for n in 0..8 {
        server.inject(ProtocolEvent::Disconnected {
            reason: format!("flap {n}"),
        });
    }
    let handle = controller.handle();
    let stanza = OutgoingStanza::Text {
        id: "abc-1".to_owned(),
        to: "27000000000@s.whatsapp.net".to_owned(),
        body: "still flowing".to_owned(),
    };
    handle.send(stanza.clone()).await.expect("loop running");
    assert_eq!(server.next_sent().await, stanza);

    controller.stop();
    let outcome = join(&mut controller).await;
    assert!(outcome.is_client_done(), "unexpected outcome: {outcome:?}");
    assert_eq!(server.disconnects(), 1);
    drop(events);
}

#[tokio::test]
async fn kill_reaches_a_loop_blocked_on_a_full_event_queue() {
    let (client, server) = loopback();
    let mut controller = LifecycleController::new(settings());
    let (sink, _events) = EventSink::channel(1);
    controller.start(client, sink).expect("start");
    controller
        .wait_connected()
        .await
        .expect("client should connect");
    for n in 0..8 {
        server.inject(ProtocolEvent::Disconnected {
            reason: format!("flap {n}"),
        });
    }

    controller.kill();
    let outcome = join(&mut controller).await;
    assert!(matches!(outcome, RunOutcome::Terminated));
    assert_eq!(server.disconnects(), 0);
}

#[tokio::test]
async fn connect_failure_is_reported_as_failed() {
    let (client, _server) = loopback();
    let (mut controller, _events) = started(client.failing_connect("auth rejected"));

    assert!(matches!(
        controller.wait_connected().await,
        Err(LifecycleError::NotConnected(LifecycleState::Stopped))
    ));
    match join(&mut controller).await {
        RunOutcome::Failed(err) => assert!(err.to_string().contains("auth rejected")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn closed_stream_completes_the_loop() {
    let (mut controller, _events, server) = connected().await;
    server.close();
    let outcome = join(&mut controller).await;
    assert!(matches!(outcome, RunOutcome::Completed));
    assert!(!outcome.is_client_done());
    assert_eq!(controller.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn poll_failure_is_reported_as_failed() {
    let (mut controller, _events, server) = connected().await;
    server.fail("socket reset");
    match join(&mut controller).await {
        RunOutcome::Failed(err) => assert!(err.to_string().contains("socket reset")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn kill_skips_the_disconnect() {
    let (mut controller, _events, server) = connected().await;
    controller.kill();
    assert_eq!(controller.state(), LifecycleState::Killed);

    let outcome = join(&mut controller).await;
    assert!(outcome.is_client_done());
    assert_eq!(controller.state(), LifecycleState::Killed);
    assert_eq!(server.disconnects(), 0);

    // Neither stop nor a second kill leaves the terminal state.
    controller.stop();
    controller.kill();
    assert_eq!(controller.state(), LifecycleState::Killed);
}

#[tokio::test]
async fn protocol_disconnect_does_not_change_state() {
    let (mut controller, mut events, server) = connected().await;
    server.inject(ProtocolEvent::Disconnected {
        reason: "network".to_owned(),
    });
    assert_eq!(
        next_event(&mut events).await,
        ProtocolEvent::Disconnected {
            reason: "network".to_owned()
        }
    );
    assert_eq!(controller.state(), LifecycleState::Connected);

    controller.stop();
    join(&mut controller).await;
}

#[tokio::test]
async fn handle_queues_stanzas_until_the_loop_exits() {
    let (mut controller, _events, mut server) = connected().await;
    let handle = controller.handle();
    let stanza = OutgoingStanza::Text {
        id: "abc-1".to_owned(),
        to: "27000000000@s.whatsapp.net".to_owned(),
        body: "hi".to_owned(),
    };

    handle.send(stanza.clone()).await.expect("loop running");
    assert_eq!(server.next_sent().await, stanza);

    controller.stop();
    join(&mut controller).await;
    assert!(matches!(
        handle.send(stanza).await,
        Err(LifecycleError::RunLoopGone)
    ));
}

#[tokio::test]
async fn state_transitions_are_observable() {
    let (client, _server) = loopback();
    let mut controller = LifecycleController::new(settings());
    let mut watch = controller.subscribe();
    assert_eq!(*watch.borrow_and_update(), LifecycleState::Idle);

    let (sink, _events) = EventSink::channel(16);
    controller.start(client, sink).expect("start");
    let connected = tokio::time::timeout(
        WAIT,
        watch.wait_for(|s| *s == LifecycleState::Connected),
    )
    .await
    .map(|seen| seen.map(|state| *state));
    assert!(matches!(connected, Ok(Ok(LifecycleState::Connected))));

    controller.stop();
    join(&mut controller).await;
    assert_eq!(*watch.borrow_and_update(), LifecycleState::Stopped);
}
