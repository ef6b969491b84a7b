//! Tests for connection status edges.

use std::sync::Arc;

use vxwhatsapp::bus::BusRecord;
use vxwhatsapp::lifecycle::LifecycleState;
use vxwhatsapp::protocol::ProtocolEvent;
use vxwhatsapp::status::StatusLevel;

use crate::support::Harness;

#[tokio::test]
async fn disconnect_reason_is_reported() {
    let mut h = Harness::start(None).await;

    h.server.inject(ProtocolEvent::Disconnected {
        reason: "stream:error conflict".to_owned(),
    });
    let status = h.next_status().await;
    assert_eq!(status.component, "connection");
    assert_eq!(status.status, StatusLevel::Down);
    assert_eq!(status.kind, "disconnected");
    assert!(status.message.contains("stream:error conflict"));
    assert_eq!(status.details["reason"], "stream:error conflict");

    // A protocol-level disconnect is reported, not acted on.
    assert_eq!(h.transport.state(), LifecycleState::Connected);
    h.transport.teardown().await;
}

#[tokio::test]
async fn repeated_connection_events_report_only_edges() {
    let mut h = Harness::start(None).await;

    for event in [
        ProtocolEvent::Connected,
        ProtocolEvent::Disconnected {
            reason: "a".to_owned(),
        },
        ProtocolEvent::Disconnected {
            reason: "b".to_owned(),
        },
        ProtocolEvent::Connected,
        ProtocolEvent::Connected,
    ] {
        h.server.inject(event);
    }

    let down = h.next_status().await;
    assert_eq!(down.status, StatusLevel::Down);
    assert_eq!(down.details["reason"], "a");
    let up = h.next_status().await;
    assert_eq!(up.status, StatusLevel::Ok);

    // Anything published in between would be ahead of this edge.
    let bridge = Arc::clone(h.transport.bridge());
    bridge.on_disconnected("c").await;
    let next = h.next_status().await;
    assert_eq!(next.status, StatusLevel::Down);
    assert_eq!(next.details["reason"], "c");
    assert!(h.drain().is_empty());

    h.transport.teardown().await;
}

#[tokio::test]
async fn teardown_publishes_nothing_further() {
    let mut h = Harness::start(None).await;
    let outcome = h.transport.teardown().await;
    assert!(outcome.is_client_done());

    let records: Vec<BusRecord> = std::iter::from_fn(|| h.bus.try_recv().ok()).collect();
    assert!(records.is_empty(), "unexpected records: {records:?}");
}
