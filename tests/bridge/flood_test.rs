//! Traffic in both directions through one-slot queues.

use std::time::Duration;

use vxwhatsapp::bus::{BusRecord, OutboundMessage};
use vxwhatsapp::protocol::{IncomingMessage, OutgoingStanza, ProtocolEvent};

use crate::support::{test_config, Harness};

const ROUNDS: usize = 400;
const DEADLINE: Duration = Duration::from_secs(60);

fn incoming(n: usize) -> ProtocolEvent {
    ProtocolEvent::Message(IncomingMessage {
        id: format!("IN{n}"),
        from: "27011112222@s.whatsapp.net".to_owned(),
        participant: None,
        body: format!("ping {n}").into_bytes(),
    })
}

fn outbound(n: usize) -> OutboundMessage {
    OutboundMessage {
        message_id: format!("M{n}"),
        to_addr: "27000000000".to_owned(),
        from_addr: "vumi".to_owned(),
        content: Some(format!("pong {n}")),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn saturated_queues_in_both_directions_still_drain() {
    let mut config = test_config(Some("+27099999999"));
    config.lifecycle.channel_capacity = 1;
    let mut h = Harness::start_with(config).await;

    // Each inbound message costs a receipt and an echo; each outbound a text.
    for n in 0..ROUNDS {
        h.server.inject(incoming(n));
    }
    let queue = h.transport.outbound();
    let pusher = tokio::spawn(async move {
        for n in 0..ROUNDS {
            if queue.send(outbound(n)).await.is_err() {
                return n;
            }
        }
        ROUNDS
    });

    let wire = tokio::time::timeout(DEADLINE, async {
        let (mut receipts, mut texts) = (0, 0);
        while receipts + texts < 3 * ROUNDS {
            match h.server.next_sent().await {
                OutgoingStanza::Receipt { .. } => receipts += 1,
                OutgoingStanza::Text { .. } => texts += 1,
                other => panic!("unexpected stanza {other:?}"),
            }
        }
        (receipts, texts)
    })
    .await;
    let (receipts, texts) = wire.expect("every stanza should reach the wire");
    assert_eq!(receipts, ROUNDS);
    assert_eq!(texts, 2 * ROUNDS);
    assert_eq!(pusher.await.expect("pusher task"), ROUNDS);

    let published = tokio::time::timeout(DEADLINE, async {
        let mut inbound = 0;
        while inbound < ROUNDS {
            if let BusRecord::Inbound(_) = h.next_record().await {
                inbound += 1;
            }
        }
        inbound
    })
    .await;
    assert_eq!(published.expect("every inbound should be published"), ROUNDS);

    let outcome = tokio::time::timeout(DEADLINE, h.transport.teardown()).await;
    assert!(outcome.is_ok(), "teardown stalled");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn teardown_finishes_while_events_are_backed_up() {
    let mut config = test_config(None);
    config.lifecycle.channel_capacity = 1;
    let h = Harness::start_with(config).await;

    for n in 0..50 {
        h.server.inject(incoming(n));
    }
    let outcome = tokio::time::timeout(DEADLINE, h.transport.teardown()).await;
    assert!(outcome.is_ok(), "teardown stalled");
    assert_eq!(h.server.disconnects(), 1);
}
