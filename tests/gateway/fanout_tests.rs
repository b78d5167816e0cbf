//! Fan-out Tests
//!
//! Sequence ordering, cross-node delivery, slow consumers, and bus outages.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tokio_test::assert_ok;

use relay_gateway::infrastructure::bus::{Bus, InMemoryHub};
use relay_gateway::presentation::websocket::{CloseReason, ServerFrame};

use crate::common::{assert_silent, next_message, TestNode};

fn expect_message(frame: ServerFrame) -> (String, u64, serde_json::Value) {
    match frame {
        ServerFrame::Message {
            channel,
            sequence,
            payload,
            ..
        } => (channel, sequence, payload),
        other => panic!("expected message frame, got {other:?}"),
    }
}

#[tokio::test]
async fn interleaved_publishers_yield_gap_free_ordered_sequences() {
    let hub = InMemoryHub::new();
    let node = TestNode::attach(&hub, "node-a");

    let (alice, _alice_rx) = node.connect(1, 32);
    let (bob, _bob_rx) = node.connect(2, 32);
    let (observer, mut observer_rx) = node.connect(3, 32);

    for conn in [&alice, &bob, &observer] {
        assert_ok!(node.broker.subscribe(conn.id, "room:seq").await);
    }

    for n in 0..10u64 {
        let (conn, identity) = if n % 2 == 0 {
            (&alice, &alice.identity)
        } else {
            (&bob, &bob.identity)
        };
        assert_ok!(
            node.broker
                .publish_from_connection(
                    conn.id,
                    identity,
                    "room:seq",
                    serde_json::json!({ "n": n }),
                )
                .await
        );
    }

    for expected in 1..=10u64 {
        let (channel, sequence, _) = expect_message(next_message(&mut observer_rx).await);
        assert_eq!(channel, "room:seq");
        assert_eq!(sequence, expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_publishers_cannot_reorder_local_delivery() {
    let hub = InMemoryHub::new();
    let node = TestNode::attach(&hub, "node-a");

    let (observer, mut observer_rx) = node.connect(1, 256);
    assert_ok!(node.broker.subscribe(observer.id, "room:race").await);

    let mut writer_handles = Vec::new();
    let mut tasks = Vec::new();
    for p in 0..4i64 {
        let (conn, rx) = node.connect(10 + p, 256);
        assert_ok!(node.broker.subscribe(conn.id, "room:race").await);
        writer_handles.push(rx);

        let broker = Arc::clone(&node.broker);
        tasks.push(tokio::spawn(async move {
            for n in 0..50u64 {
                broker
                    .publish_from_connection(
                        conn.id,
                        &conn.identity,
                        "room:race",
                        serde_json::json!({ "n": n }),
                    )
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Every subscriber observes the sequences strictly increasing and
    // gap-free, regardless of publisher interleaving.
    let mut last = 0u64;
    for _ in 0..200 {
        let (_, sequence, _) = expect_message(next_message(&mut observer_rx).await);
        assert_eq!(sequence, last + 1, "sequence {sequence} delivered after {last}");
        last = sequence;
    }
    assert_eq!(last, 200);
}

#[tokio::test]
async fn messages_cross_nodes_exactly_once() {
    let hub = InMemoryHub::new();
    let node_a = TestNode::attach(&hub, "node-a");
    let node_b = TestNode::attach(&hub, "node-b");

    let (publisher, mut local_rx) = node_a.connect(1, 32);
    let (remote, mut remote_rx) = node_b.connect(2, 32);

    node_a.broker.subscribe(publisher.id, "room:x").await.unwrap();
    node_b.broker.subscribe(remote.id, "room:x").await.unwrap();

    node_a
        .broker
        .publish_from_connection(
            publisher.id,
            &publisher.identity,
            "room:x",
            serde_json::json!({"body": "hello"}),
        )
        .await
        .unwrap();

    let (_, local_seq, local_payload) = expect_message(next_message(&mut local_rx).await);
    let (_, remote_seq, remote_payload) = expect_message(next_message(&mut remote_rx).await);

    assert_eq!(local_seq, remote_seq);
    assert_eq!(local_payload, remote_payload);

    // The publisher's own node must not receive an echo from the bus.
    assert_silent(&mut local_rx).await;
    assert_silent(&mut remote_rx).await;
}

#[tokio::test]
async fn remote_subscribers_observe_origin_order() {
    let hub = InMemoryHub::new();
    let node_a = TestNode::attach(&hub, "node-a");
    let node_b = TestNode::attach(&hub, "node-b");

    let (publisher, _rx) = node_a.connect(1, 32);
    let (remote, mut remote_rx) = node_b.connect(2, 32);

    node_a.broker.subscribe(publisher.id, "room:o").await.unwrap();
    node_b.broker.subscribe(remote.id, "room:o").await.unwrap();

    for n in 0..5u64 {
        node_a
            .broker
            .publish_from_connection(
                publisher.id,
                &publisher.identity,
                "room:o",
                serde_json::json!({ "n": n }),
            )
            .await
            .unwrap();
    }

    for expected in 1..=5u64 {
        let (_, sequence, _) = expect_message(next_message(&mut remote_rx).await);
        assert_eq!(sequence, expected);
    }
}

#[tokio::test]
async fn slow_consumer_is_dropped_without_stalling_the_channel() {
    let hub = InMemoryHub::new();
    let node = TestNode::attach(&hub, "node-a");

    let (publisher, _pub_rx) = node.connect(1, 32);
    let (fast, mut fast_rx) = node.connect(2, 32);
    // Never drained, capacity 2.
    let (slow, _slow_rx) = node.connect(3, 2);

    node.broker.subscribe(publisher.id, "room:s").await.unwrap();
    node.broker.subscribe(fast.id, "room:s").await.unwrap();
    node.broker.subscribe(slow.id, "room:s").await.unwrap();

    for n in 0..5u64 {
        node.broker
            .publish_from_connection(
                publisher.id,
                &publisher.identity,
                "room:s",
                serde_json::json!({ "n": n }),
            )
            .await
            .unwrap();
    }

    assert!(slow.is_closed());
    assert_eq!(slow.close_reason(), Some(CloseReason::SlowConsumer));
    assert!(!fast.is_closed());

    for expected in 1..=5u64 {
        let (_, sequence, _) = expect_message(next_message(&mut fast_rx).await);
        assert_eq!(sequence, expected);
    }
}

#[tokio::test]
async fn bus_outage_degrades_to_local_delivery_and_recovers() {
    let hub = InMemoryHub::new();
    let node_a = TestNode::attach(&hub, "node-a");
    let node_b = TestNode::attach(&hub, "node-b");

    let (publisher, _rx) = node_a.connect(1, 32);
    let (local, mut local_rx) = node_a.connect(2, 32);
    let (remote, mut remote_rx) = node_b.connect(3, 32);

    node_a.broker.subscribe(publisher.id, "room:d").await.unwrap();
    node_a.broker.subscribe(local.id, "room:d").await.unwrap();
    node_b.broker.subscribe(remote.id, "room:d").await.unwrap();

    node_a.bus.set_down();
    assert!(!node_a.bus.is_connected());

    node_a
        .broker
        .publish_from_connection(
            publisher.id,
            &publisher.identity,
            "room:d",
            serde_json::json!({"during": "outage"}),
        )
        .await
        .unwrap();

    // Same-node delivery is unaffected; the remote node sees nothing yet.
    let (_, sequence, _) = expect_message(next_message(&mut local_rx).await);
    assert_eq!(sequence, 1);
    assert_silent(&mut remote_rx).await;

    node_a.bus.set_up();
    assert!(node_a.bus.is_connected());

    // Buffered publish flushes to the remote node on recovery.
    let (_, sequence, payload) = expect_message(next_message(&mut remote_rx).await);
    assert_eq!(sequence, 1);
    assert_eq!(payload["during"], "outage");

    // Interests were replayed in one batch for the single recovery.
    assert_eq!(node_a.bus.resubscribe_log().len(), 1);
}
