//! Connection Lifecycle Tests
//!
//! Registration, multi-device identities, idempotent close, teardown
//! cascades, and credential expiry mid-session.

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

use relay_gateway::application::services::{TokenRejected, TokenService, TokenType};
use relay_gateway::domain::{Identity, IdentityId};
use relay_gateway::infrastructure::bus::InMemoryHub;
use relay_gateway::presentation::websocket::{CloseReason, RegistryError, SessionState};

use crate::common::{jwt_settings, next_message, TestNode};

#[tokio::test]
async fn teardown_cascades_through_broker_and_registry() {
    let hub = InMemoryHub::new();
    let node = TestNode::attach(&hub, "node-a");

    let (conn, _rx) = node.connect(1, 8);
    node.broker.subscribe(conn.id, "room:1").await.unwrap();
    node.broker.subscribe(conn.id, "room:2").await.unwrap();
    assert_eq!(node.broker.subscriber_count("room:1"), 1);

    // The socket task's exit path: close, unsubscribe, deregister.
    conn.close(CloseReason::TransportError);
    node.broker.unsubscribe_all(conn.id).await;
    node.registry.deregister(conn.id);

    assert_eq!(node.broker.subscriber_count("room:1"), 0);
    assert_eq!(node.broker.subscriber_count("room:2"), 0);
    assert!(node.broker.channels_of(conn.id).is_empty());
    assert!(node.registry.get(conn.id).is_none());

    // Repeating the exit path is harmless.
    node.broker.unsubscribe_all(conn.id).await;
    assert!(node.registry.deregister(conn.id).is_none());

    // Grace of zero: the sweep reaps both empty channels and their interest.
    node.broker.sweep_empty_channels().await;
    assert_eq!(node.broker.channel_count(), 0);
}

#[tokio::test]
async fn racing_closers_agree_on_one_reason() {
    let hub = InMemoryHub::new();
    let node = TestNode::attach(&hub, "node-a");
    let (conn, _rx) = node.connect(1, 8);

    let mut winners = 0;
    for reason in [
        CloseReason::SlowConsumer,
        CloseReason::IdleTimeout,
        CloseReason::Logout,
    ] {
        if conn.close(reason) {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(conn.close_reason(), Some(CloseReason::SlowConsumer));
}

#[tokio::test]
async fn duplicate_connection_ids_are_refused() {
    let hub = InMemoryHub::new();
    let node = TestNode::attach(&hub, "node-a");
    let (conn, _rx) = node.connect(1, 8);

    let err = node.registry.register(conn.clone()).unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateConnection(id) if id == conn.id));
    assert_eq!(node.registry.len(), 1);
}

#[tokio::test]
async fn one_identity_spans_devices_and_each_gets_its_own_delivery() {
    let hub = InMemoryHub::new();
    let node = TestNode::attach(&hub, "node-a");

    let (phone, mut phone_rx) = node.connect(7, 8);
    let (laptop, mut laptop_rx) = node.connect(7, 8);

    assert_eq!(node.registry.find_by_identity(IdentityId(7)).len(), 2);

    node.broker.subscribe(phone.id, "room:1").await.unwrap();
    node.broker.subscribe(laptop.id, "room:1").await.unwrap();

    node.broker
        .publish_from_connection(phone.id, &phone.identity, "room:1", serde_json::json!({}))
        .await
        .unwrap();

    next_message(&mut phone_rx).await;
    next_message(&mut laptop_rx).await;
}

#[tokio::test]
async fn forced_logout_closes_every_device_once() {
    let hub = InMemoryHub::new();
    let node = TestNode::attach(&hub, "node-a");

    let (_phone, _rx1) = node.connect(7, 8);
    let (_laptop, _rx2) = node.connect(7, 8);

    let connections = node.registry.find_by_identity(IdentityId(7));
    let closed: usize = connections
        .iter()
        .filter(|c| c.close(CloseReason::ForcedLogout))
        .count();
    assert_eq!(closed, 2);

    // A second pass finds them already closed.
    let closed_again: usize = connections
        .iter()
        .filter(|c| c.close(CloseReason::ForcedLogout))
        .count();
    assert_eq!(closed_again, 0);
}

#[tokio::test]
async fn expired_credential_gates_operations_mid_session() {
    let hub = InMemoryHub::new();
    let node = TestNode::attach(&hub, "node-a");
    let svc = TokenService::new(&jwt_settings());

    // Handshake at t0 with a token that will lapse mid-session.
    let identity = Identity::new(IdentityId(1), "short-lived");
    let t0 = Utc::now();
    let token = svc.issue_at(&identity, TokenType::Access, t0).unwrap();

    let mut session = SessionState::new();
    session.authenticated(token.expires_at);

    let (conn, _rx) = node.connect(1, 8);
    node.broker.subscribe(conn.id, "room:1").await.unwrap();

    // Within the token's lifetime everything works.
    assert!(!session.token_expired(t0 + Duration::seconds(5)));
    node.broker
        .publish_from_connection(conn.id, &conn.identity, "room:1", serde_json::json!({}))
        .await
        .unwrap();

    // Past expiry the gate trips, matching what verification would say,
    // while the connection itself stays registered until closed.
    let later = token.expires_at + Duration::seconds(1);
    assert!(session.token_expired(later));
    assert_eq!(
        svc.verify_at(&token.token, TokenType::Access, later).unwrap_err(),
        TokenRejected::Expired
    );
    assert!(node.registry.get(conn.id).is_some());
}
