//! HTTP Surface Tests
//!
//! Exercises the router with in-memory collaborators via tower's oneshot.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use pretty_assertions::assert_eq;
use tower::ServiceExt;

use relay_gateway::application::services::TokenService;
use relay_gateway::config::{
    ChannelSettings, NodeSettings, RedisSettings, ServerSettings, Settings, WebSocketSettings,
};
use relay_gateway::domain::{
    Identity, IdentityId, InMemoryIdentityStore, InMemoryOAuthFlow, NodeId, Scope,
};
use relay_gateway::infrastructure::bus::{Bus, InMemoryBus, InMemoryHub};
use relay_gateway::presentation::http::create_router;
use relay_gateway::presentation::websocket::{ChannelBroker, ConnectionRegistry};
use relay_gateway::startup::AppState;

use crate::common::{channel_settings, jwt_settings};

struct TestApp {
    router: Router,
    state: AppState,
    bus: Arc<InMemoryBus>,
    oauth: Arc<InMemoryOAuthFlow>,
    identities: Arc<InMemoryIdentityStore>,
}

fn test_settings() -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
        },
        redis: RedisSettings {
            url: "redis://127.0.0.1:6379".into(),
        },
        jwt: jwt_settings(),
        websocket: WebSocketSettings {
            auth_timeout_secs: 10,
            heartbeat_interval_ms: 30000,
            idle_timeout_secs: 90,
            sweep_interval_secs: 15,
            outbound_buffer_size: 16,
        },
        channel: ChannelSettings {
            ..channel_settings()
        },
        node: NodeSettings {
            id: "node-http".into(),
        },
        environment: "test".into(),
    }
}

fn test_app(hub: &InMemoryHub) -> TestApp {
    let settings = test_settings();
    let node = NodeId::new(settings.node.id.clone());

    let bus = Arc::new(InMemoryBus::attach(hub, 16));
    let registry = Arc::new(ConnectionRegistry::new(node.clone()));
    let broker = Arc::new(ChannelBroker::new(
        Arc::clone(&registry),
        Arc::clone(&bus) as Arc<dyn Bus>,
        node,
        settings.channel.clone(),
    ));
    let identities = Arc::new(InMemoryIdentityStore::new());
    let oauth = Arc::new(InMemoryOAuthFlow::new());

    let state = AppState {
        registry,
        broker,
        bus: Arc::clone(&bus) as Arc<dyn Bus>,
        token_service: Arc::new(TokenService::new(&settings.jwt)),
        identities: Arc::clone(&identities) as Arc<dyn relay_gateway::domain::IdentityStore>,
        oauth: Arc::clone(&oauth) as Arc<dyn relay_gateway::domain::OAuthFlow>,
        settings: Arc::new(settings),
    };

    TestApp {
        router: create_router(state.clone()),
        state,
        bus,
        oauth,
        identities,
    }
}

async fn get(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn post_json(
    router: &Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn health_reports_healthy() {
    let hub = InMemoryHub::new();
    let app = test_app(&hub);

    let (status, body) = get(&app.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn readiness_reflects_bus_degradation() {
    let hub = InMemoryHub::new();
    let app = test_app(&hub);

    let (status, body) = get(&app.router, "/health/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    app.bus.set_down();
    let (status, body) = get(&app.router, "/health/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"]["bus"]["status"], "degraded");
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    let hub = InMemoryHub::new();
    let app = test_app(&hub);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_exchanges_a_code_for_a_token_pair() {
    let hub = InMemoryHub::new();
    let app = test_app(&hub);

    app.oauth
        .register_code("good-code", Identity::new(IdentityId(5), "mina"));

    let (status, body) =
        post_json(&app.router, "/api/v1/auth/login", serde_json::json!({"code": "good-code"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    assert!(body["access_token"].is_string());
    assert!(body["refresh_token"].is_string());

    let (status, body) =
        post_json(&app.router, "/api/v1/auth/login", serde_json::json!({"code": "bad-code"})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "LOGIN_FAILED");
}

#[tokio::test]
async fn refresh_trades_a_refresh_token_for_an_access_token() {
    let hub = InMemoryHub::new();
    let app = test_app(&hub);

    let identity = Identity::new(IdentityId(5), "mina");
    app.identities.insert(identity.clone());
    app.oauth.register_code("good-code", identity);

    let (_, login) =
        post_json(&app.router, "/api/v1/auth/login", serde_json::json!({"code": "good-code"})).await;
    let refresh_token = login["refresh_token"].as_str().unwrap();

    let (status, body) = post_json(
        &app.router,
        "/api/v1/auth/refresh",
        serde_json::json!({"refresh_token": refresh_token}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"].is_string());

    // An access token on the refresh endpoint is refused.
    let access_token = body["access_token"].as_str().unwrap();
    let (status, body) = post_json(
        &app.router,
        "/api/v1/auth/refresh",
        serde_json::json!({"refresh_token": access_token}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTH_REJECTED");
}

#[tokio::test]
async fn force_logout_requires_the_system_scope() {
    let hub = InMemoryHub::new();
    let app = test_app(&hub);

    let user = Identity::new(IdentityId(5), "mina");
    let admin = Identity::new(IdentityId(1), "ops").with_scopes([Scope::Publish, Scope::System]);

    let user_token = app
        .state
        .token_service
        .issue(&user, relay_gateway::application::services::TokenType::Access)
        .unwrap();
    let admin_token = app
        .state
        .token_service
        .issue(&admin, relay_gateway::application::services::TokenType::Access)
        .unwrap();

    let (status, _) = post_json(
        &app.router,
        "/api/v1/auth/logout",
        serde_json::json!({"token": user_token.token, "identity_id": 5}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = post_json(
        &app.router,
        "/api/v1/auth/logout",
        serde_json::json!({"token": admin_token.token, "identity_id": 5}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["closed"], 0);
}
