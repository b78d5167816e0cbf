//! WebSocket Connection Handler
//!
//! Drives one socket from upgrade to teardown: auth handshake, frame
//! dispatch, outbound writer, and the single cleanup path.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::application::services::{TokenRejected, TokenType};
use crate::domain::Identity;
use crate::startup::AppState;

use super::frames::{ClientFrame, CloseReason, ServerFrame};
use super::registry::RegisteredConnection;
use super::session::SessionState;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut session = SessionState::new();

    // Auth handshake: exactly one auth frame, within the timeout, before
    // anything else.
    let auth_timeout = Duration::from_secs(state.settings.websocket.auth_timeout_secs);
    let token = match timeout(auth_timeout, await_auth_frame(&mut ws_rx)).await {
        Ok(Some(token)) => token,
        Ok(None) => {
            tracing::debug!("connection closed before auth");
            let _ = close_socket(&mut ws_tx, CloseReason::AuthFailure).await;
            return;
        }
        Err(_) => {
            tracing::debug!("auth handshake timed out");
            let _ = send_frame(
                &mut ws_tx,
                &ServerFrame::error("AUTH_TIMEOUT", "no auth frame received in time"),
            )
            .await;
            let _ = close_socket(&mut ws_tx, CloseReason::AuthFailure).await;
            return;
        }
    };

    let (identity, expires_at) = match verify_handshake(&state, &token) {
        Ok(verified) => verified,
        Err(rejected) => {
            let code = match rejected {
                TokenRejected::Expired => "AUTH_EXPIRED",
                _ => "AUTH_REJECTED",
            };
            tracing::debug!(error = %rejected, "handshake rejected");
            let _ = send_frame(&mut ws_tx, &ServerFrame::error(code, rejected.to_string())).await;
            let _ = close_socket(&mut ws_tx, CloseReason::AuthFailure).await;
            return;
        }
    };

    let (tx, rx) = mpsc::channel(state.settings.websocket.outbound_buffer_size);
    let conn = RegisteredConnection::new(identity, state.registry.node().clone(), tx);

    if let Err(e) = state.registry.register(Arc::clone(&conn)) {
        tracing::warn!(error = %e, "registration refused");
        let _ = send_frame(
            &mut ws_tx,
            &ServerFrame::error("DUPLICATE_CONNECTION", e.to_string()),
        )
        .await;
        let _ = close_socket(&mut ws_tx, CloseReason::AuthFailure).await;
        return;
    }

    session.authenticated(expires_at);

    let ready = ServerFrame::Ready {
        connection_id: conn.id,
        heartbeat_interval_ms: state.settings.websocket.heartbeat_interval_ms,
    };
    if conn.try_deliver(ready).is_err() {
        state.registry.deregister(conn.id);
        return;
    }

    tracing::info!(
        connection_id = %conn.id,
        identity = %conn.identity.id,
        "session active"
    );

    let writer = tokio::spawn(run_writer(ws_tx, rx, Arc::clone(&conn)));

    // Read loop. Ends on the close signal, a transport error, or the client
    // going away.
    let mut shutdown_rx = conn.subscribe_shutdown();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if shutdown_rx.borrow().is_some() {
                    break;
                }
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => handle_frame(frame, &conn, &mut session, &state).await,
                    Err(e) => {
                        let _ = conn.try_deliver(ServerFrame::error(
                            "MALFORMED_FRAME",
                            e.to_string(),
                        ));
                    }
                },
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                    conn.touch();
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    let _ = conn.try_deliver(ServerFrame::error(
                        "MALFORMED_FRAME",
                        "binary frames are not supported",
                    ));
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %conn.id, error = %e, "socket error");
                    break;
                }
            }
        }
    }

    // Teardown runs exactly once, here. `close` is a no-op when a reason
    // (slow consumer, idle eviction, logout) was already recorded.
    session.draining();
    conn.close(CloseReason::TransportError);
    state.broker.unsubscribe_all(conn.id).await;
    state.registry.deregister(conn.id);
    let _ = writer.await;
    session.closed();

    tracing::info!(
        connection_id = %conn.id,
        identity = %conn.identity.id,
        reason = ?conn.close_reason(),
        "session ended"
    );
}

/// Wait for the first text frame and require it to be an auth frame.
async fn await_auth_frame(ws_rx: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                return match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(ClientFrame::Auth { token }) => Some(token),
                    _ => None,
                };
            }
            Ok(WsMessage::Close(_)) | Err(_) => return None,
            _ => continue,
        }
    }
    None
}

/// Verify the handshake token and build the session identity from its
/// claims. No store round trip: the token is the credential.
fn verify_handshake(
    state: &AppState,
    token: &str,
) -> Result<(Identity, DateTime<Utc>), TokenRejected> {
    let claims = state.token_service.verify(token, TokenType::Access)?;
    let id = claims.identity_id()?;

    let username = claims.name.clone().unwrap_or_else(|| id.to_string());
    let identity = Identity::new(id, username).with_scopes(claims.scopes.iter().copied());

    let expires_at =
        DateTime::from_timestamp(claims.exp, 0).ok_or(TokenRejected::Malformed)?;

    Ok((identity, expires_at))
}

async fn handle_frame(
    frame: ClientFrame,
    conn: &Arc<RegisteredConnection>,
    session: &mut SessionState,
    state: &AppState,
) {
    match frame {
        ClientFrame::Ping => {
            conn.touch();
            let _ = conn.try_deliver(ServerFrame::Pong);
        }
        ClientFrame::Logout => {
            conn.close(CloseReason::Logout);
        }
        ClientFrame::Auth { .. } => {
            let _ = conn.try_deliver(ServerFrame::error(
                "ALREADY_AUTHENTICATED",
                "session is already authenticated",
            ));
        }
        ClientFrame::Subscribe { channel } => {
            conn.touch();
            if reject_expired(conn, session) {
                return;
            }
            if let Err(e) = state.broker.subscribe(conn.id, &channel).await {
                let _ = conn.try_deliver(ServerFrame::error(e.code(), e.to_string()));
            }
        }
        ClientFrame::Unsubscribe { channel } => {
            conn.touch();
            if let Err(e) = state.broker.unsubscribe(conn.id, &channel).await {
                let _ = conn.try_deliver(ServerFrame::error(e.code(), e.to_string()));
            }
        }
        ClientFrame::Publish { channel, payload } => {
            conn.touch();
            if reject_expired(conn, session) {
                return;
            }
            if let Err(e) = state
                .broker
                .publish_from_connection(conn.id, &conn.identity, &channel, payload)
                .await
            {
                let _ = conn.try_deliver(ServerFrame::error(e.code(), e.to_string()));
            }
        }
    }
}

/// Operations gated on a live credential get an error frame once the
/// handshake token lapses mid-session.
fn reject_expired(conn: &RegisteredConnection, session: &SessionState) -> bool {
    if session.token_expired(Utc::now()) {
        let _ = conn.try_deliver(ServerFrame::error(
            "AUTH_EXPIRED",
            "access token expired, re-authenticate",
        ));
        true
    } else {
        false
    }
}

/// Outbound writer task: forwards queued frames until the close signal,
/// then drains what is already queued and sends the close frame.
async fn run_writer(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<ServerFrame>,
    conn: Arc<RegisteredConnection>,
) {
    let mut shutdown_rx = conn.subscribe_shutdown();

    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(frame) => {
                    if send_frame(&mut ws_tx, &frame).await.is_err() {
                        conn.close(CloseReason::TransportError);
                        return;
                    }
                }
                None => break,
            },
            _ = shutdown_rx.changed() => {
                if shutdown_rx.borrow().is_some() {
                    break;
                }
            }
        }
    }

    // Best-effort drain of frames queued before the close decision.
    while let Ok(frame) = rx.try_recv() {
        if send_frame(&mut ws_tx, &frame).await.is_err() {
            return;
        }
    }

    let reason = conn.close_reason().unwrap_or(CloseReason::TransportError);
    let _ = close_socket(&mut ws_tx, reason).await;
}

async fn send_frame(
    ws_tx: &mut SplitSink<WebSocket, WsMessage>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_default();
    ws_tx.send(WsMessage::Text(text.into())).await
}

async fn close_socket(
    ws_tx: &mut SplitSink<WebSocket, WsMessage>,
    reason: CloseReason,
) -> Result<(), axum::Error> {
    let frame = CloseFrame {
        code: close_code(reason),
        reason: reason.as_str().into(),
    };
    ws_tx.send(WsMessage::Close(Some(frame))).await
}

fn close_code(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::Logout => 1000,
        CloseReason::TransportError => 1011,
        CloseReason::AuthFailure => 4401,
        CloseReason::ForcedLogout => 4403,
        CloseReason::IdleTimeout => 4408,
        CloseReason::SlowConsumer => 4429,
    }
}
