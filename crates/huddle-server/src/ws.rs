//! WebSocket endpoint.
//!
//! One actor per connection: the socket is split, a writer task owns the
//! sink and drains an outbound channel, a ping task watches liveness and
//! the reader loop runs until the client goes away. Server events arrive on
//! the channel handed out by the [`ConnectionRegistry`].

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use huddle_shared::constants::{
    WS_CLOSE_REPLACED, WS_CLOSE_UNAUTHORIZED, WS_PING_INTERVAL_SECS, WS_PONG_TIMEOUT_SECS,
};
use huddle_shared::UserId;

use crate::api::AppState;
use crate::fanout::{ConnectionRegistry, EventReceiver};

const PING_INTERVAL: Duration = Duration::from_secs(WS_PING_INTERVAL_SECS);
const PONG_TIMEOUT: Duration = Duration::from_secs(WS_PONG_TIMEOUT_SECS);

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    pub token: String,
}

/// `GET /ws?token=<session token>`
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.identity.resolve(&query.token) {
        Some(user) => {
            let registry = state.registry.clone();
            ws.on_upgrade(move |socket| run_connection(socket, registry, user))
        }
        None => {
            tracing::warn!("WebSocket upgrade with invalid token");
            ws.on_upgrade(|mut socket| async move {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: WS_CLOSE_UNAUTHORIZED,
                        reason: "Invalid session token".into(),
                    })))
                    .await;
            })
        }
    }
}

async fn run_connection(socket: WebSocket, registry: ConnectionRegistry, user: UserId) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let (handle, events) = registry.register(user);
    tracing::info!(user = %user, "WebSocket connected");

    let writer_handle = tokio::spawn(async move {
        let mut sink = ws_sender;
        let mut rx = rx;
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let events_handle = tokio::spawn(forward_events(events, tx.clone()));

    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Clients have nothing to say over the socket beyond keepalives.
    loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Pong(_))) => {
                let _ = pong_tx.send(());
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = tx.send(Message::Pong(data));
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(user = %user, reason = ?frame, "Client initiated close");
                break;
            }
            Some(Ok(Message::Text(text))) => {
                tracing::debug!(
                    user = %user,
                    "Ignoring client text frame: {}",
                    text.as_str().chars().take(100).collect::<String>()
                );
            }
            Some(Ok(Message::Binary(_))) => {}
            Some(Err(e)) => {
                tracing::warn!(user = %user, error = %e, "WebSocket receive error");
                break;
            }
            None => break,
        }
        if writer_handle.is_finished() {
            break;
        }
    }

    events_handle.abort();
    ping_handle.abort();
    writer_handle.abort();
    registry.unregister(&handle);

    tracing::info!(user = %user, "WebSocket disconnected");
}

/// Serialize server events onto the outbound channel. When the registry
/// drops our sender (a newer connection took over) the socket is closed.
async fn forward_events(mut events: EventReceiver, tx: mpsc::UnboundedSender<Message>) {
    while let Some(event) = events.recv().await {
        match event.to_json() {
            Ok(json) => {
                if tx.send(Message::Text(json.into())).is_err() {
                    return;
                }
            }
            Err(e) => tracing::error!(event = event.name(), error = %e, "Failed to encode event"),
        }
    }

    let _ = tx.send(Message::Close(Some(CloseFrame {
        code: WS_CLOSE_REPLACED,
        reason: "Replaced by a newer connection".into(),
    })));
}
