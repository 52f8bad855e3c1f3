//! WebSocket transport for the chat gateway

use super::handlers::{ApiState, AppError};
use crate::auth::middleware::bearer_token;
use crate::chat::ChatError;
use crate::events::ServerEvent;
use crate::gateway::ClientEvent;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio::time::{interval, Duration};
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Default)]
pub struct WsQuery {
    /// Credential for clients that cannot set headers on the upgrade
    pub token: Option<String>,
}

/// WebSocket upgrade handler for `/ws/chat`.
///
/// A credential on the upgrade (bearer header or `?token=`) must verify or
/// the upgrade is refused with 401. Without one the socket opens
/// unauthenticated and the client sends an `auth` event first; in anonymous
/// mode the session is bound to the anonymous student straight away.
pub async fn ws_chat(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let token = bearer_token(&headers)
        .map(str::to_string)
        .or(query.token.filter(|t| !t.is_empty()));

    let identity = match token {
        Some(token) => Some(state.gateway.authenticate(Some(&token))?),
        None => state.gateway.authenticate(None).ok(),
    };

    Ok(ws.on_upgrade(move |socket| handle_ws(socket, state, identity)))
}

fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!(event = event.name(), "Failed to serialize server event: {}", e);
            None
        }
    }
}

async fn handle_ws(socket: WebSocket, state: ApiState, identity: Option<crate::auth::Identity>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let mut event_rx = state.bus.subscribe();

    let gateway = state.gateway.clone();
    let mut session = gateway.open_session(outbox_tx);
    if let Some(identity) = identity {
        gateway.attach(&mut session, identity);
    }

    let mut ping_interval = interval(Duration::from_secs(30));
    ping_interval.tick().await;

    loop {
        tokio::select! {
            // Room broadcasts this session is subscribed to
            result = event_rx.recv() => {
                match result {
                    Ok(room_event) => {
                        if !session.receives(&room_event.target) {
                            continue;
                        }
                        if let Some(msg) = encode(&room_event.event) {
                            if ws_sender.send(msg).await.is_err() {
                                debug!(session_id = %session.id, "WebSocket send failed, client disconnected");
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(session_id = %session.id, skipped = n, "WebSocket client lagged, skipping events");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Event bus closed, shutting down WebSocket");
                        break;
                    }
                }
            }

            // Session-scoped replies: acks, errors, auth results
            Some(event) = outbox_rx.recv() => {
                if let Some(msg) = encode(&event) {
                    if ws_sender.send(msg).await.is_err() {
                        debug!(session_id = %session.id, "WebSocket send failed, client disconnected");
                        break;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if ws_sender.send(Message::Ping(vec![].into())).await.is_err() {
                    debug!(session_id = %session.id, "Ping failed, client disconnected");
                    break;
                }
            }

            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => gateway.dispatch(&mut session, event).await,
                            Err(e) => {
                                debug!(session_id = %session.id, "Malformed client event: {}", e);
                                session.send(ServerEvent::error(&ChatError::validation(format!(
                                    "malformed event: {}",
                                    e
                                ))));
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(session_id = %session.id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(session_id = %session.id, "WebSocket error: {}", e);
                        break;
                    }
                    // Pong and binary frames
                    _ => {}
                }
            }
        }
    }

    gateway.disconnect(&session);
}
