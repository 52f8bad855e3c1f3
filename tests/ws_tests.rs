//! WebSocket transport tests against a server bound on a local port
//!
//! Each test serves the full router on `127.0.0.1:0` and talks to `/ws/chat`
//! with a tokio-tungstenite client.
//! Run with: cargo test --test ws_tests

use classroom_chat::api::create_router;
use classroom_chat::auth::jwt::{encode_jwt, ANONYMOUS_USER_ID};
use classroom_chat::{AppState, AuthConfig, Config};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

const SECRET: &str = "websocket-test-secret-at-least-32-chars!";
const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_PERIOD: Duration = Duration::from_millis(300);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn config(auth: bool) -> Config {
    Config {
        server_port: 0,
        auth_config: auth.then(|| AuthConfig {
            jwt_secret: SECRET.to_string(),
            allowed_email_domain: None,
        }),
        rate_limit_max_events: 100,
        rate_limit_window_secs: 60,
        default_context_window: 10,
        summary_cache_capacity: 16,
        summary_max_tokens: 200,
        summary_temperature: 0.3,
        moderation_url: None,
        moderation_timeout_secs: 2,
        generation_url: None,
        generation_model: "test-model".to_string(),
        generation_api_key: None,
        generation_timeout_secs: 2,
        personas: Vec::new(),
    }
}

fn token(user_id: &str, name: &str, role: &str) -> String {
    encode_jwt(
        user_id,
        &format!("{}@school.edu", user_id),
        name,
        role,
        SECRET,
        3600,
    )
    .unwrap()
}

async fn serve(config: Config) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = create_router(Arc::new(AppState::new(config).unwrap()));
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, token: Option<&str>) -> Client {
    let url = match token {
        Some(t) => format!("ws://{}/ws/chat?token={}", addr, t),
        None => format!("ws://{}/ws/chat", addr),
    };
    let (ws, _) = timeout(RECV_TIMEOUT, connect_async(url))
        .await
        .expect("connect timed out")
        .expect("upgrade failed");
    ws
}

/// Connect with a credential and consume the `auth-ok` greeting
async fn connect_as(addr: SocketAddr, user_id: &str, name: &str, role: &str) -> Client {
    let mut ws = connect(addr, Some(&token(user_id, name, role))).await;
    let greeting = next_event(&mut ws).await;
    assert_eq!(greeting["type"], "auth-ok");
    assert_eq!(greeting["user"]["id"], user_id);
    ws
}

async fn send_event(ws: &mut Client, event: Value) {
    ws.send(Message::Text(event.to_string())).await.unwrap();
}

/// Next JSON event, skipping control frames
async fn next_event(ws: &mut Client) -> Value {
    loop {
        let frame = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("no event before timeout")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Next event of the given type, skipping others
async fn next_of_type(ws: &mut Client, kind: &str) -> Value {
    loop {
        let event = next_event(ws).await;
        if event["type"] == kind {
            return event;
        }
    }
}

/// Asserts no text frame arrives for a short while
async fn assert_quiet(ws: &mut Client) {
    let deadline = tokio::time::Instant::now() + QUIET_PERIOD;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected event: {}", text),
            Ok(Some(Ok(_))) => continue,
            Ok(other) => panic!("connection ended early: {:?}", other),
        }
    }
}

async fn join(ws: &mut Client, project: Uuid) {
    send_event(ws, json!({ "type": "join-project", "projectId": project })).await;
    let joined = next_event(ws).await;
    assert_eq!(joined["type"], "joined-project");
    assert_eq!(joined["projectId"], project.to_string());
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_invalid_query_token_refuses_upgrade() {
    let addr = serve(config(true)).await;

    let err = connect_async(format!("ws://{}/ws/chat?token=not-a-jwt", addr))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_query_token_authenticates_on_upgrade() {
    let addr = serve(config(true)).await;
    let mut ws = connect(addr, Some(&token("s-1", "Ada", "student"))).await;

    let greeting = next_event(&mut ws).await;
    assert_eq!(greeting["type"], "auth-ok");
    assert_eq!(greeting["user"]["name"], "Ada");
    assert_eq!(greeting["user"]["role"], "student");
}

#[tokio::test]
async fn test_first_message_auth_handshake() {
    let addr = serve(config(true)).await;
    let mut ws = connect(addr, None).await;

    // Nothing but auth is served before the handshake
    send_event(&mut ws, json!({ "type": "join-project", "projectId": Uuid::new_v4() })).await;
    let rejected = next_event(&mut ws).await;
    assert_eq!(rejected["type"], "error");
    assert_eq!(rejected["code"], "authentication_error");

    send_event(&mut ws, json!({ "type": "auth", "token": "garbage" })).await;
    let rejected = next_event(&mut ws).await;
    assert_eq!(rejected["code"], "authentication_error");

    send_event(
        &mut ws,
        json!({ "type": "auth", "token": token("t-1", "Grace", "instructor") }),
    )
    .await;
    let greeting = next_event(&mut ws).await;
    assert_eq!(greeting["type"], "auth-ok");
    assert_eq!(greeting["user"]["id"], "t-1");
    assert_eq!(greeting["user"]["role"], "instructor");

    join(&mut ws, Uuid::new_v4()).await;
}

#[tokio::test]
async fn test_anonymous_mode_greets_immediately() {
    let addr = serve(config(false)).await;
    let mut ws = connect(addr, None).await;

    let greeting = next_event(&mut ws).await;
    assert_eq!(greeting["type"], "auth-ok");
    assert_eq!(greeting["user"]["id"], ANONYMOUS_USER_ID);
}

#[tokio::test]
async fn test_malformed_frame_gets_validation_error() {
    let addr = serve(config(true)).await;
    let mut ws = connect_as(addr, "s-1", "Ada", "student").await;

    ws.send(Message::Text("{\"type\":\"dance\"}".to_string()))
        .await
        .unwrap();
    let error = next_event(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "validation_error");

    // The session survives a bad frame
    join(&mut ws, Uuid::new_v4()).await;
}

// ============================================================================
// Rooms
// ============================================================================

#[tokio::test]
async fn test_chat_message_reaches_only_project_room() {
    let addr = serve(config(true)).await;
    let project = Uuid::new_v4();
    let elsewhere = Uuid::new_v4();

    let mut ada = connect_as(addr, "s-1", "Ada", "student").await;
    let mut grace = connect_as(addr, "t-1", "Grace", "instructor").await;
    let mut bob = connect_as(addr, "s-2", "Bob", "student").await;
    join(&mut ada, project).await;
    join(&mut grace, project).await;
    join(&mut bob, elsewhere).await;

    send_event(
        &mut ada,
        json!({
            "type": "chat-message",
            "projectId": project,
            "message": "What is photosynthesis?",
            "messageType": "text"
        }),
    )
    .await;

    let ack = next_of_type(&mut ada, "message-sent").await;
    assert!(ack["messageId"].is_string());

    let received = next_of_type(&mut grace, "chat-message").await;
    assert_eq!(received["message"]["content"], "What is photosynthesis?");
    assert_eq!(received["message"]["id"], ack["messageId"]);

    assert_quiet(&mut bob).await;
}

#[tokio::test]
async fn test_left_room_stops_receiving() {
    let addr = serve(config(true)).await;
    let project = Uuid::new_v4();

    let mut ada = connect_as(addr, "s-1", "Ada", "student").await;
    let mut grace = connect_as(addr, "t-1", "Grace", "instructor").await;
    join(&mut ada, project).await;
    join(&mut grace, project).await;

    send_event(&mut grace, json!({ "type": "leave-project", "projectId": project })).await;
    assert_eq!(next_event(&mut grace).await["type"], "left-project");

    send_event(&mut ada, json!({ "type": "typing-start", "projectId": project })).await;
    let typing = next_of_type(&mut ada, "user-typing").await;
    assert_eq!(typing["userId"], "s-1");

    assert_quiet(&mut grace).await;
}

#[tokio::test]
async fn test_close_announces_offline_to_room() {
    let addr = serve(config(true)).await;
    let project = Uuid::new_v4();

    let mut ada = connect_as(addr, "s-1", "Ada", "student").await;
    let mut grace = connect_as(addr, "t-1", "Grace", "instructor").await;
    join(&mut ada, project).await;
    join(&mut grace, project).await;

    ada.close(None).await.unwrap();

    let presence = next_of_type(&mut grace, "user-presence").await;
    assert_eq!(presence["userId"], "s-1");
    assert_eq!(presence["userName"], "Ada");
    assert_eq!(presence["status"], "offline");
    assert_eq!(presence["projectId"], project.to_string());
}
