//! Discord connector against a local mock of the REST API and gateway websocket.
//! Covers login, Hello/Identify/READY, MESSAGE_CREATE dispatch and the reply POST.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parley::channels::{DiscordChannel, GatewayConnector, GatewayError};
use parley::config::{intents_bits, Intent};
use parley::llm::{Completion, CompletionBackend};
use parley::relay::ReplyPolicy;
use parley::session::{SessionManager, SessionState};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOKEN: &str = "good-token";

#[derive(Clone)]
struct MockDiscord {
    port: u16,
    reconnect_before_ready: bool,
    identify: Arc<Mutex<Option<Value>>>,
    posted: Arc<Mutex<Vec<(String, String)>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("authorization").and_then(|v| v.to_str().ok())
        == Some(format!("Bot {}", TOKEN).as_str())
}

async fn users_me(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "code": 0 }))).into_response();
    }
    Json(json!({ "id": "BOTID", "username": "parley", "bot": true })).into_response()
}

async fn gateway_bot(State(mock): State<MockDiscord>) -> Json<Value> {
    Json(json!({ "url": format!("ws://127.0.0.1:{}/gw", mock.port), "shards": 1 }))
}

async fn create_message(
    State(mock): State<MockDiscord>,
    Path(channel_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    let content = body["content"].as_str().unwrap_or("").to_string();
    mock.posted.lock().unwrap().push((channel_id, content));
    StatusCode::OK
}

async fn gateway_ws(State(mock): State<MockDiscord>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_gateway(socket, mock))
}

fn message_create(seq: i64, id: &str, content: &str, author_bot: bool, mentions: Value) -> String {
    json!({
        "op": 0, "s": seq, "t": "MESSAGE_CREATE",
        "d": {
            "id": id,
            "channel_id": "c1",
            "content": content,
            "author": { "id": if author_bot { "BOTID" } else { "u1" }, "username": "x", "bot": author_bot },
            "mentions": mentions
        }
    })
    .to_string()
}

async fn run_gateway(mut socket: WebSocket, mock: MockDiscord) {
    let hello = json!({ "op": 10, "d": { "heartbeat_interval": 45000 } });
    if socket.send(Message::Text(hello.to_string())).await.is_err() {
        return;
    }
    while let Some(Ok(msg)) = socket.recv().await {
        if let Message::Text(text) = msg {
            let v: Value = serde_json::from_str(&text).unwrap_or_default();
            if v["op"] == 2 {
                *mock.identify.lock().unwrap() = Some(v);
                break;
            }
        }
    }
    if mock.reconnect_before_ready {
        let reconnect = json!({ "op": 7, "d": null });
        if socket.send(Message::Text(reconnect.to_string())).await.is_err() {
            return;
        }
        while let Some(Ok(_)) = socket.recv().await {}
        return;
    }
    let ready = json!({
        "op": 0, "s": 1, "t": "READY",
        "d": { "v": 10, "session_id": "s1", "user": { "id": "BOTID", "username": "parley", "bot": true } }
    });
    let frames = [
        ready.to_string(),
        json!({ "op": 0, "s": 2, "t": "GUILD_CREATE", "d": {} }).to_string(),
        message_create(3, "m1", "<@BOTID> loop?", true, json!([{ "id": "BOTID" }])),
        message_create(4, "m2", "chatter", false, json!([])),
        message_create(5, "m3", "<@BOTID> hello", false, json!([{ "id": "BOTID" }])),
    ];
    for frame in frames {
        if socket.send(Message::Text(frame)).await.is_err() {
            return;
        }
    }
    while let Some(Ok(_)) = socket.recv().await {}
}

async fn serve_mock() -> MockDiscord {
    serve_mock_with(false).await
}

async fn serve_mock_with(reconnect_before_ready: bool) -> MockDiscord {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let port = listener.local_addr().expect("local_addr").port();
    let mock = MockDiscord {
        port,
        reconnect_before_ready,
        identify: Arc::new(Mutex::new(None)),
        posted: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/users/@me", get(users_me))
        .route("/gateway/bot", get(gateway_bot))
        .route("/channels/:id/messages", post(create_message))
        .route("/gw/", get(gateway_ws))
        .with_state(mock.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    mock
}

struct Echo;

#[async_trait]
impl CompletionBackend for Echo {
    async fn complete(&self, input: &str) -> Completion {
        Completion::Reply(format!("ECHO: {}", input))
    }
}

fn discord(mock: &MockDiscord, token: &str) -> DiscordChannel {
    DiscordChannel::new(
        Some(token.to_string()),
        intents_bits(&[Intent::GuildMessages, Intent::MessageContent]),
    )
    .with_api_base(&format!("http://127.0.0.1:{}", mock.port))
}

#[tokio::test]
async fn mention_over_gateway_gets_one_reply() {
    let mock = serve_mock().await;
    let session = SessionManager::new(
        Arc::new(discord(&mock, TOKEN)),
        Arc::new(Echo),
        ReplyPolicy::Mention,
    );
    session.ensure_started().await.expect("gateway start");
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.identity().map(|i| i.id.as_str()), Some("BOTID"));

    let identify = mock.identify.lock().unwrap().clone().expect("identify sent");
    assert_eq!(identify["d"]["token"], TOKEN);
    assert_eq!(identify["d"]["intents"], 512 | 32768);

    let mut posted = Vec::new();
    for _ in 0..200 {
        posted = mock.posted.lock().unwrap().clone();
        if !posted.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(posted, *mock.posted.lock().unwrap());
    assert_eq!(posted, vec![("c1".to_string(), "ECHO: hello".to_string())]);
}

#[tokio::test]
async fn bad_token_is_unauthorized_and_session_stays_absent() {
    let mock = serve_mock().await;
    let channel = discord(&mock, "bad-token");
    assert!(matches!(channel.connect().await, Err(GatewayError::Unauthorized)));

    let session = SessionManager::new(Arc::new(channel), Arc::new(Echo), ReplyPolicy::Mention);
    assert!(session.ensure_started().await.is_err());
    assert_eq!(session.state(), SessionState::Absent);
    assert!(mock.identify.lock().unwrap().is_none());
}

#[tokio::test]
async fn send_message_posts_content() {
    let mock = serve_mock().await;
    discord(&mock, TOKEN)
        .send_message("c9", "hi there")
        .await
        .expect("send");
    assert_eq!(
        *mock.posted.lock().unwrap(),
        vec![("c9".to_string(), "hi there".to_string())]
    );
    let err = discord(&mock, "bad-token")
        .send_message("c9", "x")
        .await
        .unwrap_err();
    assert!(err.contains("401"));
}

#[tokio::test]
async fn reconnect_before_ready_fails_connect() {
    let mock = serve_mock_with(true).await;
    let outcome = tokio::time::timeout(Duration::from_secs(5), discord(&mock, TOKEN).connect())
        .await
        .expect("connect returned instead of waiting for the socket to close");
    assert!(matches!(outcome, Err(GatewayError::Rejected(_))));
    assert!(mock.identify.lock().unwrap().is_some());
}
