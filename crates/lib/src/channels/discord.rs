//! Discord channel: gateway websocket for inbound messages, REST API for replies.
//!
//! Connect sequence: `GET /users/@me` (token check), `GET /gateway/bot`, websocket Hello,
//! Identify, then wait for the READY dispatch. After READY a reader task turns
//! `MESSAGE_CREATE` dispatches into [`MessageEvent`]s and a heartbeat task keeps the
//! session alive. Transport loss is logged, not recovered.

use crate::channels::inbound::MessageEvent;
use crate::channels::transport::{
    BotIdentity, ChannelHandle, GatewayConnection, GatewayConnector, GatewayError,
};
use crate::config::{self, Config};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
const DEFAULT_HEARTBEAT_MS: u64 = 41_250;
const EVENT_BUFFER: usize = 256;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;

/// Gateway close code for a bad token.
const CLOSE_AUTHENTICATION_FAILED: u16 = 4004;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Gateway frame: `{ "op", "d", "s", "t" }`.
#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<i64>,
    #[serde(default)]
    t: Option<String>,
}

/// Discord user object (subset).
#[derive(Debug, Clone, Deserialize)]
struct DiscordUser {
    id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    bot: bool,
}

impl From<DiscordUser> for BotIdentity {
    fn from(u: DiscordUser) -> Self {
        BotIdentity::new(u.id, u.username)
    }
}

#[derive(Debug, Deserialize)]
struct Ready {
    user: DiscordUser,
}

/// `MESSAGE_CREATE` dispatch data (subset).
#[derive(Debug, Deserialize)]
struct MessageCreate {
    id: String,
    channel_id: String,
    #[serde(default)]
    content: String,
    author: DiscordUser,
    #[serde(default)]
    mentions: Vec<DiscordUser>,
}

impl From<MessageCreate> for MessageEvent {
    fn from(m: MessageCreate) -> Self {
        MessageEvent {
            message_id: m.id,
            author_id: m.author.id,
            author_is_bot: m.author.bot,
            channel_id: m.channel_id,
            content: m.content,
            mentions: m.mentions.into_iter().map(|u| u.id).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GatewayBotResponse {
    url: String,
}

/// Discord bot connector. Cheap to clone; clones share the HTTP client.
#[derive(Clone)]
pub struct DiscordChannel {
    token: Option<String>,
    intents: u64,
    api_base: String,
    client: reqwest::Client,
}

impl DiscordChannel {
    pub fn new(token: Option<String>, intents: u64) -> Self {
        Self {
            token,
            intents,
            api_base: DISCORD_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from config (token from env or file, configured intents and API base).
    pub fn from_config(config: &Config) -> Self {
        let channel = Self::new(
            config::resolve_discord_token(config),
            config::intents_bits(&config.discord.intents),
        );
        match config.discord.api_base.as_deref() {
            Some(base) if !base.trim().is_empty() => channel.with_api_base(base),
            _ => channel,
        }
    }

    /// Override the REST base URL (tests, proxies).
    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim().trim_end_matches('/').to_string();
        self
    }

    fn token(&self) -> Result<&str, GatewayError> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(GatewayError::MissingToken)
    }

    fn authorization(token: &str) -> String {
        format!("Bot {}", token)
    }

    /// GET /users/@me — validates the token and returns the bot account.
    async fn current_user(&self) -> Result<DiscordUser, GatewayError> {
        let token = self.token()?;
        let url = format!("{}/users/@me", self.api_base);
        let res = self
            .client
            .get(&url)
            .header("Authorization", Self::authorization(token))
            .send()
            .await?;
        if res.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Unauthorized);
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("users/@me failed: {} {}", status, body)));
        }
        Ok(res.json().await?)
    }

    /// GET /gateway/bot — websocket URL with version and encoding query.
    async fn gateway_url(&self) -> Result<String, GatewayError> {
        let token = self.token()?;
        let url = format!("{}/gateway/bot", self.api_base);
        let res = self
            .client
            .get(&url)
            .header("Authorization", Self::authorization(token))
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("gateway/bot failed: {} {}", status, body)));
        }
        let data: GatewayBotResponse = res.json().await?;
        Ok(format!("{}/?v=10&encoding=json", data.url.trim_end_matches('/')))
    }

    /// Send a text message to a channel via POST /channels/{id}/messages.
    pub async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), String> {
        let token = self.token().map_err(|e| e.to_string())?;
        let url = format!("{}/channels/{}/messages", self.api_base, channel_id);
        let res = self
            .client
            .post(&url)
            .header("Authorization", Self::authorization(token))
            .json(&json!({ "content": text }))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("create message failed: {} {}", status, body));
        }
        Ok(())
    }

    /// Send Identify and wait for READY. Returns the bot user from READY.
    async fn identify(
        &self,
        token: &str,
        write: &Mutex<WsWrite>,
        read: &mut WsRead,
        seq: &AtomicI64,
    ) -> Result<DiscordUser, GatewayError> {
        let frame = identify_payload(token, self.intents);
        write
            .lock()
            .await
            .send(Message::Text(frame.to_string()))
            .await?;
        loop {
            let payload = next_payload(read).await?;
            if let Some(s) = payload.s {
                seq.store(s, Ordering::SeqCst);
            }
            match payload.op {
                OP_DISPATCH if payload.t.as_deref() == Some("READY") => {
                    let ready: Ready = serde_json::from_value(payload.d)
                        .map_err(|e| GatewayError::Protocol(format!("bad READY payload: {}", e)))?;
                    return Ok(ready.user);
                }
                OP_INVALID_SESSION => {
                    return Err(GatewayError::Rejected("invalid session".to_string()))
                }
                OP_RECONNECT => {
                    return Err(GatewayError::Rejected(
                        "reconnect requested before READY".to_string(),
                    ))
                }
                OP_HEARTBEAT => send_heartbeat(write, seq).await?,
                _ => {}
            }
        }
    }
}

#[async_trait]
impl GatewayConnector for DiscordChannel {
    async fn connect(&self) -> Result<GatewayConnection, GatewayError> {
        let token = self.token()?.to_string();
        let me = self.current_user().await?;
        log::info!("discord: logged in as {} ({})", me.username, me.id);

        let url = self.gateway_url().await?;
        log::info!("discord: connecting to gateway {}", url);
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        let (write, mut read) = ws.split();

        let hello = next_payload(&mut read).await?;
        if hello.op != OP_HELLO {
            return Err(GatewayError::Protocol(format!(
                "expected hello (op {}), got op {}",
                OP_HELLO, hello.op
            )));
        }
        let interval_ms = hello
            .d
            .get("heartbeat_interval")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_HEARTBEAT_MS);
        log::debug!("discord: heartbeat interval {}ms", interval_ms);

        let write = Arc::new(Mutex::new(write));
        let seq = Arc::new(AtomicI64::new(-1));
        let alive = Arc::new(AtomicBool::new(true));
        let heartbeat = HeartbeatGuard::new(
            spawn_heartbeat(write.clone(), interval_ms, seq.clone(), alive.clone()),
            alive.clone(),
        );

        // an error or a dropped future here stops the heartbeat through the guard
        let user = self.identify(&token, &write, &mut read, &seq).await?;
        heartbeat.disarm();
        let identity = BotIdentity::from(user);
        log::info!(
            "discord: gateway ready as {} ({})",
            identity.username,
            identity.id
        );

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(run_reader(read, write, seq, alive, tx));

        Ok(GatewayConnection {
            identity,
            sender: Arc::new(self.clone()),
            events: rx,
        })
    }
}

#[async_trait]
impl ChannelHandle for DiscordChannel {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), String> {
        DiscordChannel::send_message(self, channel_id, text).await
    }
}

fn identify_payload(token: &str, intents: u64) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": intents,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "parley",
                "device": "parley"
            }
        }
    })
}

fn heartbeat_payload(seq: i64) -> Value {
    let d = if seq < 0 { Value::Null } else { json!(seq) };
    json!({ "op": OP_HEARTBEAT, "d": d })
}

async fn send_heartbeat(write: &Mutex<WsWrite>, seq: &AtomicI64) -> Result<(), GatewayError> {
    let frame = heartbeat_payload(seq.load(Ordering::SeqCst));
    write
        .lock()
        .await
        .send(Message::Text(frame.to_string()))
        .await?;
    Ok(())
}

/// Read frames until the next JSON payload. Close frames end the session.
async fn next_payload(read: &mut WsRead) -> Result<GatewayPayload, GatewayError> {
    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => {
                return serde_json::from_str(&text)
                    .map_err(|e| GatewayError::Protocol(format!("bad payload: {}", e)));
            }
            Message::Close(frame) => {
                let Some(frame) = frame else {
                    return Err(GatewayError::Rejected("closed without frame".to_string()));
                };
                if frame.code == CloseCode::from(CLOSE_AUTHENTICATION_FAILED) {
                    return Err(GatewayError::Unauthorized);
                }
                return Err(GatewayError::Rejected(format!(
                    "{} {}",
                    u16::from(frame.code),
                    frame.reason
                )));
            }
            _ => continue,
        }
    }
    Err(GatewayError::Protocol("connection closed".to_string()))
}

fn spawn_heartbeat(
    write: Arc<Mutex<WsWrite>>,
    interval_ms: u64,
    seq: Arc<AtomicI64>,
    alive: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !alive.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = send_heartbeat(&write, &seq).await {
                log::warn!("discord: heartbeat failed: {}", e);
                break;
            }
        }
        log::debug!("discord: heartbeat stopped");
    })
}

/// Stops the heartbeat task on drop unless [`HeartbeatGuard::disarm`] was called.
struct HeartbeatGuard {
    task: Option<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
}

impl HeartbeatGuard {
    fn new(task: JoinHandle<()>, alive: Arc<AtomicBool>) -> Self {
        Self {
            task: Some(task),
            alive,
        }
    }

    /// Leave the heartbeat running; the reader owns the session from here.
    fn disarm(mut self) {
        self.task = None;
    }
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.alive.store(false, Ordering::SeqCst);
            task.abort();
            log::debug!("discord: heartbeat stopped before READY");
        }
    }
}

async fn run_reader(
    mut read: WsRead,
    write: Arc<Mutex<WsWrite>>,
    seq: Arc<AtomicI64>,
    alive: Arc<AtomicBool>,
    tx: mpsc::Sender<MessageEvent>,
) {
    while alive.load(Ordering::SeqCst) {
        let payload = match next_payload(&mut read).await {
            Ok(p) => p,
            Err(e) => {
                log::warn!("discord: gateway connection ended: {}", e);
                break;
            }
        };
        if let Some(s) = payload.s {
            seq.store(s, Ordering::SeqCst);
        }
        match payload.op {
            OP_DISPATCH => {
                if payload.t.as_deref() != Some("MESSAGE_CREATE") {
                    continue;
                }
                match serde_json::from_value::<MessageCreate>(payload.d) {
                    Ok(m) => {
                        if tx.send(m.into()).await.is_err() {
                            log::debug!("discord: event receiver closed, stopping reader");
                            break;
                        }
                    }
                    Err(e) => log::debug!("discord: skipping malformed MESSAGE_CREATE: {}", e),
                }
            }
            OP_HEARTBEAT => {
                if let Err(e) = send_heartbeat(&write, &seq).await {
                    log::warn!("discord: heartbeat failed: {}", e);
                    break;
                }
            }
            OP_RECONNECT | OP_INVALID_SESSION => {
                log::warn!(
                    "discord: gateway requested reconnect (op {}); session is not resumed",
                    payload.op
                );
                break;
            }
            _ => {}
        }
    }
    alive.store(false, Ordering::SeqCst);
    log::info!("discord: gateway reader stopped");
}
