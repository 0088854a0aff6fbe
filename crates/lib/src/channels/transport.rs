//! Transport seams: connect/subscribe and reply.

use crate::channels::inbound::MessageEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("discord bot token not configured")]
    MissingToken,
    #[error("discord rejected the bot token")]
    Unauthorized,
    #[error("discord request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("discord api error: {0}")]
    Api(String),
    #[error("gateway websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("gateway protocol error: {0}")]
    Protocol(String),
    #[error("gateway closed the session: {0}")]
    Rejected(String),
}

/// The authenticated bot account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: String,
    pub username: String,
}

impl BotIdentity {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }

    /// Text forms a client renders as "@bot": `<@id>` and the nickname form `<@!id>`.
    pub fn mention_tokens(&self) -> [String; 2] {
        [format!("<@{}>", self.id), format!("<@!{}>", self.id)]
    }
}

/// Outbound side of a live connection.
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Post a text message into a channel.
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), String>;
}

/// A live, subscribed gateway session.
pub struct GatewayConnection {
    pub identity: BotIdentity,
    pub sender: Arc<dyn ChannelHandle>,
    /// Inbound message events; closes when the transport ends.
    pub events: mpsc::Receiver<MessageEvent>,
}

/// Authenticates, opens the transport, and subscribes to message events.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    async fn connect(&self) -> Result<GatewayConnection, GatewayError>;
}
