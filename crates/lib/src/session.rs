//! Gateway session lifecycle: at most one live connection per [`SessionManager`].
//!
//! `ensure_started` is called by every trigger, possibly many times a minute. The first call
//! connects and subscribes; later calls return immediately. Concurrent first calls share one
//! attempt through a single-assignment cell. A failed attempt leaves the session `Absent`
//! so the next trigger retries.

use crate::channels::{BotIdentity, DiscordChannel, GatewayConnector, GatewayError, MessageEvent};
use crate::config::Config;
use crate::llm::{AzureOpenAiClient, CompletionBackend};
use crate::relay::{ReplyPolicy, Relay};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;

/// Session lifecycle. There is no transition back from `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Absent,
    Connecting,
    Connected,
}

/// The live connection: dispatcher for inbound events plus the task draining them.
struct SessionHandle {
    relay: Relay,
    dispatcher: JoinHandle<()>,
}

/// Owns the single gateway session and routes its events through a [`Relay`].
pub struct SessionManager {
    connector: Arc<dyn GatewayConnector>,
    completion: Arc<dyn CompletionBackend>,
    policy: ReplyPolicy,
    handle: OnceCell<SessionHandle>,
    connecting: AtomicBool,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn GatewayConnector>,
        completion: Arc<dyn CompletionBackend>,
        policy: ReplyPolicy,
    ) -> Self {
        Self {
            connector,
            completion,
            policy,
            handle: OnceCell::new(),
            connecting: AtomicBool::new(false),
        }
    }

    /// Discord connector and Azure OpenAI client built from config.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(DiscordChannel::from_config(config)),
            Arc::new(AzureOpenAiClient::from_config(config)),
            ReplyPolicy::from_config(config),
        )
    }

    /// Connect and subscribe unless already done. Errors are fatal for this attempt only.
    pub async fn ensure_started(&self) -> Result<(), GatewayError> {
        if self.handle.initialized() {
            return Ok(());
        }
        self.handle.get_or_try_init(|| self.start()).await?;
        Ok(())
    }

    async fn start(&self) -> Result<SessionHandle, GatewayError> {
        let connecting = ConnectingGuard::new(&self.connecting);
        log::info!("session: starting gateway connection");
        let conn = self.connector.connect().await.map_err(|e| {
            log::error!("session: gateway startup failed: {}", e);
            e
        })?;
        // stays set until the cell is filled so `state` never flickers to Absent
        connecting.disarm();
        let relay = Relay::new(
            conn.identity,
            self.policy.clone(),
            self.completion.clone(),
            conn.sender,
        );
        let dispatcher = tokio::spawn(dispatch_events(relay.clone(), conn.events));
        log::info!(
            "session: bot started as {} ({})",
            relay.identity().username,
            relay.identity().id
        );
        Ok(SessionHandle { relay, dispatcher })
    }

    pub fn state(&self) -> SessionState {
        if self.handle.initialized() {
            SessionState::Connected
        } else if self.connecting.load(Ordering::SeqCst) {
            SessionState::Connecting
        } else {
            SessionState::Absent
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Authenticated bot account, once connected.
    pub fn identity(&self) -> Option<&BotIdentity> {
        self.handle.get().map(|h| h.relay.identity())
    }

    /// False once the transport's event stream has ended. The session itself stays `Connected`.
    pub fn transport_open(&self) -> bool {
        self.handle
            .get()
            .map(|h| !h.dispatcher.is_finished())
            .unwrap_or(false)
    }
}

/// Marks an attempt in flight; clears the mark on drop unless disarmed, so an error or a
/// cancelled caller both leave the session `Absent`.
struct ConnectingGuard<'a> {
    flag: &'a AtomicBool,
    armed: bool,
}

impl<'a> ConnectingGuard<'a> {
    fn new(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self { flag, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(false, Ordering::SeqCst);
        }
    }
}

/// One task per inbound event; no ordering between replies.
async fn dispatch_events(relay: Relay, mut events: mpsc::Receiver<MessageEvent>) {
    while let Some(event) = events.recv().await {
        let relay = relay.clone();
        tokio::spawn(async move {
            let message_id = event.message_id.clone();
            let outcome = relay.on_message(event).await;
            log::debug!("session: message {} -> {:?}", message_id, outcome);
        });
    }
    log::warn!("session: gateway event stream ended");
}
