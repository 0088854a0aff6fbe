//! Round trip through the session manager: inbound mention -> echo completion -> one reply.

use async_trait::async_trait;
use parley::channels::{
    BotIdentity, ChannelHandle, GatewayConnection, GatewayConnector, GatewayError, MessageEvent,
};
use parley::llm::{Completion, CompletionBackend};
use parley::relay::ReplyPolicy;
use parley::session::SessionManager;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ChannelHandle for RecordingSender {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), String> {
        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }
}

struct Echo;

#[async_trait]
impl CompletionBackend for Echo {
    async fn complete(&self, input: &str) -> Completion {
        Completion::Reply(format!("ECHO: {}", input))
    }
}

/// Hands out one connection whose event sender the test keeps.
struct PipeConnector {
    sender: Arc<RecordingSender>,
    events: Mutex<Option<mpsc::Sender<MessageEvent>>>,
}

#[async_trait]
impl GatewayConnector for PipeConnector {
    async fn connect(&self) -> Result<GatewayConnection, GatewayError> {
        let (tx, rx) = mpsc::channel(16);
        *self.events.lock().unwrap() = Some(tx);
        Ok(GatewayConnection {
            identity: BotIdentity::new("BOTID", "parley"),
            sender: self.sender.clone(),
            events: rx,
        })
    }
}

fn event(id: &str, text: &str, author_is_bot: bool, mentions: &[&str]) -> MessageEvent {
    MessageEvent {
        message_id: id.to_string(),
        author_id: "u1".to_string(),
        author_is_bot,
        channel_id: "general".to_string(),
        content: text.to_string(),
        mentions: mentions.iter().map(|m| m.to_string()).collect(),
    }
}

async fn wait_for_sends(sender: &RecordingSender, n: usize) -> Vec<(String, String)> {
    for _ in 0..100 {
        let sent = sender.sent.lock().unwrap().clone();
        if sent.len() >= n {
            return sent;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    sender.sent.lock().unwrap().clone()
}

#[tokio::test]
async fn mention_is_echoed_once() {
    let sender = Arc::new(RecordingSender::default());
    let connector = Arc::new(PipeConnector {
        sender: sender.clone(),
        events: Mutex::new(None),
    });
    let session = SessionManager::new(connector.clone(), Arc::new(Echo), ReplyPolicy::Mention);
    session.ensure_started().await.expect("start");

    let tx = connector.events.lock().unwrap().clone().expect("connected");
    tx.send(event("m0", "<@BOTID> ignored", true, &["BOTID"]))
        .await
        .unwrap();
    tx.send(event("m1", "not for us", false, &[])).await.unwrap();
    tx.send(event("m2", "<@BOTID> hello", false, &["BOTID"]))
        .await
        .unwrap();

    let sent = wait_for_sends(&sender, 1).await;
    // give stray dispatches a chance to show up
    tokio::time::sleep(Duration::from_millis(50)).await;
    let sent_after = sender.sent.lock().unwrap().clone();
    assert_eq!(sent, sent_after);
    assert_eq!(
        sent,
        vec![("general".to_string(), "ECHO: hello".to_string())]
    );
}
