//! Inbound message dispatch: filter, clean, complete, reply.
//!
//! Each call handles one event independently; nothing here is mutated after construction,
//! so concurrent calls for different events need no synchronization.

use crate::channels::{BotIdentity, ChannelHandle, MessageEvent};
use crate::config::{self, Config, ReplyPolicyMode};
use crate::llm::{Completion, CompletionBackend};
use std::sync::Arc;

/// Which messages are answered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReplyPolicy {
    /// Only messages that mention the bot account.
    #[default]
    Mention,
    /// Every message in one fixed channel.
    Channel(String),
}

impl ReplyPolicy {
    /// Policy from config. Channel mode without a channel id falls back to mention mode.
    pub fn from_config(config: &Config) -> Self {
        Self::resolve(
            config.discord.reply_policy,
            config::resolve_discord_channel_id(config),
        )
    }

    /// Policy for a mode and an already-resolved channel id.
    pub fn resolve(mode: ReplyPolicyMode, channel_id: Option<String>) -> Self {
        match mode {
            ReplyPolicyMode::Mention => ReplyPolicy::Mention,
            ReplyPolicyMode::Channel => match channel_id {
                Some(id) => ReplyPolicy::Channel(id),
                None => {
                    log::warn!("relay: replyPolicy is \"channel\" but no channel id is set; using mention policy");
                    ReplyPolicy::Mention
                }
            },
        }
    }

    fn addresses(&self, event: &MessageEvent, identity: &BotIdentity) -> bool {
        match self {
            ReplyPolicy::Mention => event.mentions_user(&identity.id),
            ReplyPolicy::Channel(id) => event.channel_id == *id,
        }
    }
}

/// What happened to one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Author is a bot.
    IgnoredBot,
    /// Not addressed to us under the active policy.
    NotAddressed,
    /// Completion was empty or failed; nothing sent.
    NoReply,
    /// Reply sent to the originating channel.
    Replied,
    /// Reply produced but the send failed.
    SendFailed,
}

/// Remove every mention of the bot and trim.
pub fn clean_input(text: &str, identity: &BotIdentity) -> String {
    let mut out = text.to_string();
    for token in identity.mention_tokens() {
        out = out.replace(&token, "");
    }
    out.trim().to_string()
}

/// Per-session dispatcher: bot identity, reply sink, completion backend, policy.
#[derive(Clone)]
pub struct Relay {
    identity: BotIdentity,
    policy: ReplyPolicy,
    completion: Arc<dyn CompletionBackend>,
    sender: Arc<dyn ChannelHandle>,
}

impl Relay {
    pub fn new(
        identity: BotIdentity,
        policy: ReplyPolicy,
        completion: Arc<dyn CompletionBackend>,
        sender: Arc<dyn ChannelHandle>,
    ) -> Self {
        Self {
            identity,
            policy,
            completion,
            sender,
        }
    }

    pub fn identity(&self) -> &BotIdentity {
        &self.identity
    }

    /// Handle one message event. Sends at most one message.
    pub async fn on_message(&self, event: MessageEvent) -> Dispatch {
        if event.author_is_bot {
            return Dispatch::IgnoredBot;
        }
        if !self.policy.addresses(&event, &self.identity) {
            return Dispatch::NotAddressed;
        }

        let input = clean_input(&event.content, &self.identity);
        log::debug!(
            "relay: message {} from {} in {} ({} chars)",
            event.message_id,
            event.author_id,
            event.channel_id,
            input.chars().count()
        );

        let reply = match self.completion.complete(&input).await {
            Completion::Reply(text) => text,
            Completion::Empty => {
                log::debug!("relay: empty completion for {}, not replying", event.message_id);
                return Dispatch::NoReply;
            }
            Completion::Failed(e) => {
                log::warn!("relay: completion failed for {}: {}", event.message_id, e);
                return Dispatch::NoReply;
            }
        };
        if reply.is_empty() {
            return Dispatch::NoReply;
        }

        match self.sender.send_message(&event.channel_id, &reply).await {
            Ok(()) => Dispatch::Replied,
            Err(e) => {
                log::warn!("relay: send_message to {} failed: {}", event.channel_id, e);
                Dispatch::SendFailed
            }
        }
    }
}
