//! Inbound message event from the gateway: delivered to the relay once, then dropped.

/// One received chat message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageEvent {
    pub message_id: String,
    pub author_id: String,
    /// True when the author is a bot account (including this bot).
    pub author_is_bot: bool,
    /// Channel the message was posted in; replies go back here.
    pub channel_id: String,
    pub content: String,
    /// User ids explicitly mentioned in the message.
    pub mentions: Vec<String>,
}

impl MessageEvent {
    /// True if `user_id` is in the mentioned-users set.
    pub fn mentions_user(&self, user_id: &str) -> bool {
        self.mentions.iter().any(|m| m == user_id)
    }
}
