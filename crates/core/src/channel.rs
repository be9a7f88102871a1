//! Channel-facing message types.
//!
//! Channels push `InboundMessage`s onto the bus and receive
//! `OutboundMessage`s back, keyed by conversation. The agent is agnostic
//! to how a channel delivers them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ChannelError;

/// Identifies one conversation: a chat on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub channel: String,
    pub chat_id: String,
}

impl ConversationKey {
    pub fn new(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
        }
    }

    /// Session id used by the message store.
    pub fn session_id(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.chat_id)
    }
}

/// A message received from a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            content: content.into(),
            received_at: Utc::now(),
        }
    }

    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.channel.clone(), self.chat_id.clone())
    }
}

/// How a reply was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    /// The model produced a final answer.
    Answer,
    /// The iteration bound was reached.
    Fallback,
    /// The provider circuit is open.
    Unavailable,
    /// The provider failed after retries, or with a fatal error.
    Failed,
    /// The inbound message was rejected before processing.
    Rejected,
}

/// A reply headed back to a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    pub kind: ReplyKind,
}

impl OutboundMessage {
    pub fn new(key: &ConversationKey, content: impl Into<String>, kind: ReplyKind) -> Self {
        Self {
            channel: key.channel.clone(),
            chat_id: key.chat_id.clone(),
            content: content.into(),
            kind,
        }
    }

    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.channel.clone(), self.chat_id.clone())
    }
}

/// Delivers outbound replies to users.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_key_combines_channel_and_chat() {
        let msg = InboundMessage::new("cli", "42", "user", "hello");
        let key = msg.key();
        assert_eq!(key, ConversationKey::new("cli", "42"));
        assert_eq!(key.session_id(), "cli:42");
    }

    #[test]
    fn outbound_round_trips_key() {
        let key = ConversationKey::new("telegram", "99");
        let out = OutboundMessage::new(&key, "hi", ReplyKind::Answer);
        assert_eq!(out.key(), key);
        let json = serde_json::to_string(&out).unwrap();
        assert!(json.contains("\"kind\":\"answer\""));
    }
}
