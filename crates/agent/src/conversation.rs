//! The bounded conversation window sent to the provider.
//!
//! Three bounds apply: message count, total bytes, and bytes per message.
//! Oversized messages are cut at append time; the window then drops the
//! oldest messages until both totals fit. The system prompt lives outside
//! the window and is always sent first.

use clawloop_config::AgentConfig;
use clawloop_core::message::{Message, Role};
use std::collections::VecDeque;
use tracing::debug;

/// Room kept at the end of a cut message for the marker.
const MARKER_RESERVE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimits {
    pub max_messages: usize,
    pub max_total_bytes: usize,
    pub max_message_bytes: usize,
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for WindowLimits {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_messages: config.max_history_messages,
            max_total_bytes: config.max_total_history_bytes,
            max_message_bytes: config.max_window_message_bytes,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversationWindow {
    messages: VecDeque<Message>,
    total_bytes: usize,
    limits: WindowLimits,
}

impl ConversationWindow {
    pub fn new(limits: WindowLimits) -> Self {
        Self {
            messages: VecDeque::new(),
            total_bytes: 0,
            limits,
        }
    }

    pub fn limits(&self) -> WindowLimits {
        self.limits
    }

    /// Append a message, cutting its content to the per-message cap, then
    /// trim from the front. Returns the content as stored.
    pub fn push(&mut self, mut message: Message) -> &str {
        message.content = truncate_content(&message.content, self.limits.max_message_bytes);
        self.total_bytes += message.size_bytes();
        self.messages.push_back(message);
        self.trim();
        self.messages
            .back()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    fn trim(&mut self) {
        let mut dropped = 0usize;
        while self.messages.len() > 1
            && (self.messages.len() > self.limits.max_messages
                || self.total_bytes > self.limits.max_total_bytes)
        {
            self.pop_front();
            dropped += 1;
        }
        // A tool result whose assistant turn was dropped answers nothing.
        while self.messages.len() > 1
            && self.messages.front().is_some_and(|m| m.role == Role::Tool)
        {
            self.pop_front();
            dropped += 1;
        }
        if dropped > 0 {
            debug!(
                dropped,
                remaining = self.messages.len(),
                bytes = self.total_bytes,
                "Trimmed conversation window"
            );
        }
    }

    fn pop_front(&mut self) {
        if let Some(old) = self.messages.pop_front() {
            self.total_bytes = self.total_bytes.saturating_sub(old.size_bytes());
        }
    }

    /// The provider prompt: system message followed by the window.
    pub fn to_prompt(&self, system_prompt: &str) -> Vec<Message> {
        std::iter::once(Message::system(system_prompt))
            .chain(self.messages.iter().cloned())
            .collect()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.total_bytes = 0;
    }
}

/// Cut `content` to at most `max_bytes` on a character boundary, ending
/// with a `[truncated N bytes]` marker.
pub fn truncate_content(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }
    // Too small for the marker: plain cut.
    let marked = max_bytes > MARKER_RESERVE;
    let mut cut = if marked { max_bytes - MARKER_RESERVE } else { max_bytes };
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    if !marked {
        return content[..cut].to_string();
    }
    let removed = content.len() - cut;
    format!("{}\n[truncated {removed} bytes]", &content[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawloop_core::message::MessageToolCall;

    fn limits(max_messages: usize, max_total_bytes: usize, max_message_bytes: usize) -> WindowLimits {
        WindowLimits {
            max_messages,
            max_total_bytes,
            max_message_bytes,
        }
    }

    fn contents(window: &ConversationWindow) -> Vec<String> {
        window.messages().map(|m| m.content.clone()).collect()
    }

    #[test]
    fn tiny_caps_never_exceed_the_limit() {
        let long = "é".repeat(100);
        for cap in [1, 7, 16, 32, 33, 64] {
            let out = truncate_content(&long, cap);
            assert!(out.len() <= cap, "cap {cap} produced {} bytes", out.len());
        }
        assert_eq!(truncate_content(&long, 16), "é".repeat(8));
        assert!(truncate_content(&long, 64).ends_with("[truncated 168 bytes]"));
    }

    #[test]
    fn keeps_order_under_limits() {
        let mut window = ConversationWindow::new(limits(10, 1000, 100));
        window.push(Message::user("one"));
        window.push(Message::assistant("two"));
        window.push(Message::user("three"));
        assert_eq!(contents(&window), ["one", "two", "three"]);
        assert_eq!(window.total_bytes(), 11);
    }

    #[test]
    fn count_limit_drops_oldest() {
        let mut window = ConversationWindow::new(limits(3, 1000, 100));
        for i in 0..5 {
            window.push(Message::user(format!("m{i}")));
        }
        assert_eq!(contents(&window), ["m2", "m3", "m4"]);
    }

    #[test]
    fn byte_limit_drops_oldest() {
        let mut window = ConversationWindow::new(limits(100, 25, 100));
        window.push(Message::user("a".repeat(10)));
        window.push(Message::user("b".repeat(10)));
        window.push(Message::user("c".repeat(10)));
        assert_eq!(window.len(), 2);
        assert!(window.total_bytes() <= 25);
        assert!(contents(&window)[0].starts_with('b'));
    }

    #[test]
    fn system_prompt_always_first() {
        let mut window = ConversationWindow::new(limits(1, 1000, 100));
        window.push(Message::user("old"));
        window.push(Message::user("new"));
        let prompt = window.to_prompt("You are helpful.");
        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt[0].role, Role::System);
        assert_eq!(prompt[0].content, "You are helpful.");
        assert_eq!(prompt[1].content, "new");
    }

    #[test]
    fn oversized_message_is_cut_with_marker() {
        let mut window = ConversationWindow::new(limits(10, 10_000, 100));
        let stored = window.push(Message::tool_result("c1", "x".repeat(500))).to_string();
        assert!(stored.len() <= 100);
        assert!(stored.ends_with("[truncated 432 bytes]"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(100);
        let cut = truncate_content(&text, 65);
        assert!(cut.len() <= 65);
        assert!(cut.starts_with("éé"));
        assert!(cut.ends_with("bytes]"));
        assert_eq!(truncate_content("short", 65), "short");
    }

    #[test]
    fn orphaned_tool_results_are_dropped() {
        let mut window = ConversationWindow::new(limits(2, 10_000, 1000));
        window.push(Message::user("list"));
        window.push(Message::assistant_with_calls(
            "",
            vec![MessageToolCall {
                id: "c1".into(),
                name: "list_dir".into(),
                arguments: "{}".into(),
            }],
        ));
        window.push(Message::tool_result("c1", "a.txt"));
        window.push(Message::user("next"));
        // The assistant turn fell out, so its result goes too.
        let roles: Vec<_> = window.messages().map(|m| m.role).collect();
        assert_eq!(roles, [Role::User]);
    }
}
