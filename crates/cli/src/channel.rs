//! Terminal channel: stdin lines in, replies out on stdout.

use async_trait::async_trait;
use clawloop_core::channel::{Channel, InboundMessage, OutboundMessage, ReplyKind};
use clawloop_core::error::ChannelError;
use std::io::{BufRead, Write};
use tokio::sync::mpsc;
use tracing::warn;

pub const CHANNEL_NAME: &str = "cli";

/// Writes replies to stdout. Interactive mode prefixes each line.
pub struct StdoutChannel {
    interactive: bool,
}

impl StdoutChannel {
    pub fn new(interactive: bool) -> Self {
        Self { interactive }
    }

    pub fn prompt(&self) {
        print!("  You > ");
        let _ = std::io::stdout().flush();
    }
}

fn render(message: &OutboundMessage, interactive: bool) -> String {
    let tag = match message.kind {
        ReplyKind::Answer => "",
        ReplyKind::Fallback => "[incomplete] ",
        ReplyKind::Unavailable => "[unavailable] ",
        ReplyKind::Failed => "[error] ",
        ReplyKind::Rejected => "[rejected] ",
    };
    if !interactive {
        return format!("{tag}{}", message.content);
    }
    let mut out = String::new();
    for (i, line) in message.content.lines().enumerate() {
        let prefix = if i == 0 { tag } else { "" };
        out.push_str(&format!("  Assistant > {prefix}{line}\n"));
    }
    out
}

#[async_trait]
impl Channel for StdoutChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        let text = render(message, self.interactive);
        let mut stdout = std::io::stdout().lock();
        let written = if self.interactive {
            writeln!(stdout).and_then(|_| writeln!(stdout, "{text}"))
        } else {
            writeln!(stdout, "{text}")
        };
        written.and_then(|_| stdout.flush()).map_err(|e| ChannelError::DeliveryFailed {
            channel: CHANNEL_NAME.into(),
            reason: e.to_string(),
        })
    }
}

/// Read stdin lines into inbound messages for `chat_id` until EOF or an
/// exit command. Runs on a plain thread so a pending read never holds up
/// runtime shutdown.
pub fn spawn_stdin_reader(chat_id: String, tx: mpsc::Sender<InboundMessage>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line.trim().to_string(),
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    break;
                }
            };
            if line.is_empty() {
                continue;
            }
            if matches!(line.as_str(), "exit" | "quit" | "/exit" | "/quit" | ":q") {
                break;
            }
            let message = InboundMessage::new(CHANNEL_NAME, &chat_id, "local_user", line);
            if tx.blocking_send(message).is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawloop_core::channel::ConversationKey;

    #[test]
    fn single_shot_output_is_plain() {
        let key = ConversationKey::new("cli", "default");
        let out = OutboundMessage::new(&key, "two\nlines", ReplyKind::Answer);
        assert_eq!(render(&out, false), "two\nlines");
    }

    #[test]
    fn interactive_output_is_prefixed_and_tagged() {
        let key = ConversationKey::new("cli", "default");
        let out = OutboundMessage::new(&key, "busy\ntry later", ReplyKind::Unavailable);
        assert_eq!(
            render(&out, true),
            "  Assistant > [unavailable] busy\n  Assistant > try later\n"
        );
    }
}
