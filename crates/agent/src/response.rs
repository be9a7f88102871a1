//! A provider response with its tool calls resolved.

use clawloop_core::error::ToolError;
use clawloop_core::message::{Message, MessageToolCall};
use clawloop_core::provider::{FinishReason, ProviderResponse};
use clawloop_core::tool::ToolCall;
use serde_json::Value;
use tracing::warn;

use crate::tool_parser::parse_tool_calls;

/// Where the tool calls of a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSource {
    /// The provider's structured `tool_calls` field.
    Native,
    /// Recovered from the reply text.
    Parsed,
    /// No calls; the content is a final answer.
    None,
}

/// A native call whose arguments could not be decoded. It still gets a
/// tool message so the model sees the failure against its call id.
#[derive(Debug, Clone)]
pub struct RejectedCall {
    pub id: String,
    pub name: String,
    pub raw_arguments: String,
    pub error: ToolError,
}

#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub content: String,
    pub calls: Vec<ToolCall>,
    pub rejected: Vec<RejectedCall>,
    pub source: CallSource,
    pub finish_reason: FinishReason,
}

impl ParsedResponse {
    /// Resolve calls from a provider response, preferring native calls.
    pub fn from_provider(response: ProviderResponse) -> Self {
        let finish_reason = response.finish_reason;
        let message = response.message;

        if !message.tool_calls.is_empty() {
            let mut calls = Vec::new();
            let mut rejected = Vec::new();
            for native in message.tool_calls {
                let id = if native.id.is_empty() {
                    new_call_id()
                } else {
                    native.id
                };
                match decode_native_arguments(&native.arguments) {
                    Ok(arguments) => calls.push(ToolCall::new(id, native.name, arguments)),
                    Err(reason) => {
                        warn!(tool = %native.name, call_id = %id, %reason, "Undecodable native tool arguments");
                        rejected.push(RejectedCall {
                            error: ToolError::invalid(&native.name, reason),
                            id,
                            name: native.name,
                            raw_arguments: native.arguments,
                        });
                    }
                }
            }
            return Self {
                content: message.content,
                calls,
                rejected,
                source: CallSource::Native,
                finish_reason,
            };
        }

        let parsed = parse_tool_calls(&message.content);
        if parsed.is_empty() {
            return Self {
                content: message.content,
                calls: Vec::new(),
                rejected: Vec::new(),
                source: CallSource::None,
                finish_reason,
            };
        }

        let calls = parsed
            .into_iter()
            .map(|p| ToolCall::new(new_call_id(), p.name, p.arguments))
            .collect();
        Self {
            content: message.content,
            calls,
            rejected: Vec::new(),
            source: CallSource::Parsed,
            finish_reason,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.calls.is_empty() || !self.rejected.is_empty()
    }

    /// The assistant turn to append to history, carrying every call id so
    /// the tool messages that follow have something to answer.
    pub fn assistant_message(&self) -> Message {
        if !self.has_tool_calls() {
            return Message::assistant(&self.content);
        }
        let mut embedded: Vec<MessageToolCall> = self
            .calls
            .iter()
            .map(|c| MessageToolCall {
                id: c.id.clone(),
                name: c.name.clone(),
                arguments: Value::Object(c.arguments.clone()).to_string(),
            })
            .collect();
        embedded.extend(self.rejected.iter().map(|r| MessageToolCall {
            id: r.id.clone(),
            name: r.name.clone(),
            arguments: r.raw_arguments.clone(),
        }));
        Message::assistant_with_calls(&self.content, embedded)
    }
}

fn decode_native_arguments(raw: &str) -> Result<serde_json::Map<String, Value>, String> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(serde_json::Map::new()),
        Ok(_) => Err("arguments must be a JSON object".into()),
        Err(e) => Err(format!("arguments are not valid JSON: {e}")),
    }
}

fn new_call_id() -> String {
    format!("call_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(message: Message) -> ProviderResponse {
        ProviderResponse {
            message,
            usage: None,
            model: "mock".into(),
            finish_reason: FinishReason::Stop,
            metadata: serde_json::Map::new(),
        }
    }

    fn native(id: &str, name: &str, arguments: &str) -> MessageToolCall {
        MessageToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    #[test]
    fn plain_text_is_final() {
        let parsed = ParsedResponse::from_provider(response(Message::assistant("All done.")));
        assert_eq!(parsed.source, CallSource::None);
        assert!(!parsed.has_tool_calls());
        assert!(parsed.assistant_message().tool_calls.is_empty());
    }

    #[test]
    fn native_calls_win_over_text() {
        let msg = Message::assistant_with_calls(
            r#"{"name": "shell", "arguments": {"command": "ls"}}"#,
            vec![native("call_1", "read_file", r#"{"path": "a.txt"}"#)],
        );
        let parsed = ParsedResponse::from_provider(response(msg));
        assert_eq!(parsed.source, CallSource::Native);
        assert_eq!(parsed.calls.len(), 1);
        assert_eq!(parsed.calls[0].id, "call_1");
        assert_eq!(parsed.calls[0].name, "read_file");
        assert_eq!(parsed.calls[0].arguments["path"], json!("a.txt"));
    }

    #[test]
    fn text_calls_get_fresh_ids() {
        let msg = Message::assistant(r#"[{"name": "list_dir"}, {"name": "list_dir"}]"#);
        let parsed = ParsedResponse::from_provider(response(msg));
        assert_eq!(parsed.source, CallSource::Parsed);
        assert_eq!(parsed.calls.len(), 2);
        assert!(parsed.calls[0].id.starts_with("call_"));
        assert_ne!(parsed.calls[0].id, parsed.calls[1].id);
    }

    #[test]
    fn bad_native_arguments_are_rejected_not_dropped() {
        let msg = Message::assistant_with_calls(
            "",
            vec![
                native("call_a", "read_file", "[1, 2]"),
                native("call_b", "list_dir", ""),
                native("call_c", "write_file", "{oops"),
            ],
        );
        let parsed = ParsedResponse::from_provider(response(msg));
        assert_eq!(parsed.calls.len(), 1);
        assert_eq!(parsed.calls[0].id, "call_b");
        assert_eq!(parsed.rejected.len(), 2);
        assert!(matches!(parsed.rejected[0].error, ToolError::InvalidArguments { .. }));

        let assistant = parsed.assistant_message();
        let ids: Vec<_> = assistant.tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["call_b", "call_a", "call_c"]);
    }
}
