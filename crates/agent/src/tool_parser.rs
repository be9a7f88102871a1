//! Recover tool calls from plain-text model output.
//!
//! Models without native function calling are told (in the system prompt)
//! to answer with a JSON call object. In practice they also wrap calls in
//! markdown fences or XML-ish tags, so several shapes are accepted:
//!
//! 1. the whole reply is JSON: `{"name": "list_dir", "arguments": {}}`
//! 2. fenced blocks: ```` ```json {...} ``` ````
//! 3. attribute tags: `<tool_call name="x" arguments='{...}'/>`
//! 4. tag bodies: `<tool_call>{...}</tool_call>` or
//!    `<tool_call><function=x><parameter=k>v</parameter></function></tool_call>`
//! 5. key/value lines: `tool: read_file arguments: {"path": "a"}`
//!
//! Strategies run in that order and the first one that yields a call wins.
//! Every scan moves a cursor forward with `str::find`, so input size bounds
//! the work.

use clawloop_core::tool::ToolArguments;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// A call recovered from text. Ids are assigned by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: ToolArguments,
}

/// Extract tool calls from `content`. Returns an empty list when the text
/// holds no recognizable call.
pub fn parse_tool_calls(content: &str) -> Vec<ParsedToolCall> {
    let strategies: [(&str, fn(&str) -> Vec<ParsedToolCall>); 5] = [
        ("whole_json", parse_whole_json),
        ("fenced_json", parse_fenced_blocks),
        ("attribute_tag", parse_attribute_tags),
        ("tag_body", parse_tag_bodies),
        ("key_value", parse_key_value),
    ];
    for (label, strategy) in strategies {
        let calls = strategy(content);
        if !calls.is_empty() {
            debug!(strategy = label, count = calls.len(), "Recovered tool calls from text");
            return calls;
        }
    }
    Vec::new()
}

fn parse_whole_json(content: &str) -> Vec<ParsedToolCall> {
    let trimmed = content.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => calls_from_value(&value),
        Err(e) => {
            warn!(error = %e, "Reply looks like JSON but does not parse, ignoring");
            Vec::new()
        }
    }
}

fn parse_fenced_blocks(content: &str) -> Vec<ParsedToolCall> {
    let mut calls = Vec::new();
    let mut rest = content;
    while let Some(open) = rest.find("```") {
        let after_ticks = &rest[open + 3..];
        let line_end = after_ticks.find('\n').unwrap_or(after_ticks.len());
        let lang = after_ticks[..line_end].trim().to_ascii_lowercase();
        let body_start = (line_end + 1).min(after_ticks.len());
        let body = &after_ticks[body_start..];
        let Some(close) = body.find("```") else {
            break;
        };
        if lang.is_empty() || lang == "json" || lang == "tool_call" {
            let mut block = body[..close].trim();
            if let Some(stripped) = block.strip_prefix("tool_call") {
                block = stripped.trim_start();
            }
            if block.starts_with('{') || block.starts_with('[') {
                match serde_json::from_str::<Value>(block) {
                    Ok(value) => calls.extend(calls_from_value(&value)),
                    Err(e) => warn!(error = %e, "Malformed JSON in fenced block, ignoring"),
                }
            }
        }
        rest = &body[close + 3..];
    }
    calls
}

fn parse_attribute_tags(content: &str) -> Vec<ParsedToolCall> {
    let mut calls = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find("<tool_call") {
        let after = &rest[start + "<tool_call".len()..];
        // `<tool_call>` bodies belong to the next strategy.
        if !after.starts_with(|c: char| c.is_whitespace()) {
            rest = after;
            continue;
        }
        let (attrs, consumed) = tag_attributes(after);
        rest = &after[consumed..];

        let value = |key: &str| attrs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);
        let Some(name) = value("name").map(str::trim).filter(|n| !n.is_empty()) else {
            continue;
        };
        let arguments = match value("arguments") {
            Some(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(v) => normalize_arguments(v),
                Err(e) => {
                    warn!(tool = %name, error = %e, "Malformed tool_call arguments, ignoring");
                    continue;
                }
            },
            None => Map::new(),
        };
        calls.push(ParsedToolCall {
            name: name.to_string(),
            arguments,
        });
    }
    calls
}

/// Read `key="value"` pairs left to right until the tag's closing `>`.
///
/// Quoted values are skipped whole, so they may contain `>` or `<`. An
/// unquoted `<` ends the tag early (the next tag starts there). Returns
/// the pairs and the number of bytes consumed.
fn tag_attributes(tag: &str) -> (Vec<(&str, &str)>, usize) {
    let bytes = tag.as_bytes();
    let skip_ws = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        i
    };

    let mut attrs = Vec::new();
    let mut i = 0;
    loop {
        i = skip_ws(i);
        match bytes.get(i) {
            None => return (attrs, i),
            Some(b'>') => return (attrs, i + 1),
            Some(b'<') => return (attrs, i),
            Some(b'/') => {
                i += 1;
                continue;
            }
            Some(_) => {}
        }

        let key_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'>' | b'<' | b'/')
        {
            i += 1;
        }
        let key = &tag[key_start..i];
        i = skip_ws(i);
        if bytes.get(i) != Some(&b'=') {
            // Bare attribute.
            continue;
        }
        i = skip_ws(i + 1);

        match bytes.get(i) {
            Some(&quote @ (b'"' | b'\'')) => {
                let value_start = i + 1;
                let Some(len) = tag[value_start..].find(quote as char) else {
                    return (attrs, tag.len());
                };
                attrs.push((key, &tag[value_start..value_start + len]));
                i = value_start + len + 1;
            }
            Some(_) => {
                let value_start = i;
                while i < bytes.len()
                    && !bytes[i].is_ascii_whitespace()
                    && !matches!(bytes[i], b'>' | b'<')
                {
                    i += 1;
                }
                let value = tag[value_start..i].trim_end_matches('/');
                attrs.push((key, value));
            }
            None => return (attrs, i),
        }
    }
}

fn parse_tag_bodies(content: &str) -> Vec<ParsedToolCall> {
    let mut calls = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find("<tool_call>") {
        let after = &rest[start + "<tool_call>".len()..];
        let Some(end) = after.find("</tool_call>") else {
            break;
        };
        let body = after[..end].trim();
        if body.starts_with('{') || body.starts_with('[') {
            match serde_json::from_str::<Value>(body) {
                Ok(value) => calls.extend(calls_from_value(&value)),
                Err(e) => warn!(error = %e, "Malformed JSON in tool_call body, ignoring"),
            }
        } else if let Some(call) = parse_function_body(body) {
            calls.push(call);
        }
        rest = &after[end + "</tool_call>".len()..];
    }
    calls
}

/// `<function=NAME><parameter=KEY>VALUE</parameter>...</function>`
fn parse_function_body(body: &str) -> Option<ParsedToolCall> {
    let start = body.find("<function=")? + "<function=".len();
    let name_end = body[start..].find('>')? + start;
    let name = body[start..name_end].trim().to_string();
    if name.is_empty() {
        return None;
    }

    let mut arguments = Map::new();
    let mut rest = &body[name_end + 1..];
    while let Some(p) = rest.find("<parameter=") {
        let key_start = p + "<parameter=".len();
        let Some(key_len) = rest[key_start..].find('>') else {
            break;
        };
        let key = rest[key_start..key_start + key_len].trim().to_string();
        let value_start = key_start + key_len + 1;
        let Some(value_len) = rest[value_start..].find("</parameter>") else {
            break;
        };
        let raw = rest[value_start..value_start + value_len].trim();
        // Scalars like `5` or `true` keep their JSON type.
        let value = match serde_json::from_str::<Value>(raw) {
            Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::Array(_) | Value::Object(_))) => v,
            _ => Value::String(raw.to_string()),
        };
        if !key.is_empty() {
            arguments.insert(key, value);
        }
        rest = &rest[value_start + value_len + "</parameter>".len()..];
    }
    Some(ParsedToolCall { name, arguments })
}

/// `tool: NAME arguments: {...}`, case-insensitive, one call per match.
fn parse_key_value(content: &str) -> Vec<ParsedToolCall> {
    // ASCII lowercasing keeps byte offsets aligned with `content`.
    let lower = content.to_ascii_lowercase();
    let bytes = content.as_bytes();
    let mut calls = Vec::new();
    let mut pos = 0;

    while let Some(found) = lower[pos..].find("tool") {
        let at = pos + found;
        pos = at + "tool".len();
        if at > 0 && is_ident_byte(bytes[at - 1]) {
            continue;
        }

        // `tool:` or `tool ` then the name.
        let mut i = pos;
        while i < bytes.len() && (bytes[i] == b':' || bytes[i].is_ascii_whitespace()) {
            i += 1;
        }
        if i == pos || i >= bytes.len() || !(bytes[i].is_ascii_alphabetic() || bytes[i] == b'_') {
            continue;
        }
        let name_start = i;
        while i < bytes.len() && is_ident_byte(bytes[i]) {
            i += 1;
        }
        let name = &content[name_start..i];

        let label_start = skip_ascii_ws(bytes, i);
        if label_start == i || !lower[label_start..].starts_with("argument") {
            continue;
        }
        let mut j = label_start + "argument".len();
        if lower[j..].starts_with('s') {
            j += 1;
        }
        let value_start = {
            let mut k = j;
            while k < bytes.len() && (bytes[k] == b':' || bytes[k].is_ascii_whitespace()) {
                k += 1;
            }
            k
        };
        if value_start == j || !matches!(bytes.get(value_start), Some(b'{' | b'[')) {
            continue;
        }
        let Some(len) = balanced_json_len(&content[value_start..]) else {
            break;
        };
        let raw = &content[value_start..value_start + len];
        pos = value_start + len;
        match serde_json::from_str::<Value>(raw) {
            Ok(v) => calls.push(ParsedToolCall {
                name: name.to_string(),
                arguments: normalize_arguments(v),
            }),
            Err(e) => warn!(tool = %name, error = %e, "Malformed key/value arguments, ignoring"),
        }
    }
    calls
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn skip_ascii_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Length of the bracketed JSON value at the start of `s`, honoring
/// strings and escapes. `None` when it never closes.
fn balanced_json_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, b) in s.bytes().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Calls described by a decoded JSON value.
fn calls_from_value(value: &Value) -> Vec<ParsedToolCall> {
    match value {
        Value::Array(items) => items.iter().flat_map(calls_from_value).collect(),
        Value::Object(obj) => {
            if let Some(inner) = obj.get("tool_calls") {
                return calls_from_value(inner);
            }
            // OpenAI-style `{"type": "function", "function": {...}}`
            if let Some(Value::Object(function)) = obj.get("function") {
                return call_from_object(function).into_iter().collect();
            }
            call_from_object(obj).into_iter().collect()
        }
        _ => Vec::new(),
    }
}

fn call_from_object(obj: &Map<String, Value>) -> Option<ParsedToolCall> {
    let name = obj.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let raw = obj
        .get("arguments")
        .or_else(|| obj.get("parameters"))
        .cloned()
        .unwrap_or(Value::Null);

    let arguments = match raw {
        Value::String(s) if s.trim().is_empty() => Map::new(),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(v) => normalize_arguments(v),
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool arguments string is not JSON, ignoring call");
                return None;
            }
        },
        other => normalize_arguments(other),
    };
    Some(ParsedToolCall {
        name: name.to_string(),
        arguments,
    })
}

/// Objects pass through, null means no arguments, anything else is
/// wrapped as `{"value": ...}`.
fn normalize_arguments(value: Value) -> ToolArguments {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn one(content: &str) -> ParsedToolCall {
        let calls = parse_tool_calls(content);
        assert_eq!(calls.len(), 1, "expected one call in {content:?}, got {calls:?}");
        calls.into_iter().next().unwrap()
    }

    #[test]
    fn whole_content_json() {
        let call = one(r#"{"name": "list_dir", "arguments": {}}"#);
        assert_eq!(call.name, "list_dir");
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn whole_content_array_and_wrapper() {
        let calls = parse_tool_calls(
            r#"[{"name": "read_file", "arguments": {"path": "a"}}, {"name": "list_dir"}]"#,
        );
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments["path"], json!("a"));

        let wrapped = one(
            r#"{"tool_calls": [{"type": "function", "function": {"name": "shell", "arguments": "{\"command\": \"ls\"}"}}]}"#,
        );
        assert_eq!(wrapped.name, "shell");
        assert_eq!(wrapped.arguments["command"], json!("ls"));
    }

    #[test]
    fn parameters_key_and_scalar_arguments() {
        let call = one(r#"{"name": "web_search", "parameters": {"query": "rust"}}"#);
        assert_eq!(call.arguments["query"], json!("rust"));

        let wrapped = one(r#"{"name": "echo", "arguments": 42}"#);
        assert_eq!(wrapped.arguments["value"], json!(42));
    }

    #[test]
    fn fenced_block_inside_prose() {
        let content = "Let me look.\n```json\n{\"name\": \"read_file\", \"arguments\": {\"path\": \"Cargo.toml\"}}\n```\nDone.";
        let call = one(content);
        assert_eq!(call.name, "read_file");
        assert_eq!(call.arguments["path"], json!("Cargo.toml"));
    }

    #[test]
    fn fenced_non_json_language_is_ignored() {
        let content = "```rust\n{\"name\": \"x\"}\n```";
        assert!(parse_tool_calls(content).is_empty());
    }

    #[test]
    fn attribute_tag() {
        let content = r#"Sure. <tool_call name="write_file" arguments='{"path": "a.txt", "content": "x > y"}'/> ok"#;
        let call = one(content);
        assert_eq!(call.name, "write_file");
        assert_eq!(call.arguments["content"], json!("x > y"));
    }

    #[test]
    fn multiple_attribute_tags() {
        let content = r#"<tool_call name="list_dir" arguments='{}'/><tool_call name="read_file" arguments='{"path":"b"}'/>"#;
        let calls = parse_tool_calls(content);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].name, "read_file");
    }

    #[test]
    fn tag_body_json() {
        let call = one("<tool_call>\n{\"name\": \"list_dir\", \"arguments\": {\"path\": \"src\"}}\n</tool_call>");
        assert_eq!(call.arguments["path"], json!("src"));
    }

    #[test]
    fn tag_body_function_parameters() {
        let content = "<tool_call>\n<function=web_search>\n<parameter=query>\nrust async\n</parameter>\n<parameter=count>\n3\n</parameter>\n</function>\n</tool_call>";
        let call = one(content);
        assert_eq!(call.name, "web_search");
        assert_eq!(call.arguments["query"], json!("rust async"));
        assert_eq!(call.arguments["count"], json!(3));
    }

    #[test]
    fn plain_text_has_no_calls() {
        assert!(parse_tool_calls("The directory contains three files.").is_empty());
        assert!(parse_tool_calls(r#"{"answer": 42}"#).is_empty());
        assert!(parse_tool_calls("").is_empty());
    }

    #[test]
    fn malformed_json_is_discarded() {
        assert!(parse_tool_calls(r#"{"name": "list_dir", "arguments": {"#).is_empty());
        assert!(parse_tool_calls("```json\n{not json}\n```").is_empty());
        assert!(parse_tool_calls(r#"<tool_call name="x" arguments='{broken'/>"#).is_empty());
    }

    #[test]
    fn attribute_order_does_not_matter() {
        let content = r#"<tool_call arguments='{"path": "a.txt", "content": "a > b"}' name="write_file"/>"#;
        let call = one(content);
        assert_eq!(call.name, "write_file");
        assert_eq!(call.arguments["content"], json!("a > b"));
    }

    #[test]
    fn prefixed_keys_are_not_confused_with_name() {
        let content = r#"<tool_call filename="notes.txt" name="read_file" arguments='{}'/>"#;
        let call = one(content);
        assert_eq!(call.name, "read_file");

        let content = r#"<tool_call tool_name="x" my_arguments='{"a":1}' name="list_dir"/>"#;
        let call = one(content);
        assert_eq!(call.name, "list_dir");
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn unterminated_attribute_quote_is_dropped() {
        assert!(parse_tool_calls(r#"<tool_call name="read_file arguments='{}'/>"#).is_empty());
    }

    #[test]
    fn key_value_format() {
        let call = one("I'll check.\ntool: read_file\narguments: {\"path\": \"notes.txt\"}");
        assert_eq!(call.name, "read_file");
        assert_eq!(call.arguments["path"], json!("notes.txt"));

        let nested = one(r#"Tool: write_file Arguments: {"path": "a", "content": "{not} a brace"}"#);
        assert_eq!(nested.arguments["content"], json!("{not} a brace"));
    }

    #[test]
    fn key_value_needs_a_word_boundary() {
        assert!(parse_tool_calls("mytool: x arguments: {\"a\": 1}").is_empty());
        assert!(parse_tool_calls("The tool list_dir takes no arguments.").is_empty());
    }

    #[test]
    fn unterminated_constructs_do_not_hang() {
        let nasty = "<tool_call ".repeat(10_000) + &"```".repeat(10_000);
        assert!(parse_tool_calls(&nasty).is_empty());
        let nasty = "tool: x arguments: {\"".repeat(10_000);
        assert!(parse_tool_calls(&nasty).is_empty());
    }

    #[test]
    fn whole_json_wins_over_later_strategies() {
        let content = r#"{"name": "list_dir", "arguments": {"path": "<tool_call name=\"x\"/>"}}"#;
        let call = one(content);
        assert_eq!(call.name, "list_dir");
    }
}
