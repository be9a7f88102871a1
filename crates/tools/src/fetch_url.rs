//! `fetch_url`: download a page and return its readable text.

use async_trait::async_trait;
use clawloop_core::error::ToolError;
use clawloop_core::tool::{Tool, ToolArguments, ToolParameter, ToolResult};
use reqwest::Url;
use scraper::{Html, Node, Selector};
use serde_json::json;
use std::time::Duration;
use tracing::warn;

use crate::required_str;

const USER_AGENT: &str = concat!("clawloop/", env!("CARGO_PKG_VERSION"));
const DEFAULT_MAX_CHARS: u64 = 12_000;
const MIN_MAX_CHARS: u64 = 1_000;
const MAX_MAX_CHARS: u64 = 50_000;
/// Bodies are read up to this many bytes; the rest is discarded.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Elements whose text is never shown.
const HIDDEN: &[&str] = &["head", "script", "style", "noscript", "template", "svg"];
/// Elements that start a new line.
const BLOCKS: &[&str] = &[
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article",
    "header", "footer", "pre", "blockquote", "table", "ul", "ol",
];

pub struct FetchUrlTool {
    client: reqwest::Client,
}

impl FetchUrlTool {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for FetchUrlTool {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

/// Only absolute http(s) URLs with a host.
fn parse_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none_or(str::is_empty) {
        return None;
    }
    Some(url)
}

/// Visible text of an HTML document, and its `<title>`.
fn html_text(raw: &str) -> (String, Option<String>) {
    let document = Html::parse_document(raw);
    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next().map(|el| el.text().collect::<String>()))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty());

    let mut text = String::new();
    for node in document.root_element().descendants() {
        match node.value() {
            Node::Text(chunk) => {
                let hidden = node.ancestors().any(|a| {
                    a.value()
                        .as_element()
                        .is_some_and(|e| HIDDEN.contains(&e.name()))
                });
                if !hidden {
                    text.push_str(chunk);
                }
            }
            Node::Element(el) if BLOCKS.contains(&el.name()) => text.push('\n'),
            _ => {}
        }
    }
    (tidy(&text), title)
}

/// Collapse runs of blanks inside lines and keep at most one empty line.
fn tidy(text: &str) -> String {
    let mut out = String::new();
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 || out.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(&line);
        out.push('\n');
    }
    out.trim_end().to_string()
}

fn extract(body: &str, content_type: &str) -> (String, Option<String>) {
    if content_type.contains("application/json") {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            let pretty = serde_json::to_string_pretty(&value).unwrap_or_else(|_| body.to_string());
            return (pretty, None);
        }
        return (body.trim().to_string(), None);
    }
    if content_type.contains("text/html") || body.to_ascii_lowercase().contains("<html") {
        let (text, title) = html_text(body);
        if !text.is_empty() {
            return (text, title);
        }
        return (body.trim().to_string(), title);
    }
    (body.trim().to_string(), None)
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch an http(s) URL and return its readable text. Use this when the \
         user gives a direct link to read."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::string("url", "HTTP or HTTPS URL to fetch"),
            ToolParameter::integer("max_chars", "Characters to return (1000-50000)")
                .with_default(json!(DEFAULT_MAX_CHARS)),
        ]
    }

    async fn execute(&self, arguments: ToolArguments) -> Result<ToolResult, ToolError> {
        let raw = required_str(&arguments, self.name(), "url")?;
        let Some(url) = parse_url(raw) else {
            return Err(ToolError::invalid(self.name(), format!("not an http(s) URL: {raw}")));
        };
        let limit = arguments
            .get("max_chars")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_CHARS)
            .clamp(MIN_MAX_CHARS, MAX_MAX_CHARS) as usize;

        let mut response = self.client.get(url).send().await.map_err(|e| {
            warn!(error = %e, "fetch_url request failed");
            if e.is_timeout() {
                ToolError::failed(self.name(), format!("timed out fetching {raw}"))
            } else {
                ToolError::failed(self.name(), format!("could not fetch {raw}"))
            }
        })?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(ToolError::failed(
                self.name(),
                format!("HTTP {} while fetching {raw}", status.as_u16()),
            ));
        }
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            warn!(error = %e, "fetch_url body read failed");
            ToolError::failed(self.name(), format!("could not read {raw}"))
        })? {
            let room = MAX_BODY_BYTES - body.len();
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() >= MAX_BODY_BYTES {
                break;
            }
        }
        let body = String::from_utf8_lossy(&body);
        if body.trim().is_empty() {
            return Err(ToolError::failed(self.name(), format!("{raw} returned no content")));
        }

        let (text, title) = extract(&body, &content_type);
        let total_chars = text.chars().count();
        let truncated = total_chars > limit;
        let text: String = text.chars().take(limit).collect();

        let mut lines = vec![
            format!("URL: {final_url}"),
            format!("Status: {}", status.as_u16()),
            format!(
                "Content-Type: {}",
                if content_type.is_empty() { "unknown" } else { &content_type }
            ),
        ];
        if let Some(title) = &title {
            lines.push(format!("Title: {title}"));
        }
        if truncated {
            lines.push(format!("Note: content truncated to {limit} characters"));
        }
        lines.push(String::new());
        lines.push(text);

        Ok(ToolResult::ok(lines.join("\n")).with_data(json!({
            "url": final_url,
            "status_code": status.as_u16(),
            "content_type": content_type,
            "title": title,
            "truncated": truncated,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port.
    async fn serve_once(content_type: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{addr}/page")
    }

    fn args(value: serde_json::Value) -> ToolArguments {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn only_http_urls_are_accepted() {
        assert!(parse_url("https://example.com/a").is_some());
        assert!(parse_url(" http://example.com ").is_some());
        assert!(parse_url("file:///etc/passwd").is_none());
        assert!(parse_url("ftp://example.com").is_none());
        assert!(parse_url("example.com").is_none());
    }

    #[test]
    fn html_is_reduced_to_visible_text() {
        let page = "<html><head><title> Release\n notes </title><style>p{}</style></head>\
                    <body><script>alert(1)</script><h1>v2.0</h1><p>Faster   builds.</p>\
                    <ul><li>one</li><li>two &amp; three</li></ul></body></html>";
        let (text, title) = html_text(page);
        assert_eq!(title.as_deref(), Some("Release notes"));
        assert_eq!(text, "v2.0\nFaster builds.\n\none\ntwo & three");
        assert!(!text.contains("alert"));
    }

    #[test]
    fn json_is_pretty_printed() {
        let (text, title) = extract(r#"{"a":[1,2]}"#, "application/json; charset=utf-8");
        assert_eq!(text, "{\n  \"a\": [\n    1,\n    2\n  ]\n}");
        assert!(title.is_none());
    }

    #[tokio::test]
    async fn rejects_non_http_urls_before_fetching() {
        let tool = FetchUrlTool::default();
        let err = tool
            .execute(args(json!({"url": "file:///etc/passwd"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not an http(s) URL"));
    }

    #[tokio::test]
    async fn fetches_and_truncates_a_page() {
        let body = format!("<html><head><title>Long</title></head><body><p>{}</p></body></html>", "x".repeat(5000));
        let url = serve_once("text/html", body).await;
        let tool = FetchUrlTool::default();
        let result = tool
            .execute(args(json!({"url": url, "max_chars": 1000})))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("Status: 200"));
        assert!(result.output.contains("Title: Long"));
        assert!(result.output.contains("Note: content truncated to 1000 characters"));
        assert!(result.output.ends_with(&"x".repeat(1000)));
    }
}
