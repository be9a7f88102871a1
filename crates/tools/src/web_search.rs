//! `web_search`: Brave Search API.

use async_trait::async_trait;
use clawloop_core::error::ToolError;
use clawloop_core::tool::{Tool, ToolArguments, ToolParameter, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::warn;

use crate::required_str;

const BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";
const MAX_COUNT: u64 = 20;

pub struct WebSearchTool {
    api_key: Option<String>,
    default_count: u64,
    endpoint: String,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>, default_count: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            default_count: (default_count as u64).clamp(1, MAX_COUNT),
            endpoint: BRAVE_ENDPOINT.into(),
            client,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub description: String,
}

#[derive(Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

fn parse_hits(body: &str, count: usize) -> Result<Vec<SearchHit>, serde_json::Error> {
    let response: BraveResponse = serde_json::from_str(body)?;
    Ok(response
        .web
        .map(|w| w.results)
        .unwrap_or_default()
        .into_iter()
        .take(count)
        .map(|r| SearchHit {
            title: r.title,
            url: r.url,
            description: r.description,
        })
        .collect())
}

fn render_hits(query: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No results for: {query}");
    }
    hits.iter()
        .enumerate()
        .map(|(i, h)| format!("{}. {}\n   {}\n   {}", i + 1, h.title, h.url, h.description))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns titles, URLs and snippets."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::string("query", "The search query"),
            ToolParameter::integer("count", "Number of results (1-20)")
                .with_default(json!(self.default_count)),
        ]
    }

    async fn execute(&self, arguments: ToolArguments) -> Result<ToolResult, ToolError> {
        let query = required_str(&arguments, self.name(), "query")?;
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ToolError::failed(
                self.name(),
                "web search is not configured (set BRAVE_API_KEY)",
            ));
        };
        let count = arguments
            .get("count")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.default_count)
            .clamp(1, MAX_COUNT);

        let response = self
            .client
            .get(&self.endpoint)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .query(&[("q", query), ("count", count.to_string().as_str())])
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Web search request failed");
                ToolError::failed(self.name(), "search request failed")
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Web search returned an error");
            return Err(ToolError::failed(
                self.name(),
                format!("search service returned HTTP {}", status.as_u16()),
            ));
        }

        let body = response.text().await.map_err(|e| {
            warn!(error = %e, "Web search body read failed");
            ToolError::failed(self.name(), "search request failed")
        })?;
        let hits = parse_hits(&body, count as usize).map_err(|e| {
            warn!(error = %e, "Web search response was not understood");
            ToolError::failed(self.name(), "search response was not understood")
        })?;

        Ok(ToolResult::ok(render_hits(query, &hits)).with_data(json!(hits)))
    }
}
