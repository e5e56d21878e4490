use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{System, ToolOutput};
use crate::errors::{AgentError, AgentResult};
use crate::models::caller::CallerContext;
use crate::models::tool::{Tool, ToolCall};

pub const SEARCH_HOST: &str = "https://api.duckduckgo.com";
pub const MAX_SNIPPETS: usize = 5;
const MAX_SNIPPET_CHARS: usize = 300;

/// General web lookups for market prices and agricultural news
pub struct SearchSystem {
    tools: Vec<Tool>,
    client: Client,
    base_url: String,
}

impl SearchSystem {
    pub fn new(base_url: Option<String>) -> anyhow::Result<Self> {
        let search_market = Tool::new(
            "search_market",
            "Search the web for market prices, crop information and agricultural news \
            that the marketplace itself does not have.",
            json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to search for, e.g. 'maize wholesale price Kenya'."
                    }
                }
            }),
        );

        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        let base_url = base_url.unwrap_or_else(|| SEARCH_HOST.to_string());

        Ok(Self {
            tools: vec![search_market],
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn search_market(&self, tool_call: &ToolCall) -> AgentResult<Value> {
        let query = tool_call
            .str_arg("query")
            .ok_or_else(|| AgentError::InvalidParameters("Missing 'query' parameter".into()))?;

        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|e| AgentError::ExecutionError(format!("Search service unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::ExecutionError(format!(
                "Search service returned {}",
                status
            )));
        }

        // The instant answer API sometimes labels JSON as javascript, so parse the body ourselves
        let body = response
            .text()
            .await
            .map_err(|e| AgentError::ExecutionError(e.to_string()))?;
        let answer: Value = serde_json::from_str(&body)
            .map_err(|e| AgentError::ExecutionError(format!("Unreadable search response: {}", e)))?;

        let results = collect_snippets(&answer);
        Ok(json!({
            "query": query,
            "count": results.len(),
            "results": results,
        }))
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_SNIPPET_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_SNIPPET_CHARS).collect();
    format!("{}...", cut.trim_end())
}

fn snippet(text: Option<&str>, url: Option<&str>) -> Option<Value> {
    let text = text.map(str::trim).filter(|t| !t.is_empty())?;
    Some(json!({
        "text": truncate(text),
        "url": url.filter(|u| !u.is_empty()),
    }))
}

/// Abstract first, then related topics, flattening topic groups
fn collect_snippets(answer: &Value) -> Vec<Value> {
    let mut snippets = Vec::new();

    snippets.extend(snippet(
        answer.get("AbstractText").and_then(Value::as_str),
        answer.get("AbstractURL").and_then(Value::as_str),
    ));

    let topics = answer
        .get("RelatedTopics")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .flat_map(|topic| match topic.get("Topics").and_then(Value::as_array) {
            Some(group) => group.iter().collect::<Vec<_>>(),
            None => vec![topic],
        });

    for topic in topics {
        if snippets.len() >= MAX_SNIPPETS {
            break;
        }
        snippets.extend(snippet(
            topic.get("Text").and_then(Value::as_str),
            topic.get("FirstURL").and_then(Value::as_str),
        ));
    }

    snippets.truncate(MAX_SNIPPETS);
    snippets
}

#[async_trait]
impl System for SearchSystem {
    fn name(&self) -> &str {
        "SearchSystem"
    }

    fn description(&self) -> &str {
        "Searches the web for market and agriculture information"
    }

    fn instructions(&self) -> &str {
        "Use search_market for prices, trends or facts that are not in the marketplace. \
        Summarize what you find and say when nothing relevant came back."
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall, _caller: &CallerContext) -> AgentResult<ToolOutput> {
        match tool_call.name.as_str() {
            "search_market" => self.search_market(&tool_call).await.map(ToolOutput::value),
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}
