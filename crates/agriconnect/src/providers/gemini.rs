use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::base::{Provider, Usage};
use super::configs::{present_key, GeminiProviderConfig};
use super::errors::ProviderError;
use super::utils::{
    check_unique_names, classify_http_error, parse_tool_request, sanitize_function_name,
    INVALID_TOOL_NAME,
};
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::Tool;

/// Adapter for the Gemini `generateContent` API
pub struct GeminiProvider {
    client: Client,
    config: GeminiProviderConfig,
}

impl GeminiProvider {
    pub fn new(config: GeminiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Usage {
        let Some(usage) = data.get("usageMetadata") else {
            return Usage::default();
        };
        let count = |key: &str| usage.get(key).and_then(Value::as_i64).map(|v| v as i32);

        Usage::new(
            count("promptTokenCount"),
            count("candidatesTokenCount"),
            count("totalTokenCount"),
        )
    }

    async fn post(&self, payload: Value) -> Result<Value, ProviderError> {
        let api_key = present_key(&self.config.api_key)
            .ok_or_else(|| ProviderError::NotConfigured("Gemini API key is not set".to_string()))?;
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.host.trim_end_matches('/'),
            self.config.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            status => {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(provider = "gemini", %status, body = %body, "generateContent request failed");
                Err(classify_http_error(status, &body))
            }
        }
    }
}

/// Convert internal messages to Gemini `contents`.
///
/// Gemini function responses are matched by name rather than id, so the name of
/// each request is remembered until its response is converted.
pub fn messages_to_gemini_spec(messages: &[Message]) -> Vec<Value> {
    let mut names_by_id: HashMap<&str, String> = HashMap::new();
    let mut contents = Vec::new();

    for message in messages {
        let mut parts = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        parts.push(json!({"text": text.text}));
                    }
                }
                MessageContent::Image(image) => {
                    parts.push(json!({
                        "inlineData": {"mimeType": image.mime_type, "data": image.data}
                    }));
                }
                MessageContent::ToolRequest(request) => {
                    let (name, args) = match &request.tool_call {
                        Ok(call) => (sanitize_function_name(&call.name), call.arguments.clone()),
                        Err(_) => (INVALID_TOOL_NAME.to_string(), json!({})),
                    };
                    names_by_id.insert(request.id.as_str(), name.clone());
                    parts.push(json!({"functionCall": {"name": name, "args": args}}));
                }
                MessageContent::ToolResponse(response) => {
                    let name = names_by_id
                        .get(response.id.as_str())
                        .cloned()
                        .unwrap_or_else(|| INVALID_TOOL_NAME.to_string());
                    let payload = match response.payload() {
                        object @ Value::Object(_) => object,
                        other => json!({ "result": other }),
                    };
                    parts.push(json!({"functionResponse": {"name": name, "response": payload}}));
                }
            }
        }

        if parts.is_empty() {
            continue;
        }
        let role = match message.role {
            Role::Assistant => "model",
            Role::User | Role::Tool => "user",
        };
        contents.push(json!({"role": role, "parts": parts}));
    }

    contents
}

pub fn tools_to_gemini_spec(tools: &[Tool]) -> Result<Value, ProviderError> {
    check_unique_names(tools)?;
    let declarations: Vec<Value> = tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            })
        })
        .collect();
    Ok(json!([{ "functionDeclarations": declarations }]))
}

/// Convert a `generateContent` response into an assistant message.
///
/// A response without a usable candidate becomes an empty message; deciding
/// what that means is left to the agent.
pub fn gemini_response_to_message(response: &Value) -> Message {
    let mut message = Message::assistant();

    let Some(parts) = response
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
    else {
        if let Some(reason) = response
            .get("promptFeedback")
            .and_then(|f| f.get("blockReason"))
        {
            tracing::warn!(block_reason = %reason, "gemini blocked the prompt");
        }
        return message;
    };

    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            if !text.is_empty() {
                message = message.with_text(text);
            }
        } else if let Some(call) = part.get("functionCall") {
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
            let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
            let request = parse_tool_request(&id, name, || match call.get("args") {
                None | Some(Value::Null) => Ok(json!({})),
                Some(args @ Value::Object(_)) => Ok(args.clone()),
                Some(other) => Err(format!("expected an object, got {}", other)),
            });
            message = message.with_content(request);
        }
    }

    message
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn check_configured(&self) -> Result<(), ProviderError> {
        present_key(&self.config.api_key)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotConfigured("Gemini API key is not set".to_string()))
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage), ProviderError> {
        let mut contents = messages_to_gemini_spec(messages);
        let mut payload = json!({});

        // Gemini rejects requests without contents, so an opening turn carries the instructions itself
        if contents.is_empty() {
            contents.push(json!({"role": "user", "parts": [{"text": system}]}));
        } else {
            payload["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        payload["contents"] = json!(contents);

        if !tools.is_empty() {
            payload["tools"] = tools_to_gemini_spec(tools)?;
        }

        let mut generation_config = json!({});
        if let Some(temp) = self.config.temperature {
            generation_config["temperature"] = json!(temp);
        }
        if let Some(tokens) = self.config.max_tokens {
            generation_config["maxOutputTokens"] = json!(tokens);
        }
        payload["generationConfig"] = generation_config;

        let response = self.post(payload).await?;

        Ok((
            gemini_response_to_message(&response),
            Self::get_usage(&response),
        ))
    }
}
