use lazy_static::lazy_static;
use regex::Regex;
use reqwest::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use super::errors::ProviderError;
use crate::errors::AgentError;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    static ref VALID_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Placeholder name sent for tool requests the model produced with an unusable name
pub const INVALID_TOOL_NAME: &str = "invalid_tool";

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut parts = Vec::new();
        let mut tool_calls = Vec::new();
        let mut tool_outputs = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        parts.push(json!({"type": "text", "text": text.text}));
                    }
                }
                MessageContent::Image(image) => {
                    parts.push(json!({
                        "type": "image_url",
                        "image_url": {"url": image.to_data_url()}
                    }));
                }
                MessageContent::ToolRequest(request) => {
                    // Failed requests are still declared so their error result has a call to answer
                    let (name, arguments) = match &request.tool_call {
                        Ok(tool_call) => (
                            sanitize_function_name(&tool_call.name),
                            tool_call.arguments.to_string(),
                        ),
                        Err(_) => (INVALID_TOOL_NAME.to_string(), "{}".to_string()),
                    };
                    tool_calls.push(json!({
                        "id": request.id,
                        "type": "function",
                        "function": {"name": name, "arguments": arguments}
                    }));
                }
                MessageContent::ToolResponse(response) => {
                    tool_outputs.push(json!({
                        "role": "tool",
                        "content": response.payload().to_string(),
                        "tool_call_id": response.id
                    }));
                }
            }
        }

        if message.role == Role::Tool {
            messages_spec.extend(tool_outputs);
            continue;
        }

        let mut converted = json!({ "role": message.role });
        let single_text = parts.len() == 1 && parts[0]["type"] == "text";
        if single_text {
            converted["content"] = parts[0]["text"].clone();
        } else if !parts.is_empty() {
            converted["content"] = json!(parts);
        }
        if !tool_calls.is_empty() {
            converted["tool_calls"] = json!(tool_calls);
        }

        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            messages_spec.push(converted);
        }
        messages_spec.extend(tool_outputs);
    }

    messages_spec
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>, ProviderError> {
    check_unique_names(tools)?;
    Ok(tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            })
        })
        .collect())
}

pub fn check_unique_names(tools: &[Tool]) -> Result<(), ProviderError> {
    let mut tool_names = std::collections::HashSet::new();
    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(ProviderError::RequestFailed(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }
    }
    Ok(())
}

/// Convert OpenAI's API response to internal Message format
pub fn openai_response_to_message(response: Value) -> Result<Message, ProviderError> {
    let original = response
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .cloned()
        .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))?;
    let mut message = Message::assistant();

    if let Some(text) = original.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            message = message.with_text(text);
        }
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(Value::as_array) {
        for tool_call in tool_calls {
            let id = tool_call["id"]
                .as_str()
                .filter(|id| !id.is_empty())
                .map(String::from)
                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
            let function_name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default();

            let request = parse_tool_request(&id, &function_name, || {
                if arguments.trim().is_empty() {
                    Ok(json!({}))
                } else {
                    serde_json::from_str::<Value>(arguments).map_err(|e| e.to_string())
                }
            });
            message = message.with_content(request);
        }
    }

    Ok(message)
}

/// Build a tool request, turning bad names or undecodable arguments into an error the model will see
pub fn parse_tool_request<F>(id: &str, function_name: &str, arguments: F) -> MessageContent
where
    F: FnOnce() -> Result<Value, String>,
{
    if !is_valid_function_name(function_name) {
        let error = AgentError::ToolNotFound(format!(
            "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
            function_name
        ));
        return MessageContent::tool_request(id, Err(error));
    }

    match arguments() {
        Ok(params) => MessageContent::tool_request(id, Ok(ToolCall::new(function_name, params))),
        Err(e) => {
            let error = AgentError::InvalidParameters(format!(
                "Could not interpret tool use parameters for id {}: {}",
                id, e
            ));
            MessageContent::tool_request(id, Err(error))
        }
    }
}

/// Classify a failed HTTP exchange with a language backend
pub fn classify_http_error(status: StatusCode, body: &str) -> ProviderError {
    let message = error_message(body);
    match status {
        StatusCode::PAYMENT_REQUIRED => ProviderError::QuotaExhausted(message),
        StatusCode::TOO_MANY_REQUESTS => {
            let lowered = body.to_lowercase();
            if lowered.contains("billing") || lowered.contains("insufficient_quota") {
                ProviderError::QuotaExhausted(message)
            } else {
                ProviderError::RateLimited(message)
            }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Authentication(message),
        status if status.is_server_error() => ProviderError::ServerError {
            status: status.as_u16(),
            message,
        },
        status => {
            if let Ok(value) = serde_json::from_str::<Value>(body) {
                if let Some(err) = value
                    .get("error")
                    .and_then(check_openai_context_length_error)
                {
                    return err;
                }
            }
            ProviderError::RequestFailed(format!("{}: {}", status, message))
        }
    }
}

/// Pull the human readable message out of an error body, falling back to the raw text
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str().map(String::from))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

pub fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

pub fn is_valid_function_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

pub fn check_openai_context_length_error(error: &Value) -> Option<ProviderError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ProviderError::ContextLengthExceeded(message))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const OPENAI_TOOL_USE_RESPONSE: &str = r#"{
        "choices": [{
            "role": "assistant",
            "message": {
                "tool_calls": [{
                    "id": "1",
                    "function": {
                        "name": "query_products",
                        "arguments": "{\"limit\": 3}"
                    }
                }]
            }
        }],
        "usage": {
            "input_tokens": 10,
            "output_tokens": 25,
            "total_tokens": 35
        }
    }"#;

    #[test]
    fn test_messages_to_openai_spec() {
        let message = Message::user().with_text("Hello");
        let spec = messages_to_openai_spec(&[message]);

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["role"], "user");
        assert_eq!(spec[0]["content"], "Hello");
    }

    #[test]
    fn test_messages_to_openai_spec_image() {
        let message = Message::user()
            .with_text("What pest is this?")
            .with_image("aGVsbG8=", "image/jpeg");
        let spec = messages_to_openai_spec(&[message]);

        assert_eq!(spec[0]["content"][0]["text"], "What pest is this?");
        assert_eq!(
            spec[0]["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,aGVsbG8="
        );
    }

    #[test]
    fn test_messages_to_openai_spec_tool_exchange() {
        let messages = vec![
            Message::user().with_text("How many orders are there?"),
            Message::assistant()
                .with_tool_request(
                    "call_1",
                    Ok(ToolCall::new("count_records", json!({"table": "orders"}))),
                )
                .with_tool_request("call_2", Err(AgentError::ToolNotFound("bad name".into()))),
            Message::tool()
                .with_tool_response("call_1", Ok(json!({"table": "orders", "count": 42})))
                .with_tool_response("call_2", Err(AgentError::ToolNotFound("bad name".into()))),
        ];

        let spec = messages_to_openai_spec(&messages);

        assert_eq!(spec.len(), 4);
        assert_eq!(spec[1]["role"], "assistant");
        assert_eq!(spec[1]["tool_calls"][0]["function"]["name"], "count_records");
        assert_eq!(spec[1]["tool_calls"][1]["function"]["name"], INVALID_TOOL_NAME);
        assert_eq!(spec[2]["role"], "tool");
        assert_eq!(spec[2]["tool_call_id"], "call_1");
        assert_eq!(spec[2]["content"], json!({"table": "orders", "count": 42}).to_string());
        assert_eq!(spec[3]["tool_call_id"], "call_2");
        assert!(spec[3]["content"].as_str().unwrap().contains("Tool not found"));
    }

    #[test]
    fn test_tools_to_openai_spec() -> Result<(), ProviderError> {
        let tool = Tool::new(
            "get_weather",
            "Current weather for a location",
            json!({
                "type": "object",
                "properties": {"location": {"type": "string"}},
                "required": ["location"]
            }),
        );

        let spec = tools_to_openai_spec(&[tool.clone()])?;
        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["type"], "function");
        assert_eq!(spec[0]["function"]["name"], "get_weather");

        let result = tools_to_openai_spec(&[tool.clone(), tool]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Duplicate tool name"));
        Ok(())
    }

    #[test]
    fn test_sanitize_function_name() {
        assert_eq!(sanitize_function_name("hello-world"), "hello-world");
        assert_eq!(sanitize_function_name("hello world"), "hello_world");
        assert_eq!(sanitize_function_name("hello@world"), "hello_world");
    }

    #[test]
    fn test_is_valid_function_name() {
        assert!(is_valid_function_name("hello-world"));
        assert!(is_valid_function_name("hello_world"));
        assert!(!is_valid_function_name("hello world"));
        assert!(!is_valid_function_name(""));
    }

    #[test]
    fn test_openai_response_to_message_text() -> Result<(), ProviderError> {
        let response = json!({
            "choices": [{
                "message": {"role": "assistant", "content": "Tomatoes are ₹40/kg today."}
            }]
        });

        let message = openai_response_to_message(response)?;
        assert_eq!(message.content.len(), 1);
        assert_eq!(message.text().as_deref(), Some("Tomatoes are ₹40/kg today."));
        assert_eq!(message.role, Role::Assistant);
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_valid_toolrequest() -> Result<(), ProviderError> {
        let response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE).unwrap();
        let message = openai_response_to_message(response)?;

        assert_eq!(message.content.len(), 1);
        let request = message.tool_requests()[0];
        let tool_call = request.tool_call.as_ref().unwrap();
        assert_eq!(tool_call.name, "query_products");
        assert_eq!(tool_call.arguments, json!({"limit": 3}));
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_invalid_func_name() -> Result<(), ProviderError> {
        let mut response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE).unwrap();
        response["choices"][0]["message"]["tool_calls"][0]["function"]["name"] =
            json!("invalid fn");

        let message = openai_response_to_message(response)?;
        match &message.tool_requests()[0].tool_call {
            Err(AgentError::ToolNotFound(msg)) => {
                assert!(msg.starts_with("The provided function name"));
            }
            _ => panic!("Expected ToolNotFound error"),
        }
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_json_decode_error() -> Result<(), ProviderError> {
        let mut response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE).unwrap();
        response["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"] =
            json!("invalid json {");

        let message = openai_response_to_message(response)?;
        match &message.tool_requests()[0].tool_call {
            Err(AgentError::InvalidParameters(msg)) => {
                assert!(msg.starts_with("Could not interpret tool use parameters"));
            }
            _ => panic!("Expected InvalidParameters error"),
        }
        Ok(())
    }

    #[test]
    fn test_openai_tool_calls_without_ids_get_distinct_ids() -> Result<(), ProviderError> {
        let response = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "tool_calls": [
                        {"type": "function", "function": {"name": "get_weather", "arguments": "{\"location\": \"Nakuru\"}"}},
                        {"id": "", "type": "function", "function": {"name": "search_market", "arguments": "{\"query\": \"maize\"}"}}
                    ]
                }
            }]
        });

        let message = openai_response_to_message(response)?;
        let requests = message.tool_requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.id.starts_with("call_")));
        assert_ne!(requests[0].id, requests[1].id);
        Ok(())
    }

    #[test]
    fn test_openai_response_without_choices() {
        let result = openai_response_to_message(json!({"choices": []}));
        assert!(matches!(result, Err(ProviderError::InvalidResponse(_))));
    }

    #[test]
    fn test_classify_http_error() {
        let rate = classify_http_error(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED"}}"#,
        );
        assert!(matches!(rate, ProviderError::RateLimited(ref m) if m == "Resource has been exhausted"));

        let quota = classify_http_error(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"message": "You exceeded your current quota, please check your plan and billing details.", "code": "insufficient_quota"}}"#,
        );
        assert!(matches!(quota, ProviderError::QuotaExhausted(_)));

        let credits = classify_http_error(StatusCode::PAYMENT_REQUIRED, "Payment required");
        assert!(matches!(credits, ProviderError::QuotaExhausted(ref m) if m == "Payment required"));

        let auth = classify_http_error(StatusCode::FORBIDDEN, r#"{"error": {"message": "API key not valid"}}"#);
        assert!(matches!(auth, ProviderError::Authentication(_)));

        let server = classify_http_error(StatusCode::SERVICE_UNAVAILABLE, "overloaded");
        assert!(matches!(server, ProviderError::ServerError { status: 503, .. }));

        let context = classify_http_error(
            StatusCode::BAD_REQUEST,
            r#"{"error": {"code": "context_length_exceeded", "message": "This message is too long"}}"#,
        );
        assert!(matches!(context, ProviderError::ContextLengthExceeded(ref m) if m == "This message is too long"));

        let other = classify_http_error(StatusCode::BAD_REQUEST, "bad");
        assert!(matches!(other, ProviderError::RequestFailed(_)));
    }
}
