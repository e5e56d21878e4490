use crate::state::AppState;
use agriconnect::{
    conversation::parse_data_url,
    errors::ChatError,
    models::{caller::CallerContext, message::Message, navigation::NavigationIntent},
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const USER_ID_HEADER: &str = "x-user-id";

// Types matching the incoming JSON structure
#[derive(Debug, Deserialize)]
struct ChatRequest {
    messages: Vec<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    role: String,
    #[serde(default)]
    content: IncomingContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IncomingContent {
    Text(String),
    Parts(Vec<IncomingPart>),
}

impl Default for IncomingContent {
    fn default() -> Self {
        IncomingContent::Text(String::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IncomingPart {
    Text {
        text: String,
    },
    ImageUrl {
        image_url: ImageUrl,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType", alias = "mime_type")]
        mime_type: String,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    navigation: Option<NavigationIntent>,
    degraded: bool,
}

/// Failure of a chat request, rendered as `{ "error": ... }`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Chat(ChatError),
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        ApiError::Chat(err)
    }
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String) {
        let err = match self {
            ApiError::BadRequest(message) => return (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::Chat(err) => err,
        };
        let (status, message) = match err {
            ChatError::Configuration(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "AI service is not configured. Please contact support.",
            ),
            ChatError::RateLimited(_) => (
                StatusCode::TOO_MANY_REQUESTS,
                "AI service is currently busy. Please try again in a moment.",
            ),
            ChatError::QuotaExhausted(_) => (
                StatusCode::PAYMENT_REQUIRED,
                "AI service quota has been exhausted. Please try again later.",
            ),
            ChatError::Backend(_) | ChatError::EmptyResponse => (
                StatusCode::BAD_GATEWAY,
                "Failed to get response from AI service.",
            ),
            ChatError::DeadlineExceeded => (
                StatusCode::GATEWAY_TIMEOUT,
                "The AI service took too long to respond. Please try again.",
            ),
            // Nobody is listening any more; the status only shows up in logs
            ChatError::Cancelled => (
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
                "Request was cancelled.",
            ),
            ChatError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An unexpected error occurred. Please try again.",
            ),
        };
        (status, message.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        match &self {
            ApiError::Chat(ChatError::Cancelled) => {
                tracing::info!("chat request cancelled by client")
            }
            ApiError::Chat(err) => {
                tracing::error!(status = status.as_u16(), error = %err, "chat request failed")
            }
            ApiError::BadRequest(reason) => tracing::warn!(%reason, "rejected chat request"),
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// Convert incoming messages to our internal Message type
fn convert_messages(incoming: Vec<IncomingMessage>) -> Vec<Message> {
    let mut messages = Vec::new();
    for msg in incoming {
        let mut message = match msg.role.as_str() {
            "user" => Message::user(),
            "assistant" => Message::assistant(),
            _ => {
                tracing::warn!("Unknown role: {}", msg.role);
                continue;
            }
        };

        match msg.content {
            IncomingContent::Text(text) => message = message.with_text(text),
            IncomingContent::Parts(parts) => {
                for part in parts {
                    match part {
                        IncomingPart::Text { text } => message = message.with_text(text),
                        IncomingPart::ImageUrl { image_url } => match parse_data_url(&image_url.url) {
                            Some(image) => message = message.with_content(image),
                            None => tracing::warn!("Dropping image that is not a base64 data url"),
                        },
                        IncomingPart::Image { data, mime_type } => {
                            message = message.with_image(data, mime_type)
                        }
                        IncomingPart::Unsupported => {
                            tracing::warn!("Dropping unsupported content part")
                        }
                    }
                }
            }
        }
        messages.push(message);
    }
    messages
}

/// A non-empty `x-user-id` header marks the caller as signed in.
///
/// The header is trusted as-is: the service must sit behind the gateway that
/// verifies the session and sets `x-user-id`, and strips it from client requests.
fn caller_from_headers(headers: &HeaderMap) -> CallerContext {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(CallerContext::authenticated)
        .unwrap_or_else(CallerContext::anonymous)
}

/// Malformed bodies get the same `{ "error" }` shape as every other failure
fn rejection_to_api_error(rejection: JsonRejection) -> ApiError {
    tracing::debug!(detail = %rejection.body_text(), "unreadable chat body");
    let reason = match rejection {
        JsonRejection::JsonDataError(_) => "messages must be an array of chat messages",
        JsonRejection::JsonSyntaxError(_) => "request body is not valid JSON",
        JsonRejection::MissingJsonContentType(_) => "expected an application/json body",
        _ => "request body could not be read",
    };
    ApiError::BadRequest(reason.to_string())
}

async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = body.map_err(rejection_to_api_error)?;
    if request.messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".to_string()));
    }

    let caller = caller_from_headers(&headers);
    let messages = convert_messages(request.messages);

    // If the client disconnects axum drops this future, and the guard cancels the run
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let reply = timeout(
        state.request_timeout,
        state.agent.reply(&messages, &caller, &cancel),
    )
    .await
    .map_err(|_| ChatError::DeadlineExceeded)??;

    Ok(Json(ChatResponse {
        message: reply.text,
        navigation: reply.navigation,
        degraded: reply.exhausted,
    }))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(handler))
        .with_state(state)
}
