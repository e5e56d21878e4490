//! Conversation assembly: normalizing caller supplied turns and keeping the
//! tool request/result pairing intact while a run appends to it.
use base64::Engine;
use lazy_static::lazy_static;
use regex::Regex;

use crate::errors::{AgentError, AgentResult};
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;

lazy_static! {
    static ref DATA_URL: Regex =
        Regex::new(r"^data:(image/[a-zA-Z0-9.+-]+);base64,([A-Za-z0-9+/=]+)$").unwrap();
}

/// The ordered messages of one orchestration run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Build a conversation from caller supplied history
    pub fn from_history(history: &[Message]) -> Self {
        Self {
            messages: normalize(history),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Append an assistant turn together with the results of every tool it requested.
    ///
    /// The results must answer the requests one to one and in the same order.
    pub fn push_exchange(&mut self, request: Message, response: Message) -> AgentResult<()> {
        let requested: Vec<&str> = request
            .tool_requests()
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        let answered: Vec<&str> = response
            .tool_responses()
            .iter()
            .map(|r| r.id.as_str())
            .collect();

        if requested.is_empty() || requested != answered {
            return Err(AgentError::Internal(format!(
                "tool results {:?} do not answer requests {:?}",
                answered, requested
            )));
        }

        self.messages.push(request);
        self.messages.push(response);
        Ok(())
    }

    /// Append a final assistant answer. Tool traffic must go through `push_exchange`.
    pub fn push_reply(&mut self, reply: Message) -> AgentResult<()> {
        if reply.role != Role::Assistant || reply.has_tool_content() {
            return Err(AgentError::Internal(
                "only plain assistant answers can close a conversation".to_string(),
            ));
        }
        self.messages.push(reply);
        Ok(())
    }
}

/// Normalize caller supplied messages into the form sent to the backend.
///
/// - whitespace-only text is dropped, as are messages left without content
/// - text holding an image data url becomes image content
/// - consecutive plain messages from the same author are merged
/// - leading assistant turns are dropped so the conversation opens with the user
///
/// Applying it to its own output changes nothing.
pub fn normalize(messages: &[Message]) -> Vec<Message> {
    let mut normalized: Vec<Message> = Vec::with_capacity(messages.len());

    for message in messages {
        let content: Vec<MessageContent> = message
            .content
            .iter()
            .filter_map(normalize_content)
            .collect();
        if content.is_empty() {
            continue;
        }

        if normalized.is_empty() && message.role != Role::User {
            continue;
        }

        let mergeable = |prev: &Message| {
            prev.role == message.role
                && !prev.has_tool_content()
                && !content.iter().any(MessageContent::is_tool_content)
        };
        match normalized.last_mut() {
            Some(prev) if mergeable(prev) => prev.content.extend(content),
            _ => normalized.push(Message {
                role: message.role,
                created: message.created,
                content,
            }),
        }
    }

    normalized
}

fn normalize_content(content: &MessageContent) -> Option<MessageContent> {
    match content {
        MessageContent::Text(text) => {
            let trimmed = text.text.trim();
            if trimmed.is_empty() {
                return None;
            }
            match parse_data_url(trimmed) {
                Some(image) => Some(image),
                None => Some(content.clone()),
            }
        }
        other => Some(other.clone()),
    }
}

/// Parse `data:image/<type>;base64,<payload>` into image content when the payload decodes
pub fn parse_data_url(text: &str) -> Option<MessageContent> {
    let captures = DATA_URL.captures(text)?;
    let mime_type = captures.get(1)?.as_str();
    let data = captures.get(2)?.as_str();
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .ok()
        .map(|_| MessageContent::image(data, mime_type))
}

/// Check that every assistant turn requesting tools is immediately followed by
/// a tool turn answering exactly those requests, in order.
pub fn check_causal_order(messages: &[Message]) -> Result<(), String> {
    for (index, message) in messages.iter().enumerate() {
        let requests = message.tool_requests();
        if requests.is_empty() {
            if message.role == Role::Tool {
                let follows_request = index
                    .checked_sub(1)
                    .and_then(|prev| messages.get(prev))
                    .is_some_and(Message::has_tool_requests);
                if !follows_request {
                    return Err(format!("tool results at {} answer no request", index));
                }
            }
            continue;
        }

        let next = messages
            .get(index + 1)
            .ok_or_else(|| format!("tool requests at {} were never answered", index))?;
        if next.role != Role::Tool {
            return Err(format!("message after tool requests at {} is not a tool turn", index));
        }
        let requested: Vec<&str> = requests.iter().map(|r| r.id.as_str()).collect();
        let answered: Vec<&str> = next.tool_responses().iter().map(|r| r.id.as_str()).collect();
        if requested != answered {
            return Err(format!(
                "tool results {:?} at {} do not match requests {:?}",
                answered,
                index + 1,
                requested
            ));
        }
    }
    Ok(())
}
