use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;

use super::errors::ProviderError;
use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{Provider, Usage};

enum Script {
    Sequence(Vec<Result<Message, ProviderError>>),
    Repeat(Message),
}

/// A mock provider that returns pre-configured responses for testing
pub struct MockProvider {
    script: Mutex<Script>,
    configured: bool,
    /// The conversation seen by each call, in call order
    pub calls: Arc<Mutex<Vec<Vec<Message>>>>,
    /// The system prompt of the most recent call
    pub last_system: Arc<Mutex<String>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    /// Create a mock provider whose calls may also fail
    pub fn with_results(results: Vec<Result<Message, ProviderError>>) -> Self {
        Self::from_script(Script::Sequence(results))
    }

    /// Create a mock provider that answers every call with the same message
    pub fn repeating(response: Message) -> Self {
        Self::from_script(Script::Repeat(response))
    }

    /// Create a mock provider that reports a missing credential
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new(vec![])
        }
    }

    fn from_script(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            configured: true,
            calls: Arc::new(Mutex::new(Vec::new())),
            last_system: Arc::new(Mutex::new(String::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn check_configured(&self) -> Result<(), ProviderError> {
        if self.configured {
            Ok(())
        } else {
            Err(ProviderError::NotConfigured("mock key missing".to_string()))
        }
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        _tools: &[Tool],
    ) -> Result<(Message, Usage), ProviderError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        *self.last_system.lock().unwrap() = system.to_string();

        let mut script = self.script.lock().unwrap();
        let next = match &mut *script {
            Script::Repeat(message) => Ok(message.clone()),
            // Return empty response if no more pre-configured responses
            Script::Sequence(responses) if responses.is_empty() => Ok(Message::assistant()),
            Script::Sequence(responses) => responses.remove(0),
        };
        next.map(|message| (message, Usage::default()))
    }
}
