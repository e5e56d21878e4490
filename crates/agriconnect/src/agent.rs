use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::conversation::Conversation;
use crate::errors::ChatError;
use crate::models::caller::CallerContext;
use crate::models::message::Message;
use crate::models::navigation::NavigationIntent;
use crate::models::tool::Tool;
use crate::prompt_template::load_prompt_file;
use crate::providers::base::Provider;
use crate::systems::ToolRegistry;

pub const DEFAULT_MAX_ITERATIONS: usize = 5;

/// Returned when the iteration budget runs out before the model settles on an answer
pub const APOLOGY_MESSAGE: &str = "I'm sorry, I wasn't able to finish working on your request. \
    Please try again, or rephrase your question.";

#[derive(Clone, Debug, Serialize)]
struct SystemInfo {
    name: String,
    description: String,
    instructions: String,
}

impl SystemInfo {
    fn new(name: &str, description: &str, instructions: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            instructions: instructions.to_string(),
        }
    }
}

#[derive(Serialize)]
struct PromptContext<'a> {
    systems: Vec<SystemInfo>,
    tools: &'a [Tool],
    caller: &'a CallerContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Upper bound on backend calls per run
    pub max_iterations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl AgentConfig {
    pub fn new(max_iterations: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(max_iterations >= 1, "max_iterations must be at least 1");
        Ok(Self { max_iterations })
    }
}

/// Outcome of a run that ended with something to show the user
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    /// The last navigation requested during the run
    pub navigation: Option<NavigationIntent>,
    /// Number of backend calls made
    pub iterations: usize,
    /// Set when `text` is the apology rather than a model answer
    pub exhausted: bool,
    pub transcript: Vec<Message>,
}

/// Agent integrates a language backend with the systems it can call
pub struct Agent {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    config: AgentConfig,
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            registry,
            config: AgentConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn get_system_prompt(&self, caller: &CallerContext) -> Result<String, ChatError> {
        let systems = self
            .registry
            .systems()
            .map(|system| SystemInfo::new(system.name(), system.description(), system.instructions()))
            .collect();
        let context = PromptContext {
            systems,
            tools: self.registry.tools(),
            caller,
        };
        load_prompt_file("system.md", &context).map_err(|e| ChatError::Internal(e.to_string()))
    }

    /// Run every tool request of one assistant turn concurrently.
    ///
    /// Returns the tool turn answering the requests in request order, plus the
    /// last navigation any of them asked for.
    async fn dispatch_tool_calls(
        &self,
        request: &Message,
        caller: &CallerContext,
    ) -> (Message, Option<NavigationIntent>) {
        let requests = request.tool_requests();
        let outputs = join_all(
            requests
                .iter()
                .map(|r| self.registry.dispatch(r.tool_call.clone(), caller)),
        )
        .await;

        let mut response = Message::tool();
        let mut navigation = None;
        for (request, output) in requests.iter().zip(outputs) {
            let result = match output {
                Ok(output) => {
                    if output.navigation.is_some() {
                        navigation = output.navigation;
                    }
                    Ok(output.value)
                }
                Err(e) => Err(e),
            };
            response = response.with_tool_response(request.id.clone(), result);
        }
        (response, navigation)
    }

    /// Answer the latest user turn, calling tools as the model requests them.
    ///
    /// Tool failures and an exhausted iteration budget are not errors: the
    /// former are shown to the model, the latter ends in [`APOLOGY_MESSAGE`].
    pub async fn reply(
        &self,
        history: &[Message],
        caller: &CallerContext,
        cancel: &CancellationToken,
    ) -> Result<Reply, ChatError> {
        self.provider.check_configured()?;

        let mut conversation = Conversation::from_history(history);
        let system_prompt = self.get_system_prompt(caller)?;
        let tools = self.registry.tools();
        let mut navigation = None;
        let mut iterations = 0;

        tracing::info!(
            provider = self.provider.name(),
            messages = conversation.len(),
            authenticated = caller.authenticated,
            "starting conversation run"
        );

        while iterations < self.config.max_iterations {
            if cancel.is_cancelled() {
                return Err(ChatError::Cancelled);
            }
            iterations += 1;

            let started = Instant::now();
            let (response, usage) = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChatError::Cancelled),
                result = self.provider.complete(&system_prompt, conversation.messages(), tools) => {
                    result.map_err(|e| {
                        tracing::error!(iteration = iterations, error = %e, "backend call failed");
                        ChatError::from(e)
                    })?
                }
            };
            tracing::debug!(
                iteration = iterations,
                elapsed_ms = started.elapsed().as_millis() as u64,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "backend responded"
            );

            if response.has_tool_requests() {
                tracing::info!(
                    iteration = iterations,
                    tool_calls = response.tool_requests().len(),
                    "dispatching tool calls"
                );
                // Results that land after cancellation are dropped with the future
                let (tool_response, requested_navigation) = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ChatError::Cancelled),
                    outcome = self.dispatch_tool_calls(&response, caller) => outcome,
                };
                if requested_navigation.is_some() {
                    navigation = requested_navigation;
                }
                conversation
                    .push_exchange(response, tool_response)
                    .map_err(|e| ChatError::Internal(e.to_string()))?;
                continue;
            }

            match response.text() {
                Some(text) => {
                    conversation
                        .push_reply(response)
                        .map_err(|e| ChatError::Internal(e.to_string()))?;
                    tracing::info!(iteration = iterations, "conversation run finished");
                    return Ok(Reply {
                        text,
                        navigation,
                        iterations,
                        exhausted: false,
                        transcript: conversation.into_messages(),
                    });
                }
                None if iterations == 1 => {
                    tracing::error!("backend returned neither text nor tool calls");
                    return Err(ChatError::EmptyResponse);
                }
                None => {
                    tracing::warn!(iteration = iterations, "backend returned an empty reply, giving up");
                    break;
                }
            }
        }

        tracing::warn!(iterations, "conversation run ended without an answer");
        Ok(Reply {
            text: APOLOGY_MESSAGE.to_string(),
            navigation,
            iterations,
            exhausted: true,
            transcript: conversation.into_messages(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::check_causal_order;
    use crate::errors::{AgentError, AgentResult};
    use crate::models::role::Role;
    use crate::models::tool::ToolCall;
    use crate::providers::errors::ProviderError;
    use crate::providers::mock::MockProvider;
    use crate::systems::marketplace::tests::FakeStore;
    use crate::systems::marketplace::MarketplaceSystem;
    use crate::systems::navigation::NavigationSystem;
    use crate::systems::{System, ToolOutput};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    /// Weather tool with canned readings; `delay_ms` slows a call down
    struct StubWeather {
        tools: Vec<Tool>,
    }

    impl StubWeather {
        fn new() -> Self {
            Self {
                tools: vec![Tool::new(
                    "get_weather",
                    "Current weather",
                    json!({
                        "type": "object",
                        "required": ["location"],
                        "properties": {
                            "location": {"type": "string"},
                            "delay_ms": {"type": "integer"}
                        }
                    }),
                )],
            }
        }
    }

    #[async_trait]
    impl System for StubWeather {
        fn name(&self) -> &str {
            "StubWeather"
        }

        fn description(&self) -> &str {
            "Canned weather"
        }

        fn instructions(&self) -> &str {
            "Use get_weather for weather questions."
        }

        fn tools(&self) -> &[Tool] {
            &self.tools
        }

        async fn call(&self, tool_call: ToolCall, _caller: &CallerContext) -> AgentResult<ToolOutput> {
            if let Some(delay) = tool_call.arguments.get("delay_ms").and_then(Value::as_u64) {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            let location = tool_call.str_arg("location").unwrap_or_default().to_string();
            Ok(ToolOutput::value(json!({"location": location, "temp_c": 28})))
        }
    }

    fn registry(store: Arc<FakeStore>) -> Arc<ToolRegistry> {
        let registry = ToolRegistry::new()
            .with_system(Arc::new(StubWeather::new()))
            .and_then(|r| r.with_system(Arc::new(MarketplaceSystem::new(store))))
            .and_then(|r| r.with_system(Arc::new(NavigationSystem::new())))
            .unwrap();
        Arc::new(registry)
    }

    fn agent(provider: Arc<MockProvider>) -> Agent {
        Agent::new(provider, registry(Arc::new(FakeStore::default())))
    }

    fn ask(text: &str) -> Vec<Message> {
        vec![Message::user().with_text(text)]
    }

    fn tool_request(id: &str, name: &str, arguments: Value) -> Message {
        Message::assistant().with_tool_request(id, Ok(ToolCall::new(name, arguments)))
    }

    fn payloads(message: &Message) -> Vec<Value> {
        message.tool_responses().iter().map(|r| r.payload()).collect()
    }

    #[tokio::test]
    async fn test_weather_answer() {
        let provider = Arc::new(MockProvider::new(vec![
            tool_request("call_1", "get_weather", json!({"location": "Delhi"})),
            Message::assistant().with_text("It is 28°C in Delhi."),
        ]));
        let agent = agent(provider.clone());

        let reply = agent
            .reply(&ask("Weather in Delhi?"), &CallerContext::anonymous(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.text, "It is 28°C in Delhi.");
        assert_eq!(reply.navigation, None);
        assert_eq!(reply.iterations, 2);
        assert!(!reply.exhausted);

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        let tool_turn = calls[1].last().unwrap();
        assert_eq!(tool_turn.role, Role::Tool);
        assert_eq!(payloads(tool_turn), vec![json!({"location": "Delhi", "temp_c": 28})]);
    }

    #[tokio::test]
    async fn test_navigation_is_returned() {
        let provider = Arc::new(MockProvider::new(vec![
            tool_request("call_1", "navigate_to", json!({"route": "/marketplace"})),
            Message::assistant().with_text("Taking you to the marketplace!"),
        ]));

        let reply = agent(provider)
            .reply(&ask("Show me the marketplace"), &CallerContext::anonymous(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.text, "Taking you to the marketplace!");
        assert_eq!(reply.navigation, Some(NavigationIntent::route("/marketplace")));
    }

    #[tokio::test]
    async fn test_last_navigation_wins() {
        let provider = Arc::new(MockProvider::new(vec![
            tool_request("call_1", "navigate_to", json!({"route": "/marketplace"})),
            tool_request("call_2", "scroll_to_section", json!({"section": "pricing"})),
            Message::assistant().with_text("Here are our prices."),
        ]));

        let reply = agent(provider)
            .reply(&ask("Prices?"), &CallerContext::anonymous(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply.navigation, Some(NavigationIntent::section("pricing")));
    }

    #[tokio::test]
    async fn test_orders_require_sign_in() {
        let store = Arc::new(FakeStore::with_rows(vec![json!({"id": 42, "status": "shipped"})]));
        let provider = Arc::new(MockProvider::new(vec![
            tool_request("call_1", "query_orders", json!({})),
            Message::assistant().with_text("Please sign in to see your orders."),
        ]));
        let agent = Agent::new(provider.clone(), registry(store.clone()));

        let reply = agent
            .reply(&ask("Where is my order?"), &CallerContext::anonymous(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.text, "Please sign in to see your orders.");
        assert_eq!(store.query_count(), 0);
        let calls = provider.calls.lock().unwrap();
        assert_eq!(
            payloads(calls[1].last().unwrap()),
            vec![json!({"error": "authentication required"})]
        );
    }

    #[tokio::test]
    async fn test_signed_in_orders_are_scoped() {
        let store = Arc::new(FakeStore::with_rows(vec![json!({"id": 42, "status": "shipped"})]));
        let provider = Arc::new(MockProvider::new(vec![
            tool_request("call_1", "query_orders", json!({})),
            Message::assistant().with_text("Order 42 has shipped."),
        ]));
        let agent = Agent::new(provider, registry(store.clone()));

        agent
            .reply(&ask("Where is my order?"), &CallerContext::authenticated("user-7"), &CancellationToken::new())
            .await
            .unwrap();

        let queries = store.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert!(queries[0]
            .filters
            .contains(&crate::systems::store::Filter::Equals {
                column: "customer_id".into(),
                value: "user-7".into()
            }));
    }

    #[tokio::test]
    async fn test_rate_limit_stops_immediately() {
        let provider = Arc::new(MockProvider::with_results(vec![
            Err(ProviderError::RateLimited("Resource has been exhausted".into())),
            Ok(Message::assistant().with_text("never sent")),
        ]));

        let result = agent(provider.clone())
            .reply(&ask("hello"), &CallerContext::anonymous(), &CancellationToken::new())
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, ChatError::RateLimited(_)));
        assert!(err.is_retryable());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_iteration_budget_ends_in_apology() {
        let provider = Arc::new(MockProvider::repeating(tool_request(
            "call_1",
            "get_weather",
            json!({"location": "Delhi"}),
        )));
        let agent = agent(provider.clone()).with_config(AgentConfig::new(3).unwrap());

        let reply = agent
            .reply(&ask("Weather?"), &CallerContext::anonymous(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.text, APOLOGY_MESSAGE);
        assert!(reply.exhausted);
        assert_eq!(reply.iterations, 3);
        assert_eq!(provider.call_count(), 3);
        assert!(check_causal_order(&reply.transcript).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_to_the_model() {
        let provider = Arc::new(MockProvider::new(vec![
            tool_request("call_1", "launch_rocket", json!({})),
            Message::assistant().with_text("I can't do that, but I can help with farming."),
        ]));

        let reply = agent(provider.clone())
            .reply(&ask("Launch a rocket"), &CallerContext::anonymous(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!reply.exhausted);
        let calls = provider.calls.lock().unwrap();
        assert_eq!(
            payloads(calls[1].last().unwrap()),
            vec![AgentError::ToolNotFound("launch_rocket".into()).to_payload()]
        );
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_reported_to_the_model() {
        let provider = Arc::new(MockProvider::new(vec![
            tool_request("call_1", "count_records", json!({"table": "secrets"})),
            Message::assistant().with_text("I can only count marketplace tables."),
        ]));

        agent(provider.clone())
            .reply(&ask("How many secrets?"), &CallerContext::anonymous(), &CancellationToken::new())
            .await
            .unwrap();

        let calls = provider.calls.lock().unwrap();
        let payload = &payloads(calls[1].last().unwrap())[0];
        assert!(payload["error"].as_str().unwrap().starts_with("Invalid parameters"));
    }

    #[tokio::test]
    async fn test_parallel_results_keep_request_order() {
        let request = Message::assistant()
            .with_tool_request(
                "slow",
                Ok(ToolCall::new("get_weather", json!({"location": "Nairobi", "delay_ms": 50}))),
            )
            .with_tool_request("missing", Ok(ToolCall::new("fly_drone", json!({}))))
            .with_tool_request("fast", Ok(ToolCall::new("get_weather", json!({"location": "Delhi"}))));
        let provider = Arc::new(MockProvider::new(vec![
            request,
            Message::assistant().with_text("Nairobi and Delhi are both 28°C."),
        ]));

        let reply = agent(provider.clone())
            .reply(&ask("Compare"), &CallerContext::anonymous(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(check_causal_order(&reply.transcript).is_ok());
        let tool_turn = &reply.transcript[2];
        let ids: Vec<&str> = tool_turn.tool_responses().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["slow", "missing", "fast"]);
        assert_eq!(payloads(tool_turn)[0]["location"], "Nairobi");
        assert!(payloads(tool_turn)[1]["error"].is_string());
    }

    #[tokio::test]
    async fn test_malformed_tool_request_still_answered() {
        let request = Message::assistant().with_tool_request(
            "call_1",
            Err(AgentError::InvalidParameters("arguments were not valid JSON".into())),
        );
        let provider = Arc::new(MockProvider::new(vec![
            request,
            Message::assistant().with_text("Sorry, let me try that again."),
        ]));

        let reply = agent(provider)
            .reply(&ask("Weather?"), &CallerContext::anonymous(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(check_causal_order(&reply.transcript).is_ok());
        assert_eq!(reply.transcript.len(), 4);
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_any_call() {
        let provider = Arc::new(MockProvider::unconfigured());

        let result = agent(provider.clone())
            .reply(&ask("hello"), &CallerContext::anonymous(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ChatError::Configuration(_))));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_first_reply_is_an_error() {
        let provider = Arc::new(MockProvider::new(vec![Message::assistant().with_text("  ")]));

        let result = agent(provider)
            .reply(&ask("hello"), &CallerContext::anonymous(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ChatError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_late_empty_reply_degrades() {
        let provider = Arc::new(MockProvider::new(vec![
            tool_request("call_1", "get_weather", json!({"location": "Delhi"})),
            Message::assistant(),
        ]));

        let reply = agent(provider)
            .reply(&ask("Weather?"), &CallerContext::anonymous(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply.text, APOLOGY_MESSAGE);
        assert!(reply.exhausted);
        assert_eq!(reply.iterations, 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let provider = Arc::new(MockProvider::new(vec![Message::assistant().with_text("hi")]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = agent(provider.clone())
            .reply(&ask("hello"), &CallerContext::anonymous(), &cancel)
            .await;
        assert!(matches!(result, Err(ChatError::Cancelled)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_during_tool_calls() {
        let provider = Arc::new(MockProvider::new(vec![
            tool_request("call_1", "get_weather", json!({"location": "Delhi", "delay_ms": 30_000})),
            Message::assistant().with_text("never reached"),
        ]));
        let agent = agent(provider.clone());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = agent.reply(&ask("Weather?"), &CallerContext::anonymous(), &cancel).await;
        assert!(matches!(result, Err(ChatError::Cancelled)));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_system_prompt_describes_tools_and_caller() {
        let provider = Arc::new(MockProvider::new(vec![Message::assistant().with_text("Hi!")]));
        let agent = agent(provider.clone());

        agent
            .reply(&ask("hello"), &CallerContext::anonymous(), &CancellationToken::new())
            .await
            .unwrap();
        let prompt = provider.last_system.lock().unwrap().clone();
        assert!(prompt.contains("navigate_to"));
        assert!(prompt.contains("query_products"));
        assert!(prompt.contains("## MarketplaceSystem"));
        assert!(prompt.contains("not signed in"));

        agent
            .reply(&ask("hello"), &CallerContext::authenticated("user-7"), &CancellationToken::new())
            .await
            .unwrap_err();
        let prompt = provider.last_system.lock().unwrap().clone();
        assert!(prompt.contains("The user is signed in"));
    }

    #[test]
    fn test_config_requires_an_iteration() {
        assert!(AgentConfig::new(0).is_err());
        assert_eq!(AgentConfig::default().max_iterations, DEFAULT_MAX_ITERATIONS);
    }
}
