use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AgentResult;
use crate::models::caller::CallerContext;
use crate::models::navigation::NavigationIntent;
use crate::models::tool::{Tool, ToolCall};

pub mod marketplace;
pub mod navigation;
pub mod registry;
pub mod schema;
pub mod search;
pub mod store;
pub mod weather;

pub use registry::ToolRegistry;

/// What a tool hands back to the agent
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Structured result shown to the model
    pub value: Value,
    /// Navigation the web client should perform, if the tool requested one
    pub navigation: Option<NavigationIntent>,
}

impl ToolOutput {
    pub fn value(value: Value) -> Self {
        Self {
            value,
            navigation: None,
        }
    }

    pub fn with_navigation(mut self, navigation: NavigationIntent) -> Self {
        self.navigation = Some(navigation);
        self
    }
}

/// Core trait that defines a system of tools the assistant can call
///
/// Implementations must not panic on bad input or flaky dependencies: every
/// failure is returned so the model can react to it.
#[async_trait]
pub trait System: Send + Sync {
    /// Get the name of the system
    fn name(&self) -> &str;

    /// Get the system description
    fn description(&self) -> &str;

    /// Get system instructions
    fn instructions(&self) -> &str;

    /// Get available tools
    fn tools(&self) -> &[Tool];

    /// Call a tool with arguments already validated against its schema
    async fn call(&self, tool_call: ToolCall, caller: &CallerContext) -> AgentResult<ToolOutput>;
}
