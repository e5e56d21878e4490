use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::schema;
use super::{System, ToolOutput};
use crate::errors::{AgentError, AgentResult};
use crate::models::caller::CallerContext;
use crate::models::tool::{Tool, ToolCall};

/// Read-only index from tool name to the system that executes it.
///
/// Built once at startup and shared by every conversation.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    systems: Vec<Arc<dyn System>>,
    tools: Vec<Tool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a system, rejecting tool names that are already taken
    pub fn with_system(mut self, system: Arc<dyn System>) -> AgentResult<Self> {
        for tool in system.tools() {
            if self.index.contains_key(&tool.name) {
                return Err(AgentError::Internal(format!(
                    "Duplicate tool name: {}",
                    tool.name
                )));
            }
            if tool.parameters.get("type").and_then(Value::as_str) != Some("object") {
                return Err(AgentError::Internal(format!(
                    "Tool {} must declare an object parameter schema",
                    tool.name
                )));
            }
        }

        let position = self.systems.len();
        for tool in system.tools() {
            self.index.insert(tool.name.clone(), position);
            self.tools.push(tool.clone());
        }
        self.systems.push(system);
        Ok(self)
    }

    /// All declared tools, in registration order
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn systems(&self) -> impl Iterator<Item = &dyn System> {
        self.systems.iter().map(|system| system.as_ref())
    }

    pub fn get_tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    /// Resolve, validate and execute a single tool call
    pub async fn dispatch(
        &self,
        tool_call: AgentResult<ToolCall>,
        caller: &CallerContext,
    ) -> AgentResult<ToolOutput> {
        let mut call = tool_call?;
        let system = self
            .index
            .get(&call.name)
            .and_then(|position| self.systems.get(*position))
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;
        let tool = self
            .get_tool(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;

        if call.arguments.is_null() {
            call.arguments = json!({});
        }
        schema::validate(&tool.parameters, &call.arguments)?;

        let started = Instant::now();
        let name = call.name.clone();
        let result = system.call(call, caller).await;
        match &result {
            Ok(_) => tracing::info!(
                tool = %name,
                system = system.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "tool call succeeded"
            ),
            Err(e) => tracing::warn!(
                tool = %name,
                system = system.name(),
                error = %e,
                "tool call failed"
            ),
        }
        result
    }
}
