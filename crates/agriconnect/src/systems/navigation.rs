use async_trait::async_trait;
use serde_json::{json, Value};

use super::{System, ToolOutput};
use crate::errors::{AgentError, AgentResult};
use crate::models::caller::CallerContext;
use crate::models::navigation::NavigationIntent;
use crate::models::tool::{Tool, ToolCall};

/// Pages of the web application
pub const ROUTES: &[&str] = &[
    "/",
    "/marketplace",
    "/orders",
    "/order-history",
    "/vendors",
    "/fertilizer",
    "/about",
    "/search",
    "/checkout",
    "/usertype",
    "/register",
    "/signin",
    "/forgot-password",
    "/profile-completion",
    "/dashboard",
];

/// Section anchors on the landing page
pub const SECTIONS: &[&str] = &[
    "home",
    "hero",
    "problem",
    "solution",
    "features",
    "marketplace",
    "fertilizer",
    "pricing",
    "footer",
    "contact",
];

/// Records where the web client should take the user.
///
/// Recording always succeeds. The client is the one that actually navigates,
/// so an unrecognized target is passed along with a hint for the model.
pub struct NavigationSystem {
    tools: Vec<Tool>,
}

impl Default for NavigationSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationSystem {
    pub fn new() -> Self {
        let navigate_to = Tool::new(
            "navigate_to",
            "Take the user to a page of the AgriConnect website.",
            json!({
                "type": "object",
                "required": ["route"],
                "properties": {
                    "route": {
                        "type": "string",
                        "description": format!("The page path, one of: {}", ROUTES.join(", "))
                    }
                }
            }),
        );

        let scroll_to_section = Tool::new(
            "scroll_to_section",
            "Scroll the landing page to one of its sections.",
            json!({
                "type": "object",
                "required": ["section"],
                "properties": {
                    "section": {
                        "type": "string",
                        "description": format!("The section id, one of: {}", SECTIONS.join(", "))
                    }
                }
            }),
        );

        Self {
            tools: vec![navigate_to, scroll_to_section],
        }
    }

    fn navigate_to(&self, tool_call: &ToolCall) -> AgentResult<ToolOutput> {
        let route = tool_call
            .str_arg("route")
            .map(normalize_route)
            .ok_or_else(|| AgentError::InvalidParameters("Missing 'route' parameter".into()))?;

        let known = ROUTES.contains(&route.as_str());
        let mut value = json!({
            "navigated": true,
            "route": route,
            "known": known,
        });
        if !known {
            value["valid_routes"] = json!(ROUTES);
        }
        Ok(ToolOutput::value(value).with_navigation(NavigationIntent::route(route)))
    }

    fn scroll_to_section(&self, tool_call: &ToolCall) -> AgentResult<ToolOutput> {
        let section = tool_call
            .str_arg("section")
            .map(|s| s.trim_start_matches('#').to_lowercase())
            .ok_or_else(|| AgentError::InvalidParameters("Missing 'section' parameter".into()))?;

        let known = SECTIONS.contains(&section.as_str());
        let mut value: Value = json!({
            "scrolled": true,
            "section": section,
            "known": known,
        });
        if !known {
            value["valid_sections"] = json!(SECTIONS);
        }
        Ok(ToolOutput::value(value).with_navigation(NavigationIntent::section(section)))
    }
}

/// Lowercase, one leading slash, no trailing slash except for the root
fn normalize_route(route: &str) -> String {
    let trimmed = route.trim().trim_matches('/').to_lowercase();
    format!("/{}", trimmed)
}

#[async_trait]
impl System for NavigationSystem {
    fn name(&self) -> &str {
        "NavigationSystem"
    }

    fn description(&self) -> &str {
        "Moves the user around the AgriConnect website"
    }

    fn instructions(&self) -> &str {
        "When the user wants to go somewhere on the site, call navigate_to or \
        scroll_to_section and tell them where you took them."
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall, _caller: &CallerContext) -> AgentResult<ToolOutput> {
        match tool_call.name.as_str() {
            "navigate_to" => self.navigate_to(&tool_call),
            "scroll_to_section" => self.scroll_to_section(&tool_call),
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}
