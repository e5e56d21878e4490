use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::store::{MarketplaceStore, RecordQuery, StoreError, Table};
use super::{System, ToolOutput};
use crate::errors::{AgentError, AgentResult};
use crate::models::caller::CallerContext;
use crate::models::tool::{Tool, ToolCall};

pub const DEFAULT_PRODUCT_LIMIT: usize = 10;
pub const MAX_PRODUCT_LIMIT: usize = 25;
pub const ORDER_LIMIT: usize = 10;

/// Read-only access to the marketplace catalogue and the caller's orders
pub struct MarketplaceSystem {
    tools: Vec<Tool>,
    store: Arc<dyn MarketplaceStore>,
}

impl MarketplaceSystem {
    pub fn new(store: Arc<dyn MarketplaceStore>) -> Self {
        let query_products = Tool::new(
            "query_products",
            "Search the marketplace for products listed by farmers and vendors. \
            Filters are case-insensitive substring matches.",
            json!({
                "type": "object",
                "properties": {
                    "filters": {
                        "type": "object",
                        "properties": {
                            "category": {
                                "type": "string",
                                "description": "Product category, e.g. vegetables, grains, fertilizer."
                            },
                            "name": {
                                "type": "string",
                                "description": "Part of the product name."
                            }
                        },
                        "additionalProperties": false
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of products to return (1-25, default 10)."
                    }
                }
            }),
        );

        let query_orders = Tool::new(
            "query_orders",
            "List the signed-in user's own orders, most useful for order status questions. \
            Only works when the user is signed in.",
            json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "description": "Only return orders with this status, e.g. pending, shipped, delivered."
                    }
                }
            }),
        );

        let tables: Vec<&str> = Table::ALL.iter().map(Table::as_str).collect();
        let count_records = Tool::new(
            "count_records",
            "Count the rows of a marketplace table.",
            json!({
                "type": "object",
                "required": ["table"],
                "properties": {
                    "table": {
                        "type": "string",
                        "enum": tables,
                        "description": "The table to count."
                    }
                }
            }),
        );

        Self {
            tools: vec![query_products, query_orders, count_records],
            store,
        }
    }

    async fn query_products(&self, arguments: &Value) -> AgentResult<Value> {
        let limit = arguments
            .get("limit")
            .and_then(Value::as_f64)
            .map(|limit| (limit as i64).clamp(1, MAX_PRODUCT_LIMIT as i64) as usize)
            .unwrap_or(DEFAULT_PRODUCT_LIMIT);

        let mut query = RecordQuery::new(Table::Products, limit);
        if let Some(filters) = arguments.get("filters") {
            for column in ["category", "name"] {
                if let Some(value) = filters
                    .get(column)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                {
                    query = query.contains(column, value);
                }
            }
        }

        let products = self.store.select(&query).await.map_err(store_error)?;
        Ok(json!({
            "count": products.len(),
            "products": products,
        }))
    }

    async fn query_orders(&self, arguments: &Value, caller: &CallerContext) -> AgentResult<Value> {
        let Some(user_id) = caller.verified_user_id() else {
            return Ok(json!({ "error": "authentication required" }));
        };

        let mut query = RecordQuery::new(Table::Orders, ORDER_LIMIT).equals("customer_id", user_id);
        if let Some(status) = arguments
            .get("status")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|status| !status.is_empty())
        {
            query = query.equals("status", status);
        }

        let orders = self.store.select(&query).await.map_err(store_error)?;
        Ok(json!({
            "count": orders.len(),
            "orders": orders,
        }))
    }

    async fn count_records(&self, tool_call: &ToolCall) -> AgentResult<Value> {
        let table: Table = tool_call
            .str_arg("table")
            .ok_or_else(|| AgentError::InvalidParameters("Missing 'table' parameter".into()))?
            .parse()
            .map_err(AgentError::InvalidParameters)?;

        let count = self.store.count(table).await.map_err(store_error)?;
        Ok(json!({
            "table": table,
            "count": count,
        }))
    }
}

fn store_error(error: StoreError) -> AgentError {
    AgentError::ExecutionError(error.to_string())
}

#[async_trait]
impl System for MarketplaceSystem {
    fn name(&self) -> &str {
        "MarketplaceSystem"
    }

    fn description(&self) -> &str {
        "Looks up products, orders and record counts in the AgriConnect marketplace"
    }

    fn instructions(&self) -> &str {
        "Use query_products for anything about what is for sale, prices or availability. \
        Use query_orders only for the signed-in user's own orders. Never invent products \
        or prices that the tools did not return."
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall, caller: &CallerContext) -> AgentResult<ToolOutput> {
        let value = match tool_call.name.as_str() {
            "query_products" => self.query_products(&tool_call.arguments).await?,
            "query_orders" => self.query_orders(&tool_call.arguments, caller).await?,
            "count_records" => self.count_records(&tool_call).await?,
            _ => return Err(AgentError::ToolNotFound(tool_call.name)),
        };
        Ok(ToolOutput::value(value))
    }
}
