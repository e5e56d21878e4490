use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{System, ToolOutput};
use crate::errors::{AgentError, AgentResult};
use crate::models::caller::CallerContext;
use crate::models::tool::{Tool, ToolCall};

pub const WEATHER_HOST: &str = "https://wttr.in";
pub const MAX_FORECAST_DAYS: u64 = 3;

/// Current conditions and short forecasts, for planting and harvest questions
pub struct WeatherSystem {
    tools: Vec<Tool>,
    client: Client,
    base_url: String,
}

impl WeatherSystem {
    pub fn new(base_url: Option<String>) -> anyhow::Result<Self> {
        let get_weather = Tool::new(
            "get_weather",
            "Get the current weather and a short forecast for a town, district or region.",
            json!({
                "type": "object",
                "required": ["location"],
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "Place name, e.g. 'Nakuru' or 'Punjab, India'."
                    },
                    "days": {
                        "type": "integer",
                        "description": "Number of forecast days to include (1-3, default 1)."
                    }
                }
            }),
        );

        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        let base_url = base_url.unwrap_or_else(|| WEATHER_HOST.to_string());

        Ok(Self {
            tools: vec![get_weather],
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_weather(&self, tool_call: &ToolCall) -> AgentResult<Value> {
        let location = tool_call
            .str_arg("location")
            .ok_or_else(|| AgentError::InvalidParameters("Missing 'location' parameter".into()))?;
        let days = tool_call
            .arguments
            .get("days")
            .and_then(Value::as_f64)
            .map(|days| (days as i64).clamp(1, MAX_FORECAST_DAYS as i64) as usize)
            .unwrap_or(1);

        let url = format!("{}/{}", self.base_url, urlencoding::encode(location));
        let response = self
            .client
            .get(&url)
            .query(&[("format", "j1")])
            .send()
            .await
            .map_err(|e| AgentError::ExecutionError(format!("Weather service unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::ExecutionError(format!(
                "Weather service returned {} for '{}'",
                status, location
            )));
        }

        let report: Value = response
            .json()
            .await
            .map_err(|e| AgentError::ExecutionError(format!("Unreadable weather report: {}", e)))?;

        summarize_report(location, &report, days)
    }
}

fn first_value<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key)?.get(0)?.get("value")?.as_str()
}

fn text<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Condense a wttr.in `j1` report into what the model needs
fn summarize_report(location: &str, report: &Value, days: usize) -> AgentResult<Value> {
    let current = report
        .get("current_condition")
        .and_then(|c| c.get(0))
        .ok_or_else(|| {
            AgentError::ExecutionError(format!("No weather data available for '{}'", location))
        })?;

    let area = report.get("nearest_area").and_then(|a| a.get(0));
    let resolved = match area {
        Some(area) => [first_value(area, "areaName"), first_value(area, "region"), first_value(area, "country")]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        None => location.to_string(),
    };

    let forecast: Vec<Value> = report
        .get("weather")
        .and_then(Value::as_array)
        .map(|days_data| {
            days_data
                .iter()
                .take(days)
                .map(|day| {
                    let chance_of_rain = day
                        .get("hourly")
                        .and_then(Value::as_array)
                        .into_iter()
                        .flatten()
                        .filter_map(|hour| text(hour, "chanceofrain")?.parse::<u32>().ok())
                        .max();
                    json!({
                        "date": text(day, "date"),
                        "max_temp_c": text(day, "maxtempC"),
                        "min_temp_c": text(day, "mintempC"),
                        "chance_of_rain_percent": chance_of_rain,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(json!({
        "location": resolved,
        "current": {
            "description": first_value(current, "weatherDesc"),
            "temp_c": text(current, "temp_C"),
            "feels_like_c": text(current, "FeelsLikeC"),
            "humidity_percent": text(current, "humidity"),
            "wind_kmph": text(current, "windspeedKmph"),
            "precipitation_mm": text(current, "precipMM"),
        },
        "forecast": forecast,
    }))
}

#[async_trait]
impl System for WeatherSystem {
    fn name(&self) -> &str {
        "WeatherSystem"
    }

    fn description(&self) -> &str {
        "Provides current weather conditions and forecasts"
    }

    fn instructions(&self) -> &str {
        "Use get_weather when the user asks about weather, rain or whether it is a good \
        time to plant, spray or harvest. Ask for a location if none was given."
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall, _caller: &CallerContext) -> AgentResult<ToolOutput> {
        match tool_call.name.as_str() {
            "get_weather" => self.get_weather(&tool_call).await.map(ToolOutput::value),
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}
