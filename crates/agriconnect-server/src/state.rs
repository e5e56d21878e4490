use agriconnect::agent::{Agent, AgentConfig};
use agriconnect::providers::factory::get_provider;
use agriconnect::systems::marketplace::MarketplaceSystem;
use agriconnect::systems::navigation::NavigationSystem;
use agriconnect::systems::search::SearchSystem;
use agriconnect::systems::store::PostgrestStore;
use agriconnect::systems::weather::WeatherSystem;
use agriconnect::systems::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;

use crate::configuration::Settings;

/// Shared application state, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Agent>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(agent: Agent, request_timeout: Duration) -> Self {
        Self {
            agent: Arc::new(agent),
            request_timeout,
        }
    }

    pub fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let request_timeout = settings.agent.request_timeout();
        let config = AgentConfig::new(settings.agent.max_iterations)?;

        let store = PostgrestStore::new(
            settings.database.url.as_deref(),
            settings.database.service_key,
        )?;
        let registry = ToolRegistry::new()
            .with_system(Arc::new(MarketplaceSystem::new(Arc::new(store))))?
            .with_system(Arc::new(WeatherSystem::new(settings.services.weather_url)?))?
            .with_system(Arc::new(SearchSystem::new(settings.services.search_url)?))?
            .with_system(Arc::new(NavigationSystem::new()))?;

        let provider = get_provider(settings.provider.into_config())?;
        if let Err(e) = provider.check_configured() {
            // Requests will fail until a key is supplied, but the server still starts
            tracing::warn!(provider = provider.name(), "{}", e);
        }

        tracing::info!(
            provider = provider.name(),
            tools = registry.tools().len(),
            max_iterations = config.max_iterations,
            "agent ready"
        );
        let agent = Agent::new(provider, Arc::new(registry)).with_config(config);
        Ok(Self::new(agent, request_timeout))
    }
}
