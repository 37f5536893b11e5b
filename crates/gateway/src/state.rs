use std::sync::Arc;

use relay_domain::config::{Config, Settings};
use relay_providers::{OpenAiAssistantService, ProviderRegistry};
use relay_runtime::{ChannelManager, RunEnvironment};
use relay_stores::{FsDataSourceStore, InMemoryAgentStore, LocalBlobStorage, Stores};
use relay_tools::ToolRegistry;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub manager: Arc<ChannelManager>,
    pub env: RunEnvironment,
}

impl AppState {
    /// Wire the reference stack: in-memory stores, local-FS blobs, the
    /// built-in toolkits, and whatever providers the environment
    /// supplies credentials for.
    pub fn build(settings: Settings, config: Config) -> anyhow::Result<Self> {
        let manager = Arc::new(ChannelManager::new());
        let providers = Arc::new(ProviderRegistry::from_settings(&settings));

        let assistant = if settings.openai_api_key.is_empty() {
            None
        } else {
            Some(Arc::new(OpenAiAssistantService::new(
                &settings.assistant_base_url,
                settings.openai_api_key.clone(),
            )?) as Arc<dyn relay_providers::AssistantService>)
        };

        let blobs = Arc::new(LocalBlobStorage::new(settings.blob_dir.clone()));
        let mut stores = Stores::in_memory();
        stores.data_sources = Arc::new(FsDataSourceStore::new(blobs));
        stores.agents = Arc::new(InMemoryAgentStore::with_presets(
            config.agents.values().cloned(),
        ));

        let env = RunEnvironment {
            stores,
            manager: manager.clone(),
            providers,
            assistant,
            tools: ToolRegistry::builtin(),
            pricing: config.pricing,
        };

        Ok(Self {
            settings: Arc::new(settings),
            manager,
            env,
        })
    }
}
