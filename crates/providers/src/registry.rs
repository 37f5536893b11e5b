//! Provider registry.
//!
//! Constructs and holds the configured LLM provider instances. At
//! startup the registry reads [`Settings`], resolves credentials, and
//! instantiates an adapter per configured endpoint. Providers that fail
//! to initialize are recorded and skipped rather than aborting startup.

use std::collections::HashMap;
use std::sync::Arc;

use relay_domain::config::Settings;
use relay_domain::error::{Error, Result};

use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;

/// Records a provider that failed to initialize.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_id: String,
    pub error: String,
}

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default_id: Option<String>,
    init_errors: Vec<ProviderInitError>,
}

impl ProviderRegistry {
    /// Build the registry from environment settings. With no API key the
    /// registry is empty; run triggers then fail with a config error
    /// instead of the process refusing to boot.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut init_errors = Vec::new();
        let mut default_id = None;

        if settings.openai_api_key.is_empty() {
            tracing::warn!("OPENAI_API_KEY unset; no chat-completions provider registered");
        } else {
            match OpenAiCompatProvider::new(
                "openai",
                &settings.openai_base_url,
                settings.openai_api_key.clone(),
                "gpt-4o-mini",
            ) {
                Ok(provider) => {
                    tracing::info!(provider_id = "openai", "registered LLM provider");
                    providers.insert("openai".into(), Arc::new(provider));
                    default_id = Some("openai".to_string());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to initialize LLM provider, skipping");
                    init_errors.push(ProviderInitError {
                        provider_id: "openai".into(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Self {
            providers,
            default_id,
            init_errors,
        }
    }

    /// Registry with explicit providers; the first becomes the default.
    pub fn from_providers(providers: Vec<(String, Arc<dyn LlmProvider>)>) -> Self {
        let default_id = providers.first().map(|(id, _)| id.clone());
        Self {
            providers: providers.into_iter().collect(),
            default_id,
            init_errors: Vec::new(),
        }
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// The default provider, or a config error when none registered.
    pub fn default_provider(&self) -> Result<Arc<dyn LlmProvider>> {
        self.default_id
            .as_ref()
            .and_then(|id| self.providers.get(id).cloned())
            .ok_or_else(|| Error::Config("no LLM provider configured".into()))
    }

    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_reports_config_error() {
        let registry = ProviderRegistry::from_providers(Vec::new());
        assert!(registry.is_empty());
        assert!(matches!(
            registry.default_provider(),
            Err(Error::Config(_))
        ));
    }
}
