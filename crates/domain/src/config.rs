//! Process configuration.
//!
//! [`Settings`] is the typed view of the process environment (provider
//! credentials, blob storage, listen address). [`Config`] is the optional
//! TOML file the gateway loads for pricing tables and agent presets.
//! There is no other implicit global configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::agent::AgentConfig;
use crate::error::{Error, Result};
use crate::run::Credits;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// S3 credentials, read when the S3 blob backend is selected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Settings {
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: String,
    pub region: String,
}

impl S3Settings {
    fn from_env() -> Self {
        Self {
            bucket: env_or("RELAY_S3_BUCKET", "relay-storage"),
            access_key_id: env_or("RELAY_S3_ACCESS_KEY_ID", ""),
            secret_access_key: env_or("RELAY_S3_SECRET_ACCESS_KEY", ""),
            endpoint_url: env_or("RELAY_S3_ENDPOINT_URL", ""),
            region: env_or("RELAY_S3_REGION", ""),
        }
    }
}

/// Typed view of the process environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Chat-completions API key (`OPENAI_API_KEY`).
    pub openai_api_key: String,
    /// Chat-completions base URL.
    pub openai_base_url: String,
    /// Hosted-assistant service base URL.
    pub assistant_base_url: String,
    pub s3: S3Settings,
    pub database_url: String,
    pub listen_addr: String,
    /// Directory for the local blob backend.
    pub blob_dir: String,
}

impl Settings {
    pub fn from_env() -> Self {
        let openai_base = env_or("RELAY_OPENAI_BASE_URL", "https://api.openai.com/v1");
        Self {
            openai_api_key: env_or("OPENAI_API_KEY", ""),
            assistant_base_url: env_or("RELAY_ASSISTANT_BASE_URL", &openai_base),
            openai_base_url: openai_base,
            s3: S3Settings::from_env(),
            database_url: env_or("RELAY_DATABASE_URL", "sqlite::memory:"),
            listen_addr: env_or("RELAY_LISTEN", "127.0.0.1:8600"),
            blob_dir: env_or("RELAY_BLOB_DIR", "./data/files"),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pricing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pricing per million tokens for a specific model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Credits per 1 million input (prompt) tokens.
    pub input_per_1m: f64,
    /// Credits per 1 million output (completion) tokens.
    pub output_per_1m: f64,
}

impl ModelPricing {
    pub fn estimate_credits(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (prompt_tokens as f64 * self.input_per_1m + completion_tokens as f64 * self.output_per_1m)
            / 1_000_000.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingTable {
    #[serde(default)]
    pub models: HashMap<String, ModelPricing>,
    /// Rate applied when a model has no pricing entry.
    #[serde(default = "d_fallback")]
    pub fallback_per_1m: f64,
}

fn d_fallback() -> f64 {
    1.0
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            models: HashMap::new(),
            fallback_per_1m: d_fallback(),
        }
    }
}

impl PricingTable {
    /// Credits entry for a finished run. Unknown models fall back to a
    /// flat per-token rate so successful runs always record credits.
    pub fn credits_for(&self, model: &str, prompt_tokens: u32, completion_tokens: u32) -> Credits {
        let credits = match self.models.get(model) {
            Some(pricing) => pricing.estimate_credits(prompt_tokens, completion_tokens),
            None => {
                (prompt_tokens as f64 + completion_tokens as f64) * self.fallback_per_1m
                    / 1_000_000.0
            }
        };
        Credits {
            credits,
            model: model.to_string(),
            prompt_tokens,
            completion_tokens,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TOML config file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pricing: PricingTable,
    /// Agent presets (key = agent id).
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
