//! Agent configuration: instructions, model, mode, and enabled toolkits.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Hard ceiling on the step loop regardless of configuration.
pub const MAX_STEPS_CEILING: usize = 20;

fn d_max_steps() -> usize {
    3
}

fn d_temperature() -> f32 {
    0.2
}

fn d_tool_choice() -> String {
    // Universal default; explicit tool_choice is an advanced override.
    "auto".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Delegate the step loop to a hosted assistant service.
    Assistant,
    /// Drive the step loop in-process against a chat-completions LLM.
    #[default]
    Local,
}

/// Per-toolkit configuration override, merged into tool invocations at
/// run time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolkitConfig {
    pub toolkit_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// Trigger-supplied overrides applied on top of a stored agent config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Model override (e.g. "gpt-4o-mini").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Template variables for instruction rendering.
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    /// May contain `{{variable}}` placeholders filled at run start.
    pub instructions: String,
    pub model: String,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub mode: AgentMode,
    /// Enabled built-in toolkit ids.
    #[serde(default)]
    pub toolkits: Vec<String>,
    #[serde(default)]
    pub tool_config: Vec<ToolkitConfig>,
    /// Vector store handle for the hosted file_search toolkit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_search_store: Option<String>,
    #[serde(default = "d_max_steps")]
    pub max_steps: usize,
    #[serde(default = "d_tool_choice")]
    pub tool_choice: String,
    #[serde(default, skip_serializing)]
    pub runtime_config: Option<RuntimeConfig>,
}

impl AgentConfig {
    /// The built-in preset used when a trigger names no agent and no
    /// stored config is found.
    pub fn default_agent() -> Self {
        Self {
            id: "default".into(),
            name: "Assistant".into(),
            instructions: "You are a helpful assistant.".into(),
            model: "gpt-4o-mini".into(),
            temperature: d_temperature(),
            mode: AgentMode::Local,
            toolkits: Vec::new(),
            tool_config: Vec::new(),
            file_search_store: None,
            max_steps: d_max_steps(),
            tool_choice: d_tool_choice(),
            runtime_config: None,
        }
    }

    /// Apply trigger-supplied runtime overrides. Existing fields are only
    /// replaced where the override actually carries a value.
    pub fn apply_runtime_config(&mut self, rc: RuntimeConfig) {
        if let Some(model) = &rc.model {
            self.model = model.clone();
        }
        self.runtime_config = Some(rc);
    }

    /// Render instructions, substituting `{{key}}` placeholders from the
    /// runtime variables. Unknown placeholders are left in place.
    pub fn render_instructions(&self) -> String {
        let vars = self
            .runtime_config
            .as_ref()
            .map(|rc| &rc.variables)
            .filter(|v| !v.is_empty());
        let Some(vars) = vars else {
            return self.instructions.clone();
        };
        let mut out = self.instructions.clone();
        for (key, value) in vars {
            out = out.replace(&format!("{{{{{key}}}}}"), value);
        }
        out
    }

    /// The effective step budget: configured value clamped to the ceiling,
    /// with a floor of one step.
    pub fn effective_max_steps(&self) -> usize {
        self.max_steps.clamp(1, MAX_STEPS_CEILING)
    }

    /// Config override for a toolkit, if one was provided.
    pub fn toolkit_override(&self, toolkit_id: &str) -> Option<&Value> {
        self.tool_config
            .iter()
            .find(|tc| tc.toolkit_id == toolkit_id)
            .and_then(|tc| tc.config.as_ref())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
