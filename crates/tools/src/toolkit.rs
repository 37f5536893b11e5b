//! Toolkits and the tool registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use relay_domain::message::ToolDefinition;

use crate::builtin::{code_interpreter_toolkit, end_run_toolkit, file_search_toolkit};
use crate::tool::Tool;
use crate::web_browser::web_browser_toolkit;

/// A labeled bundle of tools with a shared config schema.
#[derive(Clone)]
pub struct Toolkit {
    pub id: String,
    pub name: String,
    pub description: String,
    /// JSON Schema for the toolkit-level config override.
    pub config_schema: Option<Value>,
    pub tools: Vec<Arc<dyn Tool>>,
    /// Remote-only toolkits expose no local callables; the hosted
    /// service executes them on its side.
    pub remote_only: bool,
}

impl Toolkit {
    /// The wire representation for the hosted-assistant service:
    /// remote-only toolkits advertise by type, local tools by schema.
    pub fn assistant_tools(&self) -> Vec<Value> {
        if self.remote_only {
            return vec![serde_json::json!({"type": self.id})];
        }
        self.tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.parameters(),
                    }
                })
            })
            .collect()
    }
}

/// Registry of built-in toolkits plus custom-registered tools. The
/// active tool set of a run is the union of its agent's enabled
/// toolkits and every custom tool.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    toolkits: HashMap<String, Toolkit>,
    custom: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in toolkit available.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register_toolkit(web_browser_toolkit());
        registry.register_toolkit(end_run_toolkit());
        registry.register_toolkit(code_interpreter_toolkit());
        registry.register_toolkit(file_search_toolkit());
        registry
    }

    pub fn register_toolkit(&mut self, toolkit: Toolkit) {
        self.toolkits.insert(toolkit.id.clone(), toolkit);
    }

    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) {
        self.custom.insert(tool.name().to_string(), tool);
    }

    pub fn toolkit(&self, toolkit_id: &str) -> Option<&Toolkit> {
        self.toolkits.get(toolkit_id)
    }

    /// Resolve a tool by name within the enabled toolkit set. Custom
    /// tools are always active. Returns the tool and its owning toolkit
    /// id (custom tools have none).
    pub fn resolve(
        &self,
        name: &str,
        enabled_toolkits: &[String],
    ) -> Option<(Arc<dyn Tool>, Option<String>)> {
        if let Some(tool) = self.custom.get(name) {
            return Some((tool.clone(), None));
        }
        for toolkit_id in enabled_toolkits {
            if let Some(toolkit) = self.toolkits.get(toolkit_id) {
                for tool in &toolkit.tools {
                    if tool.name() == name {
                        return Some((tool.clone(), Some(toolkit_id.clone())));
                    }
                }
            }
        }
        // The end_run sentinel is always resolvable.
        self.toolkits
            .get("end_run")
            .and_then(|tk| tk.tools.first())
            .filter(|t| t.name() == name)
            .map(|t| (t.clone(), Some("end_run".to_string())))
    }

    /// Tool schemas for a chat-completions request.
    pub fn definitions(&self, enabled_toolkits: &[String]) -> Vec<ToolDefinition> {
        let mut defs = Vec::new();
        for toolkit_id in enabled_toolkits {
            if let Some(toolkit) = self.toolkits.get(toolkit_id) {
                if toolkit.remote_only {
                    tracing::debug!(toolkit = %toolkit_id, "remote-only toolkit skipped for local run");
                    continue;
                }
                for tool in &toolkit.tools {
                    defs.push(ToolDefinition {
                        name: tool.name().to_string(),
                        description: tool.description().to_string(),
                        parameters: tool.parameters(),
                    });
                }
            }
        }
        for tool in self.custom.values() {
            defs.push(ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            });
        }
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Tool schemas for a hosted-assistant run, including remote-only
    /// toolkit markers.
    pub fn assistant_tools(&self, enabled_toolkits: &[String]) -> Vec<Value> {
        let mut tools = Vec::new();
        for toolkit_id in enabled_toolkits {
            if let Some(toolkit) = self.toolkits.get(toolkit_id) {
                tools.extend(toolkit.assistant_tools());
            }
        }
        for tool in self.custom.values() {
            tools.push(serde_json::json!({
                "type": "function",
                "function": {
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters(),
                }
            }));
        }
        tools
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolInvocation, ToolOutput};
    use async_trait::async_trait;
    use relay_domain::error::Result;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn invoke(&self, invocation: ToolInvocation) -> Result<ToolOutput> {
            Ok(ToolOutput::Value(invocation.arguments))
        }
    }

    #[test]
    fn resolve_within_enabled_toolkits_only() {
        let registry = ToolRegistry::builtin();
        let enabled = vec!["web_browser".to_string()];
        assert!(registry.resolve("web_browser", &enabled).is_some());
        assert!(registry.resolve("web_browser", &[]).is_none());
    }

    #[test]
    fn end_run_always_resolvable() {
        let registry = ToolRegistry::builtin();
        let (tool, toolkit_id) = registry.resolve("end_run", &[]).unwrap();
        assert_eq!(tool.name(), "end_run");
        assert_eq!(toolkit_id.as_deref(), Some("end_run"));
    }

    #[test]
    fn custom_tools_are_always_active() {
        let mut registry = ToolRegistry::builtin();
        registry.register_tool(Arc::new(EchoTool));
        let (tool, toolkit_id) = registry.resolve("echo", &[]).unwrap();
        assert_eq!(tool.name(), "echo");
        assert!(toolkit_id.is_none());
    }

    #[test]
    fn definitions_skip_remote_only_toolkits() {
        let registry = ToolRegistry::builtin();
        let enabled = vec!["web_browser".to_string(), "code_interpreter".to_string()];
        let defs = registry.definitions(&enabled);
        assert!(defs.iter().any(|d| d.name == "web_browser"));
        assert!(!defs.iter().any(|d| d.name == "code_interpreter"));
    }

    #[test]
    fn assistant_tools_include_remote_markers() {
        let registry = ToolRegistry::builtin();
        let enabled = vec!["code_interpreter".to_string(), "web_browser".to_string()];
        let tools = registry.assistant_tools(&enabled);
        assert!(tools.iter().any(|t| t["type"] == "code_interpreter"));
        assert!(tools
            .iter()
            .any(|t| t["type"] == "function" && t["function"]["name"] == "web_browser"));
    }
}
