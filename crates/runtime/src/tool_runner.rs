//! Tool runner — resolves a named tool call against the run's active
//! tool set and executes it, capturing structured and string outputs.
//!
//! A failing tool is not a failing run: the error text becomes the
//! tool's output and the model decides what to do next. The only
//! control-flow exceptions are the `end_run` sentinels, which terminate
//! the step loop with a completed status.

use serde_json::Value;

use relay_domain::error::Error;
use relay_domain::message::ToolCall;
use relay_tools::{Tool, ToolInvocation, ToolOutput, ToolRegistry, END_RUN_TOOL};

use crate::context::RunContext;

/// The outcome of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub output_string: String,
    pub structured_output: Option<Value>,
    pub is_error: bool,
    pub is_private: bool,
    pub end_turn: bool,
    /// True when the run must terminate with status completed.
    pub end_run: bool,
}

impl ToolResult {
    fn error(call: &ToolCall, message: String) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            output_string: message,
            structured_output: None,
            is_error: true,
            is_private: false,
            end_turn: false,
            end_run: false,
        }
    }

    /// The enriched tool call: the original call with both outputs
    /// spliced in, exactly once, by this invocation.
    pub fn enrich(&self, call: &ToolCall) -> ToolCall {
        let mut enriched = call.clone();
        enriched.output = Some(self.output_string.clone());
        enriched.structured_output = self.structured_output.clone();
        enriched
    }
}

pub struct ToolRunner {
    registry: ToolRegistry,
}

impl ToolRunner {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// Execute one tool call under the given run context. Never returns
    /// an error: every failure mode is folded into the result.
    pub async fn run(&self, call: &ToolCall, ctx: &RunContext) -> ToolResult {
        if call.name == END_RUN_TOOL {
            return ToolResult {
                tool_call_id: call.id.clone(),
                output_string: "Run ended.".into(),
                structured_output: None,
                is_error: false,
                is_private: false,
                end_turn: true,
                end_run: true,
            };
        }

        let enabled = &ctx.agent_config.toolkits;
        let Some((tool, toolkit_id)) = self.registry.resolve(&call.name, enabled) else {
            return ToolResult::error(
                call,
                format!("Error calling tool {}: unknown tool", call.name),
            );
        };

        // 1. Parse and validate arguments against the tool's schema.
        let arguments: Value = match serde_json::from_str(&call.arguments) {
            Ok(v) => v,
            Err(e) => {
                return ToolResult::error(
                    call,
                    format!("Error calling tool {}: invalid arguments JSON: {e}", call.name),
                )
            }
        };
        if let Err(message) = validate_arguments(&tool.parameters(), &arguments) {
            return ToolResult::error(
                call,
                format!("Error calling tool {}: {message}", call.name),
            );
        }

        // 2. Merge the toolkit config override from the run context.
        let config = toolkit_id
            .as_deref()
            .and_then(|id| ctx.agent_config.toolkit_override(id))
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));

        let invocation = ToolInvocation {
            run_id: Some(ctx.run_id),
            thread_id: Some(ctx.thread_id),
            tenant_id: ctx.tenant_id.clone(),
            config,
            arguments,
            cancel: ctx.cancel_probe(),
        };

        // 3. Execute and capture.
        let span = tracing::info_span!("tool.call", tool_name = %call.name, run_id = %ctx.run_id);
        let outcome = tracing::Instrument::instrument(tool.invoke(invocation), span).await;

        match outcome {
            Ok(ToolOutput::EndRun) => ToolResult {
                tool_call_id: call.id.clone(),
                output_string: "Run ended.".into(),
                structured_output: None,
                is_error: false,
                is_private: tool.is_private(),
                end_turn: true,
                end_run: true,
            },
            Ok(output) => {
                let (output_string, structured_output) = render_output(output);
                ToolResult {
                    tool_call_id: call.id.clone(),
                    output_string,
                    structured_output,
                    is_error: false,
                    is_private: tool.is_private(),
                    end_turn: tool.end_turn(),
                    end_run: false,
                }
            }
            Err(Error::EndRun) => ToolResult {
                tool_call_id: call.id.clone(),
                output_string: "Run ended.".into(),
                structured_output: None,
                is_error: false,
                is_private: tool.is_private(),
                end_turn: true,
                end_run: true,
            },
            Err(e) => {
                tracing::warn!(tool_name = %call.name, error = %e, "tool invocation failed");
                ToolResult::error(call, format!("Error calling tool {}: {e}", call.name))
            }
        }
    }
}

/// Validate arguments against a JSON schema. A schema that itself fails
/// to compile counts as an invocation error.
fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| format!("invalid tool schema: {e}"))?;
    let mut errors = validator.iter_errors(arguments);
    if let Some(first) = errors.next() {
        return Err(format!("argument validation failed: {first}"));
    }
    Ok(())
}

/// `output_string` is the tool's self-declared rendering when present,
/// else a deterministic JSON serialization of the return value.
fn render_output(output: ToolOutput) -> (String, Option<Value>) {
    match output {
        ToolOutput::Text(text) => (text, None),
        ToolOutput::Value(value) => {
            let rendered = match &value {
                Value::String(s) => s.clone(),
                other => serde_json::to_string(other).unwrap_or_default(),
            };
            (rendered, Some(value))
        }
        ToolOutput::WithSummary { value, results_string } => (results_string, Some(value)),
        ToolOutput::EndRun => (String::new(), None),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_domain::agent::{AgentConfig, ToolkitConfig};
    use relay_tools::{Tool, Toolkit};
    use std::sync::Arc;
    use uuid::Uuid;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the merged arguments"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            })
        }
        async fn invoke(&self, invocation: ToolInvocation) -> relay_domain::error::Result<ToolOutput> {
            Ok(ToolOutput::Value(invocation.merged_args()))
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always raises"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn invoke(&self, _invocation: ToolInvocation) -> relay_domain::error::Result<ToolOutput> {
            Err(Error::Other("x".into()))
        }
    }

    struct StopTool;

    #[async_trait]
    impl Tool for StopTool {
        fn name(&self) -> &str {
            "stop_everything"
        }
        fn description(&self) -> &str {
            "Raises the end-run signal"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn invoke(&self, _invocation: ToolInvocation) -> relay_domain::error::Result<ToolOutput> {
            Err(Error::EndRun)
        }
    }

    fn runner_with(tools: Vec<Arc<dyn Tool>>) -> ToolRunner {
        let mut registry = ToolRegistry::builtin();
        registry.register_toolkit(Toolkit {
            id: "test".into(),
            name: "Test".into(),
            description: String::new(),
            config_schema: None,
            tools,
            remote_only: false,
        });
        ToolRunner::new(registry)
    }

    fn ctx_with_toolkits(toolkits: Vec<String>) -> RunContext {
        let mut config = AgentConfig::default_agent();
        config.toolkits = toolkits;
        RunContext::new("ch", Uuid::new_v4(), Uuid::new_v4(), None, config)
    }

    #[tokio::test]
    async fn successful_invocation_captures_both_outputs() {
        let runner = runner_with(vec![Arc::new(EchoTool)]);
        let ctx = ctx_with_toolkits(vec!["test".into()]);
        let call = ToolCall::function("c1", "echo", r#"{"text":"hi"}"#);

        let result = runner.run(&call, &ctx).await;
        assert!(!result.is_error);
        assert_eq!(result.structured_output.as_ref().unwrap()["text"], "hi");
        assert!(result.output_string.contains("\"text\""));

        let enriched = result.enrich(&call);
        assert!(enriched.output.is_some());
        assert!(enriched.structured_output.is_some());
    }

    #[tokio::test]
    async fn toolkit_config_override_is_merged() {
        let runner = runner_with(vec![Arc::new(EchoTool)]);
        let mut ctx = ctx_with_toolkits(vec!["test".into()]);
        ctx.agent_config.tool_config.push(ToolkitConfig {
            toolkit_id: "test".into(),
            config: Some(serde_json::json!({"region": "eu"})),
        });
        let call = ToolCall::function("c1", "echo", r#"{"text":"hi"}"#);

        let result = runner.run(&call, &ctx).await;
        assert_eq!(result.structured_output.unwrap()["region"], "eu");
    }

    #[tokio::test]
    async fn schema_validation_failure_is_an_invocation_error() {
        let runner = runner_with(vec![Arc::new(EchoTool)]);
        let ctx = ctx_with_toolkits(vec!["test".into()]);
        // Missing the required "text" property.
        let call = ToolCall::function("c1", "echo", r#"{"other": 1}"#);

        let result = runner.run(&call, &ctx).await;
        assert!(result.is_error);
        assert!(result.output_string.starts_with("Error calling tool echo:"));
    }

    #[tokio::test]
    async fn malformed_arguments_json_is_an_invocation_error() {
        let runner = runner_with(vec![Arc::new(EchoTool)]);
        let ctx = ctx_with_toolkits(vec!["test".into()]);
        let call = ToolCall::function("c1", "echo", "not json");

        let result = runner.run(&call, &ctx).await;
        assert!(result.is_error);
        assert!(result.output_string.starts_with("Error calling tool echo:"));
    }

    #[tokio::test]
    async fn tool_exception_maps_to_error_output() {
        let runner = runner_with(vec![Arc::new(BrokenTool)]);
        let ctx = ctx_with_toolkits(vec!["test".into()]);
        let call = ToolCall::function("c1", "broken", "{}");

        let result = runner.run(&call, &ctx).await;
        assert!(result.is_error);
        assert!(result.output_string.starts_with("Error calling tool broken: x"));
        assert!(!result.end_run);
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_not_a_panic() {
        let runner = runner_with(vec![]);
        let ctx = ctx_with_toolkits(vec![]);
        let call = ToolCall::function("c1", "ghost", "{}");

        let result = runner.run(&call, &ctx).await;
        assert!(result.is_error);
        assert!(result.output_string.contains("unknown tool"));
    }

    #[tokio::test]
    async fn end_run_sentinel_by_name() {
        let runner = runner_with(vec![]);
        let ctx = ctx_with_toolkits(vec![]);
        let call = ToolCall::function("c1", END_RUN_TOOL, "{}");

        let result = runner.run(&call, &ctx).await;
        assert!(result.end_run);
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn end_run_sentinel_by_signal() {
        let runner = runner_with(vec![Arc::new(StopTool)]);
        let ctx = ctx_with_toolkits(vec!["test".into()]);
        let call = ToolCall::function("c1", "stop_everything", "{}");

        let result = runner.run(&call, &ctx).await;
        assert!(result.end_run);
        assert!(!result.is_error);
    }
}
