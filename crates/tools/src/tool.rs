//! The tool capability trait and invocation types.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use relay_domain::error::Result;

/// Sentinel tool name that terminates the step loop with a completed
/// status.
pub const END_RUN_TOOL: &str = "end_run";

/// Shared cancellation probe a long-running tool can poll.
#[derive(Clone, Default)]
pub struct CancelProbe {
    flag: Arc<AtomicBool>,
}

impl CancelProbe {
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Everything a tool invocation receives: validated arguments, merged
/// configuration, and the identifiers of the owning run. Tools mutate
/// run state only through the values they return.
#[derive(Clone)]
pub struct ToolInvocation {
    pub run_id: Option<Uuid>,
    pub thread_id: Option<Uuid>,
    pub tenant_id: Option<String>,
    /// Static tool config merged with the run's toolkit override.
    pub config: Value,
    /// Arguments, already validated against the tool's schema.
    pub arguments: Value,
    pub cancel: CancelProbe,
}

impl ToolInvocation {
    pub fn bare(arguments: Value) -> Self {
        Self {
            run_id: None,
            thread_id: None,
            tenant_id: None,
            config: Value::Object(Default::default()),
            arguments,
            cancel: CancelProbe::default(),
        }
    }

    /// Merged view: argument keys win over config keys.
    pub fn merged_args(&self) -> Value {
        let mut merged = self.config.as_object().cloned().unwrap_or_default();
        if let Some(args) = self.arguments.as_object() {
            for (k, v) in args {
                merged.insert(k.clone(), v.clone());
            }
        }
        Value::Object(merged)
    }
}

/// What a tool produced.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    /// A structured value; the runner serializes it for the model.
    Value(Value),
    /// A plain string result.
    Text(String),
    /// A structured value with a self-declared string rendering.
    WithSummary { value: Value, results_string: String },
    /// Marker: terminate the run with status completed.
    EndRun,
}

/// A named, schema-typed callable.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> Value;

    /// When true, the tool's output ends the agent's turn instead of
    /// being shown to the model.
    fn end_turn(&self) -> bool {
        false
    }

    /// When true, the output is withheld from stream subscribers.
    fn is_private(&self) -> bool {
        false
    }

    async fn invoke(&self, invocation: ToolInvocation) -> Result<ToolOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_args_prefer_invocation_values() {
        let mut inv = ToolInvocation::bare(serde_json::json!({"url": "https://a", "limit": 2}));
        inv.config = serde_json::json!({"limit": 10, "timeout_secs": 5});
        let merged = inv.merged_args();
        assert_eq!(merged["limit"], 2);
        assert_eq!(merged["timeout_secs"], 5);
        assert_eq!(merged["url"], "https://a");
    }

    #[test]
    fn cancel_probe_reflects_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let probe = CancelProbe::new(flag.clone());
        assert!(!probe.is_cancelled());
        flag.store(true, Ordering::Release);
        assert!(probe.is_cancelled());
    }
}
