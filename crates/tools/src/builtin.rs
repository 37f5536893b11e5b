//! Built-in toolkits that are not full tool bodies: the `end_run`
//! sentinel and the remote-only markers executed by the hosted service.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use relay_domain::error::Result;

use crate::tool::{Tool, ToolInvocation, ToolOutput, END_RUN_TOOL};
use crate::toolkit::Toolkit;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// end_run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Calling this tool terminates the run with status completed.
pub struct EndRunTool;

#[async_trait]
impl Tool for EndRunTool {
    fn name(&self) -> &str {
        END_RUN_TOOL
    }

    fn description(&self) -> &str {
        "End the current run. Call when the task is complete and no further model turns are needed."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    fn end_turn(&self) -> bool {
        true
    }

    async fn invoke(&self, _invocation: ToolInvocation) -> Result<ToolOutput> {
        Ok(ToolOutput::EndRun)
    }
}

pub fn end_run_toolkit() -> Toolkit {
    Toolkit {
        id: END_RUN_TOOL.into(),
        name: "End run".into(),
        description: "Terminates the step loop.".into(),
        config_schema: None,
        tools: vec![Arc::new(EndRunTool)],
        remote_only: false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Remote-only markers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Executed by the hosted service; no local callable.
pub fn code_interpreter_toolkit() -> Toolkit {
    Toolkit {
        id: "code_interpreter".into(),
        name: "Code interpreter".into(),
        description: "Run code in the hosted sandbox; output may include generated images.".into(),
        config_schema: None,
        tools: Vec::new(),
        remote_only: true,
    }
}

/// Executed by the hosted service against a configured vector store.
pub fn file_search_toolkit() -> Toolkit {
    Toolkit {
        id: "file_search".into(),
        name: "File search".into(),
        description: "Search attached files via the hosted vector store.".into(),
        config_schema: Some(serde_json::json!({
            "type": "object",
            "properties": {
                "vector_store_id": {"type": "string"}
            }
        })),
        tools: Vec::new(),
        remote_only: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn end_run_tool_returns_marker() {
        let out = EndRunTool
            .invoke(ToolInvocation::bare(serde_json::json!({})))
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::EndRun));
        assert!(EndRunTool.end_turn());
    }

    #[test]
    fn remote_toolkits_have_no_local_tools() {
        assert!(code_interpreter_toolkit().tools.is_empty());
        assert!(file_search_toolkit().tools.is_empty());
        assert!(code_interpreter_toolkit().remote_only);
    }
}
