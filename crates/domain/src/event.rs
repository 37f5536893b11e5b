//! The unified run-event taxonomy and the wire frame format.
//!
//! Both backends (hosted assistant, local chat-completions) are
//! normalized into [`AssistantEvent`] at their adapter boundary; the
//! orchestrator and event handler see only this taxonomy.
//!
//! [`EventFrame`] is the JSON object that leaves the process through the
//! connection manager: camelCased keys, one logical channel per frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{ChatMessage, ToolCall};
use crate::run::{RunStep, Usage};

/// Generic user-facing payload for failed or cancelled runs. The
/// technical message travels separately in `errorDetail`.
pub const GENERIC_ERROR_TEXT: &str = "Something went wrong, please try again later.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Unified event taxonomy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Model-side events, normalized across backends.
#[derive(Debug, Clone)]
pub enum AssistantEvent {
    /// Partial message snapshot; id stable across deltas.
    MessageDelta { message: ChatMessage },
    /// Final message snapshot.
    MessageDone { message: ChatMessage },
    /// Partial run-step snapshot (tool-call assembly in flight).
    StepDelta { step: RunStep },
    /// A step finished; tool_calls steps may still need output splicing.
    StepDone { step: RunStep },
    /// A single tool call finished executing, with outputs attached.
    ToolCallDone { tool_call: ToolCall },
    /// The remote service is waiting for tool outputs (hosted flavor).
    RequiresAction { tool_calls: Vec<ToolCall> },
    /// The remote service produced an image file (code interpreter).
    ImageFile { file_id: String },
    /// Terminal: the run completed.
    Completed { usage: Option<Usage> },
    /// Terminal: the run failed.
    Failed { error: String },
    /// Terminal: the run was cancelled.
    Cancelled,
}

impl AssistantEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameEvent {
    Message,
    Close,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameMessageType {
    Message,
    Action,
    Image,
    ToolCall,
    Close,
    Error,
}

/// One outbound frame on a logical channel.
///
/// `patch == true` tells the receiver to merge by message id into an
/// existing message; otherwise replace or append.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    pub run_id: String,
    pub thread_id: String,
    pub channel_id: String,
    pub event: FrameEvent,
    pub message_type: FrameMessageType,
    pub streaming: bool,
    pub patch: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl EventFrame {
    pub fn stream(
        channel_id: &str,
        thread_id: &str,
        run_id: &str,
        message: Value,
        message_type: FrameMessageType,
        streaming: bool,
        patch: bool,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            thread_id: thread_id.to_string(),
            channel_id: channel_id.to_string(),
            event: FrameEvent::Message,
            message_type,
            streaming,
            patch,
            message: Some(message),
            error: None,
            error_detail: None,
        }
    }

    /// Terminal success frame; exactly one per run.
    pub fn close(channel_id: &str, thread_id: &str, run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            thread_id: thread_id.to_string(),
            channel_id: channel_id.to_string(),
            event: FrameEvent::Close,
            message_type: FrameMessageType::Close,
            streaming: false,
            patch: false,
            message: None,
            error: None,
            error_detail: None,
        }
    }

    /// Terminal failure/cancellation frame; exactly one per run and
    /// mutually exclusive with `close`.
    pub fn error(channel_id: &str, thread_id: &str, run_id: &str, detail: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            thread_id: thread_id.to_string(),
            channel_id: channel_id.to_string(),
            event: FrameEvent::Error,
            message_type: FrameMessageType::Error,
            streaming: false,
            patch: false,
            message: None,
            error: Some(GENERIC_ERROR_TEXT.to_string()),
            error_detail: Some(detail.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.event, FrameEvent::Close | FrameEvent::Error)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
