//! Run records — the root aggregate for one bounded agent execution,
//! made of ordered steps with aggregated token usage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::message::ToolCall;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Usage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Started,
    InProgress,
    RequiresAction,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Status transitions are monotone except `requires_action →
    /// in_progress`; terminal statuses are sinks.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Started => true,
            Self::InProgress => next != Self::Started,
            Self::RequiresAction => {
                matches!(next, Self::InProgress | Self::Completed | Self::Failed | Self::Cancelled)
            }
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run steps
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    MessageCreation,
    ToolCalls,
}

/// Either a reference to the created message or the ordered tool-call
/// batch the model requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDetails {
    MessageCreation { message_id: Uuid },
    ToolCalls { tool_calls: Vec<ToolCall> },
}

/// One atomic model decision within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStep {
    pub id: Uuid,
    pub run_id: Uuid,
    pub thread_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    pub kind: StepKind,
    pub status: StepStatus,
    pub details: StepDetails,
    #[serde(default)]
    pub usage: Usage,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunStep {
    pub fn message_creation(run_id: Uuid, thread_id: Uuid, message_id: Uuid) -> Self {
        Self::new(run_id, thread_id, StepKind::MessageCreation, StepDetails::MessageCreation { message_id })
    }

    pub fn tool_calls(run_id: Uuid, thread_id: Uuid, tool_calls: Vec<ToolCall>) -> Self {
        Self::new(run_id, thread_id, StepKind::ToolCalls, StepDetails::ToolCalls { tool_calls })
    }

    fn new(run_id: Uuid, thread_id: Uuid, kind: StepKind, details: StepDetails) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            thread_id,
            assistant_id: None,
            kind,
            status: StepStatus::InProgress,
            details,
            usage: Usage::default(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn finish(&mut self, status: StepStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// The tool calls carried by a tool_calls step, empty otherwise.
    pub fn step_tool_calls(&self) -> &[ToolCall] {
        match &self.details {
            StepDetails::ToolCalls { tool_calls } => tool_calls,
            StepDetails::MessageCreation { .. } => &[],
        }
    }

    /// Replace the tool call with a matching id, splicing in enriched
    /// outputs. Returns true when a call was patched.
    pub fn patch_tool_call(&mut self, enriched: &ToolCall) -> bool {
        if let StepDetails::ToolCalls { tool_calls } = &mut self.details {
            for tc in tool_calls.iter_mut() {
                if tc.id == enriched.id {
                    *tc = enriched.clone();
                    return true;
                }
            }
        }
        false
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run metadata
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Credits entry persisted on successful runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credits {
    pub credits: f64,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<Credits>,
    /// Cached log of dispatched action events.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Value>,
    /// Technical message for run-fatal errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_outputs: Vec<Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The root aggregate: one bounded execution of an agent against a user
/// message. Steps are kept in model-emission order; `usage` equals the
/// sum over steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub thread_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Handle into the hosted-assistant service, when delegated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub steps: Vec<RunStep>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub metadata: RunMetadata,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Run {
    pub fn new(id: Uuid, thread_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            thread_id,
            tenant_id: None,
            agent_id: None,
            external_id: None,
            status: RunStatus::Started,
            steps: Vec::new(),
            usage: Usage::default(),
            metadata: RunMetadata::default(),
            tags: Vec::new(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Apply a status transition, ignoring moves a terminal sink forbids.
    /// Returns the status actually in effect afterwards.
    pub fn transition(&mut self, next: RunStatus) -> RunStatus {
        if self.status.can_transition_to(next) {
            self.status = next;
            self.modified_at = Utc::now();
        } else {
            tracing::warn!(
                run_id = %self.id,
                from = ?self.status,
                to = ?next,
                "ignoring invalid run status transition"
            );
        }
        self.status
    }

    /// Append a step in emission order and fold its usage into the total.
    pub fn push_step(&mut self, step: RunStep) {
        self.usage.add(&step.usage);
        self.steps.push(step);
        self.modified_at = Utc::now();
    }

    /// Recompute aggregated usage from the step list.
    pub fn recompute_usage(&mut self) {
        let mut total = Usage::default();
        for step in &self.steps {
            total.add(&step.usage);
        }
        self.usage = total;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
