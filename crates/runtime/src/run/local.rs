//! Local flavor — the in-process step loop against a chat-completions
//! LLM.
//!
//! Each step streams one model response, synthesizing message deltas and
//! tool-call step deltas through the event handler as chunks arrive.
//! When the stream ends the step is assembled: a tool_calls step runs
//! its calls and continues the loop; a message step is terminal. The
//! stop flag is polled before every model request and before every tool
//! dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use uuid::Uuid;

use relay_domain::error::{Error, Result};
use relay_domain::event::AssistantEvent;
use relay_domain::message::{ChatMessage, ContentBlock, ToolCall};
use relay_domain::run::{RunStep, StepStatus, Usage};
use relay_domain::stream::StreamEvent;
use relay_providers::{ChatRequest, LlmProvider};
use relay_tools::ToolRegistry;

use crate::context::RunContext;
use crate::events::EventHandler;
use crate::memory::RuntimeMemory;
use crate::tool_runner::ToolRunner;

use super::LoopOutcome;

pub(crate) struct LocalRunner {
    pub ctx: Arc<RunContext>,
    pub provider: Arc<dyn LlmProvider>,
    pub registry: ToolRegistry,
    pub handler: Arc<EventHandler>,
    pub memory: Arc<RuntimeMemory>,
    pub step_timeout: Option<Duration>,
}

enum StepOutcome {
    /// Message phase: the response carried no tool calls.
    Final,
    /// An `end_run` sentinel fired inside the tool phase.
    EndRun,
    /// Stop flag observed inside the tool phase.
    Cancelled,
    /// Tool phase finished; loop continues.
    Continue,
}

impl LocalRunner {
    pub async fn execute(&self) -> Result<LoopOutcome> {
        let runner = ToolRunner::new(self.registry.clone());
        let config = &self.ctx.agent_config;
        let max_steps = config.effective_max_steps();
        let instructions = config.render_instructions();
        let tool_defs = self.registry.definitions(&config.toolkits);

        for step_idx in 0..max_steps {
            // Poll point: before dispatching a new model request.
            if self.ctx.is_stop_requested() {
                tracing::info!(run_id = %self.ctx.run_id, step_idx, "stop flag observed before model request");
                return Ok(LoopOutcome::Cancelled);
            }

            let mut messages = vec![ChatMessage::system(&instructions)];
            messages.extend(self.memory.list(None).await);

            let request = ChatRequest {
                messages,
                tools: tool_defs.clone(),
                temperature: Some(config.temperature),
                max_tokens: None,
                model: Some(config.model.clone()),
                tool_choice: if tool_defs.is_empty() {
                    None
                } else {
                    Some(config.tool_choice.clone())
                },
            };

            tracing::debug!(run_id = %self.ctx.run_id, step_idx, "step loop iteration");

            let outcome = match self.step_timeout {
                Some(bound) => {
                    match tokio::time::timeout(bound, self.run_step(&request, &runner)).await {
                        Ok(outcome) => outcome?,
                        Err(_) => {
                            // Expiry behaves exactly like cancellation.
                            tracing::warn!(run_id = %self.ctx.run_id, ?bound, "step wall-clock bound hit");
                            return Ok(LoopOutcome::Cancelled);
                        }
                    }
                }
                None => self.run_step(&request, &runner).await?,
            };

            match outcome {
                StepOutcome::Final | StepOutcome::EndRun => return Ok(LoopOutcome::Completed),
                StepOutcome::Cancelled => return Ok(LoopOutcome::Cancelled),
                StepOutcome::Continue => {}
            }
        }

        tracing::warn!(run_id = %self.ctx.run_id, max_steps, "step budget exhausted");
        Ok(LoopOutcome::Cancelled)
    }

    /// One step: stream the response, push deltas through the handler,
    /// then run the tool phase or finish the message phase.
    async fn run_step(&self, request: &ChatRequest, runner: &ToolRunner) -> Result<StepOutcome> {
        let mut stream = self.provider.chat_stream(request).await?;
        let mut acc = StepAccumulator::new(self.ctx.run_id, self.ctx.thread_id);

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Token { text } => {
                    acc.push_text(&text);
                    self.handler
                        .handle(AssistantEvent::MessageDelta { message: acc.delta_message(&text) })
                        .await?;
                }
                StreamEvent::ToolCallStarted { call_id, tool_name } => {
                    acc.start_call(call_id, tool_name);
                    self.handler
                        .handle(AssistantEvent::StepDelta { step: acc.step_snapshot() })
                        .await?;
                }
                StreamEvent::ToolCallDelta { call_id, delta } => {
                    acc.append_args(&call_id, &delta);
                }
                StreamEvent::ToolCallFinished { call_id, tool_name, arguments } => {
                    acc.finish_call(call_id, tool_name, arguments);
                }
                StreamEvent::Done { usage, finish_reason: _ } => {
                    acc.record_usage(usage);
                }
                StreamEvent::Error { message } => {
                    return Err(Error::Provider {
                        provider: self.provider.provider_id().to_string(),
                        message,
                    });
                }
            }
        }

        let tool_calls = acc.assembled_tool_calls();
        if tool_calls.is_empty() {
            self.finish_message_phase(&acc).await?;
            return Ok(StepOutcome::Final);
        }
        self.run_tool_phase(&acc, tool_calls, runner).await
    }

    /// Message phase: emit the final message and its step; terminal.
    async fn finish_message_phase(&self, acc: &StepAccumulator) -> Result<()> {
        self.handler
            .handle(AssistantEvent::MessageDone { message: acc.final_message() })
            .await?;

        let mut step =
            RunStep::message_creation(self.ctx.run_id, self.ctx.thread_id, acc.message_id);
        step.id = acc.step_id;
        step.usage = acc.usage();
        step.finish(StepStatus::Completed);
        self.handler.handle(AssistantEvent::StepDone { step }).await?;
        Ok(())
    }

    /// Tool phase: run each call, patch outputs, emit the finished step.
    async fn run_tool_phase(
        &self,
        acc: &StepAccumulator,
        tool_calls: Vec<ToolCall>,
        runner: &ToolRunner,
    ) -> Result<StepOutcome> {
        let mut step = RunStep::tool_calls(self.ctx.run_id, self.ctx.thread_id, tool_calls.clone());
        step.id = acc.step_id;
        step.usage = acc.usage();

        let mut end_run = false;
        for call in &tool_calls {
            // Poll point: before dispatching a new tool call.
            if self.ctx.is_stop_requested() {
                tracing::info!(run_id = %self.ctx.run_id, "stop flag observed before tool dispatch");
                return Ok(StepOutcome::Cancelled);
            }

            let result = runner.run(call, &self.ctx).await;
            self.ctx.scratch.push_tool_output(serde_json::json!({
                "tool_call_id": result.tool_call_id,
                "output": result.output_string,
                "is_error": result.is_error,
            }));
            self.handler
                .handle(AssistantEvent::ToolCallDone { tool_call: result.enrich(call) })
                .await?;

            if result.end_run {
                end_run = true;
                break;
            }
        }

        step.finish(StepStatus::Completed);
        self.handler.handle(AssistantEvent::StepDone { step }).await?;

        if end_run {
            Ok(StepOutcome::EndRun)
        } else {
            Ok(StepOutcome::Continue)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chunk accumulation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct PendingCall {
    id: String,
    name: String,
    args: String,
    finished: bool,
}

/// Accumulates one streamed response: text, tool-call fragments, usage.
/// Message and step ids are allocated once so delta and final snapshots
/// merge by id downstream.
struct StepAccumulator {
    run_id: Uuid,
    thread_id: Uuid,
    message_id: Uuid,
    step_id: Uuid,
    text: String,
    calls: Vec<PendingCall>,
    by_id: HashMap<String, usize>,
    usage: Option<Usage>,
}

impl StepAccumulator {
    fn new(run_id: Uuid, thread_id: Uuid) -> Self {
        Self {
            run_id,
            thread_id,
            message_id: Uuid::new_v4(),
            step_id: Uuid::new_v4(),
            text: String::new(),
            calls: Vec::new(),
            by_id: HashMap::new(),
            usage: None,
        }
    }

    fn push_text(&mut self, chunk: &str) {
        self.text.push_str(chunk);
    }

    fn start_call(&mut self, call_id: String, tool_name: String) {
        let idx = self.calls.len();
        self.by_id.insert(call_id.clone(), idx);
        self.calls.push(PendingCall {
            id: call_id,
            name: tool_name,
            args: String::new(),
            finished: false,
        });
    }

    /// Argument fragments arrive keyed by call id or by the provider's
    /// positional index.
    fn append_args(&mut self, key: &str, delta: &str) {
        let idx = self
            .by_id
            .get(key)
            .copied()
            .or_else(|| key.parse::<usize>().ok().filter(|i| *i < self.calls.len()));
        match idx {
            Some(idx) => self.calls[idx].args.push_str(delta),
            None => tracing::warn!(key, "tool-call argument fragment for unknown call"),
        }
    }

    fn finish_call(&mut self, call_id: String, tool_name: String, arguments: Value) {
        match self.by_id.get(&call_id).copied() {
            Some(idx) => {
                let call = &mut self.calls[idx];
                call.args = arguments.to_string();
                call.finished = true;
            }
            None => {
                let idx = self.calls.len();
                self.by_id.insert(call_id.clone(), idx);
                self.calls.push(PendingCall {
                    id: call_id,
                    name: tool_name,
                    args: arguments.to_string(),
                    finished: true,
                });
            }
        }
    }

    fn record_usage(&mut self, usage: Option<Usage>) {
        if usage.is_some() {
            self.usage = usage;
        }
    }

    fn usage(&self) -> Usage {
        self.usage.unwrap_or_default()
    }

    /// A chunk-only delta message with the stable message id.
    fn delta_message(&self, chunk: &str) -> ChatMessage {
        let mut message = ChatMessage::assistant("");
        message.id = self.message_id;
        message.content = vec![ContentBlock::Text { text: chunk.to_string() }];
        message.thread_id = Some(self.thread_id);
        message.run_id = Some(self.run_id);
        message.metadata.streaming = true;
        message
    }

    fn final_message(&self) -> ChatMessage {
        let mut message = ChatMessage::assistant(self.text.clone());
        message.id = self.message_id;
        message.thread_id = Some(self.thread_id);
        message.run_id = Some(self.run_id);
        message
    }

    /// Partial tool-call step for streaming; shares the final step's id.
    fn step_snapshot(&self) -> RunStep {
        let mut step =
            RunStep::tool_calls(self.run_id, self.thread_id, self.partial_tool_calls());
        step.id = self.step_id;
        step
    }

    fn partial_tool_calls(&self) -> Vec<ToolCall> {
        self.calls
            .iter()
            .map(|c| ToolCall::function(c.id.clone(), c.name.clone(), c.args.clone()))
            .collect()
    }

    /// Final assembly. Fragments that never finished still count; empty
    /// or malformed argument buffers default to an empty object.
    fn assembled_tool_calls(&self) -> Vec<ToolCall> {
        self.calls
            .iter()
            .map(|c| {
                let args = if c.args.trim().is_empty() {
                    "{}".to_string()
                } else if serde_json::from_str::<Value>(&c.args).is_ok() {
                    c.args.clone()
                } else {
                    tracing::warn!(
                        call_id = %c.id,
                        tool = %c.name,
                        "tool call arguments are not valid JSON; defaulting to empty object"
                    );
                    "{}".to_string()
                };
                ToolCall::function(c.id.clone(), c.name.clone(), args)
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_assembles_indexed_fragments() {
        let mut acc = StepAccumulator::new(Uuid::new_v4(), Uuid::new_v4());
        acc.start_call("call_1".into(), "web_browser".into());
        acc.append_args("0", r#"{"url":"#);
        acc.append_args("call_1", r#""https://example.com"}"#);

        let calls = acc.assembled_tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, r#"{"url":"https://example.com"}"#);
    }

    #[test]
    fn accumulator_finish_overrides_fragments() {
        let mut acc = StepAccumulator::new(Uuid::new_v4(), Uuid::new_v4());
        acc.start_call("call_1".into(), "t".into());
        acc.append_args("call_1", "partial");
        acc.finish_call(
            "call_1".into(),
            "t".into(),
            serde_json::json!({"x": 1}),
        );
        let calls = acc.assembled_tool_calls();
        assert_eq!(calls[0].arguments, r#"{"x":1}"#);
    }

    #[test]
    fn accumulator_defaults_malformed_args_to_empty_object() {
        let mut acc = StepAccumulator::new(Uuid::new_v4(), Uuid::new_v4());
        acc.start_call("call_1".into(), "t".into());
        acc.append_args("call_1", "not json");
        assert_eq!(acc.assembled_tool_calls()[0].arguments, "{}");

        let mut empty = StepAccumulator::new(Uuid::new_v4(), Uuid::new_v4());
        empty.start_call("call_2".into(), "t".into());
        assert_eq!(empty.assembled_tool_calls()[0].arguments, "{}");
    }

    #[test]
    fn accumulator_ids_stable_across_snapshots() {
        let mut acc = StepAccumulator::new(Uuid::new_v4(), Uuid::new_v4());
        acc.push_text("Hello");
        let delta = acc.delta_message(" world");
        acc.push_text(" world");
        let final_msg = acc.final_message();
        assert_eq!(delta.id, final_msg.id);
        assert_eq!(final_msg.text(), "Hello world");

        acc.start_call("c1".into(), "t".into());
        assert_eq!(acc.step_snapshot().id, acc.step_id);
    }

    #[test]
    fn unknown_fragment_key_is_dropped() {
        let mut acc = StepAccumulator::new(Uuid::new_v4(), Uuid::new_v4());
        acc.append_args("7", "ignored");
        assert!(acc.assembled_tool_calls().is_empty());
    }
}
