//! Event handler — consumes the unified event taxonomy from either
//! backend, translates to domain messages, streams frames, and persists
//! through runtime memory.
//!
//! The handler keeps two per-run buffers: the ordered step record that
//! becomes `Run.steps`, and the enriched tool-call side buffer used to
//! splice structured outputs into steps when the backend reports only
//! strings (the hosted service does).

use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use relay_domain::error::Result;
use relay_domain::event::{AssistantEvent, FrameMessageType};
use relay_domain::message::{
    AttachmentKind, ChatMessage, ContentBlock, MessageKind, Role, ToolCall,
};
use relay_domain::run::{RunStep, StepDetails, StepStatus, Usage};
use relay_providers::AssistantService;
use relay_stores::{DataSourceStore, MessageStore};

use crate::context::RunContext;
use crate::dispatch::Dispatcher;
use crate::memory::RuntimeMemory;

/// Terminal outcome recorded by the handler for the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct TerminalState {
    pub completed: bool,
    pub cancelled: bool,
    pub failed: Option<String>,
    pub reported_usage: Option<Usage>,
}

pub struct EventHandler {
    ctx: Arc<RunContext>,
    dispatcher: Arc<Dispatcher>,
    memory: Arc<RuntimeMemory>,
    data_sources: Arc<dyn DataSourceStore>,
    message_store: Arc<dyn MessageStore>,
    /// Present for hosted runs; used to pull remote image bytes.
    assistant: Option<Arc<dyn AssistantService>>,
    steps: Mutex<Vec<RunStep>>,
    tool_buffer: Mutex<Vec<ToolCall>>,
    terminal: Mutex<TerminalState>,
}

impl EventHandler {
    pub fn new(
        ctx: Arc<RunContext>,
        dispatcher: Arc<Dispatcher>,
        memory: Arc<RuntimeMemory>,
        data_sources: Arc<dyn DataSourceStore>,
        message_store: Arc<dyn MessageStore>,
        assistant: Option<Arc<dyn AssistantService>>,
    ) -> Self {
        Self {
            ctx,
            dispatcher,
            memory,
            data_sources,
            message_store,
            assistant,
            steps: Mutex::new(Vec::new()),
            tool_buffer: Mutex::new(Vec::new()),
            terminal: Mutex::new(TerminalState::default()),
        }
    }

    /// Ordered steps recorded so far; becomes `Run.steps` at the end.
    pub fn steps(&self) -> Vec<RunStep> {
        self.steps.lock().clone()
    }

    pub fn terminal(&self) -> TerminalState {
        self.terminal.lock().clone()
    }

    /// Buffer an enriched tool call for splicing into the next StepDone.
    pub fn buffer_tool_call(&self, tool_call: ToolCall) {
        self.ctx.scratch.push_tool_call(tool_call.clone());
        self.tool_buffer.lock().push(tool_call);
    }

    pub async fn handle(&self, event: AssistantEvent) -> Result<()> {
        match event {
            AssistantEvent::MessageDelta { message } => self.on_message_delta(message).await,
            AssistantEvent::MessageDone { message } => self.on_message_done(message).await,
            AssistantEvent::StepDelta { step } => self.on_step_delta(step).await,
            AssistantEvent::StepDone { step } => self.on_step_done(step).await,
            AssistantEvent::ToolCallDone { tool_call } => {
                self.on_tool_call_done(tool_call).await
            }
            AssistantEvent::ImageFile { file_id } => self.on_image_file(&file_id).await,
            AssistantEvent::RequiresAction { tool_calls } => {
                // The orchestrator drives the tool round trip; the
                // handler only logs the action for the run record.
                self.dispatcher.dispatch_action(serde_json::json!({
                    "action": "requires_action",
                    "tool_calls": tool_calls.len(),
                }));
                Ok(())
            }
            AssistantEvent::Completed { usage } => {
                let mut terminal = self.terminal.lock();
                terminal.completed = true;
                terminal.reported_usage = usage;
                Ok(())
            }
            AssistantEvent::Failed { error } => {
                self.ctx.scratch.push_error(error.clone());
                self.terminal.lock().failed = Some(error);
                Ok(())
            }
            AssistantEvent::Cancelled => {
                self.terminal.lock().cancelled = true;
                Ok(())
            }
        }
    }

    // ── Deltas ──────────────────────────────────────────────────────

    async fn on_message_delta(&self, message: ChatMessage) -> Result<()> {
        self.dispatcher
            .send_stream(&message, FrameMessageType::Message, true, false)
            .await;
        Ok(())
    }

    async fn on_step_delta(&self, step: RunStep) -> Result<()> {
        // Only tool-call assembly is streamed; message steps already
        // stream through message deltas.
        if let StepDetails::ToolCalls { .. } = &step.details {
            let message = step_to_carrier_message(&step, true);
            self.dispatcher
                .send_stream(&message, FrameMessageType::ToolCall, true, false)
                .await;
        }
        Ok(())
    }

    // ── Finals ──────────────────────────────────────────────────────

    async fn on_message_done(&self, message: ChatMessage) -> Result<()> {
        // The initiating user message is already in memory; the hosted
        // service echoes it back with a remote id.
        if message.role == Role::User {
            return Ok(());
        }
        let mut message = message;
        message.metadata.streaming = false;
        let has_image = message
            .content
            .iter()
            .any(|b| matches!(b, ContentBlock::ImageRef { .. }));
        if has_image {
            message.metadata.kind = MessageKind::Image;
        }

        self.ctx.scratch.push_message(message.clone());
        self.memory.put(message.clone(), true).await?;

        let message_type = if has_image {
            FrameMessageType::Image
        } else {
            FrameMessageType::Message
        };
        self.dispatcher
            .send_stream(&message, message_type, false, false)
            .await;
        Ok(())
    }

    async fn on_tool_call_done(&self, tool_call: ToolCall) -> Result<()> {
        self.dispatcher.dispatch_action(serde_json::json!({
            "action": "tool_call_done",
            "tool_call_id": tool_call.id,
            "tool_name": tool_call.name,
        }));
        self.buffer_tool_call(tool_call);
        Ok(())
    }

    async fn on_step_done(&self, step: RunStep) -> Result<()> {
        let mut step = step;
        if step.completed_at.is_none() {
            step.finish(StepStatus::Completed);
        }

        if let StepDetails::ToolCalls { .. } = &step.details {
            // Splice buffered enriched calls into the step snapshot.
            let buffered = std::mem::take(&mut *self.tool_buffer.lock());
            for enriched in &buffered {
                if !step.patch_tool_call(enriched) {
                    tracing::debug!(
                        tool_call_id = %enriched.id,
                        "buffered tool output had no matching call in step"
                    );
                }
            }

            // The assistant message that carries the tool-call list in
            // its metadata; visible to the next model request.
            let carrier = step_to_carrier_message(&step, false);
            self.memory.put(carrier.clone(), true).await?;
            self.dispatcher
                .send_stream(&carrier, FrameMessageType::ToolCall, false, true)
                .await;
        }

        self.steps.lock().push(step);
        Ok(())
    }

    /// Hosted code-interpreter image: pull bytes from the remote
    /// service, persist through the data-source store, splice the URL
    /// into already-persisted messages, and announce the image.
    async fn on_image_file(&self, file_id: &str) -> Result<()> {
        let Some(assistant) = &self.assistant else {
            tracing::debug!(file_id, "image event without assistant service; skipping fetch");
            return Ok(());
        };

        let bytes = assistant.get_file(file_id).await?;
        let data_source = self
            .data_sources
            .save_file(
                bytes,
                Some(format!("{file_id}.png")),
                Some("image/png".into()),
                AttachmentKind::Image,
            )
            .await?;

        let updated = self
            .message_store
            .update_tool_calls(self.ctx.thread_id, file_id, &data_source)
            .await?;
        tracing::debug!(file_id, updated, "spliced image URL into persisted messages");

        self.dispatcher.dispatch_action(serde_json::json!({
            "action": "image_saved",
            "file_id": file_id,
            "data_source_id": data_source.id,
            "url": data_source.url,
        }));
        Ok(())
    }
}

/// Build the assistant message that carries a tool-call step in its
/// metadata. Delta carriers keep `streaming = true` so receivers merge
/// by id.
fn step_to_carrier_message(step: &RunStep, streaming: bool) -> ChatMessage {
    let tool_calls = step.step_tool_calls().to_vec();
    let mut message = ChatMessage::tool_call_carrier("", tool_calls);
    // Derive the carrier id from the step id: stable across delta and
    // final snapshots of the same step.
    message.id = Uuid::new_v5(&Uuid::NAMESPACE_OID, step.id.as_bytes());
    message.thread_id = Some(step.thread_id);
    message.run_id = Some(step.run_id);
    message.metadata.streaming = streaming;
    message
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ChannelManager, ConnectionManager};
    use relay_domain::agent::AgentConfig;
    use relay_domain::event::FrameEvent;
    use relay_stores::{InMemoryDataSourceStore, InMemoryMessageStore};

    struct Fixture {
        handler: EventHandler,
        memory: Arc<RuntimeMemory>,
        manager: Arc<ChannelManager>,
        ctx: Arc<RunContext>,
    }

    fn fixture() -> Fixture {
        let ctx = Arc::new(RunContext::new(
            "ch1",
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            AgentConfig::default_agent(),
        ));
        let manager = Arc::new(ChannelManager::new());
        let dispatcher = Arc::new(Dispatcher::new(&ctx, manager.clone()));
        let message_store = Arc::new(InMemoryMessageStore::new());
        let memory = Arc::new(RuntimeMemory::new(ctx.thread_id, message_store.clone()));
        let handler = EventHandler::new(
            ctx.clone(),
            dispatcher,
            memory.clone(),
            Arc::new(InMemoryDataSourceStore::new()),
            message_store,
            None,
        );
        Fixture { handler, memory, manager, ctx }
    }

    #[tokio::test]
    async fn message_done_persists_and_streams() {
        let f = fixture();
        let (_id, mut rx) = f.manager.connect("ch1").await;
        f.memory.load().await.unwrap();

        let msg = ChatMessage::assistant("final answer").with_run(f.ctx.run_id);
        f.handler
            .handle(AssistantEvent::MessageDone { message: msg.clone() })
            .await
            .unwrap();

        assert_eq!(f.memory.list(None).await.len(), 1);
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.event, FrameEvent::Message);
        assert!(!frame.streaming);
    }

    #[tokio::test]
    async fn user_echo_from_remote_is_ignored() {
        let f = fixture();
        f.memory.load().await.unwrap();
        f.handler
            .handle(AssistantEvent::MessageDone { message: ChatMessage::user("echo") })
            .await
            .unwrap();
        assert!(f.memory.list(None).await.is_empty());
    }

    #[tokio::test]
    async fn step_done_splices_buffered_outputs_and_persists_carrier() {
        let f = fixture();
        f.memory.load().await.unwrap();

        let call = ToolCall::function("call_1", "web_browser", r#"{"url":"https://example.com"}"#);
        let step = RunStep::tool_calls(f.ctx.run_id, f.ctx.thread_id, vec![call.clone()]);

        let mut enriched = call;
        enriched.output = Some("page text".into());
        enriched.structured_output = Some(serde_json::json!({"status": 200}));
        f.handler
            .handle(AssistantEvent::ToolCallDone { tool_call: enriched })
            .await
            .unwrap();

        f.handler
            .handle(AssistantEvent::StepDone { step })
            .await
            .unwrap();

        let steps = f.handler.steps();
        assert_eq!(steps.len(), 1);
        let spliced = &steps[0].step_tool_calls()[0];
        assert_eq!(spliced.output.as_deref(), Some("page text"));
        assert!(spliced.structured_output.is_some());

        // The carrier message landed in memory with the tool-call list.
        let last = f.memory.last().await.unwrap();
        assert_eq!(last.metadata.kind, MessageKind::ToolCall);
        assert_eq!(last.tool_calls().len(), 1);
        assert_eq!(last.tool_calls()[0].output.as_deref(), Some("page text"));

        // Enriched calls were mirrored into scratch for the hosted path.
        assert_eq!(f.ctx.scratch.take_tool_calls().len(), 1);
    }

    #[tokio::test]
    async fn carrier_id_is_stable_across_delta_and_final() {
        let run_id = Uuid::new_v4();
        let thread_id = Uuid::new_v4();
        let step = RunStep::tool_calls(run_id, thread_id, vec![]);
        let delta = step_to_carrier_message(&step, true);
        let done = step_to_carrier_message(&step, false);
        assert_eq!(delta.id, done.id);
        assert!(delta.metadata.streaming);
        assert!(!done.metadata.streaming);
    }

    #[tokio::test]
    async fn terminal_events_are_recorded() {
        let f = fixture();
        f.handler
            .handle(AssistantEvent::Completed {
                usage: Some(Usage { prompt_tokens: 1, completion_tokens: 2, total_tokens: 3 }),
            })
            .await
            .unwrap();
        let terminal = f.handler.terminal();
        assert!(terminal.completed);
        assert_eq!(terminal.reported_usage.unwrap().total_tokens, 3);

        f.handler
            .handle(AssistantEvent::Failed { error: "boom".into() })
            .await
            .unwrap();
        assert_eq!(f.handler.terminal().failed.as_deref(), Some("boom"));
        assert_eq!(f.ctx.scratch.errors(), vec!["boom".to_string()]);
    }

    #[tokio::test]
    async fn message_with_image_block_is_typed_image() {
        let f = fixture();
        let (_id, mut rx) = f.manager.connect("ch1").await;
        f.memory.load().await.unwrap();

        let mut msg = ChatMessage::assistant("chart below");
        msg.content.push(ContentBlock::ImageRef { file_id: "f1".into(), url: None });
        f.handler
            .handle(AssistantEvent::MessageDone { message: msg })
            .await
            .unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.message_type, FrameMessageType::Image);
        let stored = f.memory.last().await.unwrap();
        assert_eq!(stored.metadata.kind, MessageKind::Image);
    }
}
