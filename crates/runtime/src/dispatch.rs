//! The dispatcher — the only sanctioned path from orchestrator and
//! handler to the outside.
//!
//! Three frame families leave on one logical channel: `stream` partials
//! and finals, one `close` on success, one `error` on failure or
//! cancellation. The terminal pair is mutually exclusive and emitted at
//! most once; the dispatcher enforces that structurally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use relay_domain::event::{EventFrame, FrameMessageType};
use relay_domain::message::ChatMessage;

use crate::connection::ConnectionManager;
use crate::context::RunContext;

pub struct Dispatcher {
    channel_id: String,
    thread_id: Uuid,
    run_id: Uuid,
    manager: Arc<dyn ConnectionManager>,
    /// Per-run action event log, cached into run metadata at persist.
    actions: Mutex<Vec<Value>>,
    terminal_sent: AtomicBool,
}

impl Dispatcher {
    pub fn new(ctx: &RunContext, manager: Arc<dyn ConnectionManager>) -> Self {
        Self {
            channel_id: ctx.channel_id.clone(),
            thread_id: ctx.thread_id,
            run_id: ctx.run_id,
            manager,
            actions: Mutex::new(Vec::new()),
            terminal_sent: AtomicBool::new(false),
        }
    }

    /// Emit a partial or final domain message. Best-effort: transport
    /// problems are logged, not raised, so a dropped subscriber never
    /// fails the run.
    pub async fn send_stream(
        &self,
        message: &ChatMessage,
        message_type: FrameMessageType,
        streaming: bool,
        patch: bool,
    ) {
        let payload = match serde_json::to_value(message) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(run_id = %self.run_id, error = %e, "failed to serialize stream message");
                return;
            }
        };
        let frame = EventFrame::stream(
            &self.channel_id,
            &self.thread_id.to_string(),
            &self.run_id.to_string(),
            payload,
            message_type,
            streaming,
            patch,
        );
        self.manager.broadcast(&self.channel_id, frame).await;
    }

    /// Emit the terminal success frame. A second terminal call (either
    /// kind) is a no-op.
    pub async fn send_close(&self) {
        if self.terminal_sent.swap(true, Ordering::AcqRel) {
            tracing::warn!(run_id = %self.run_id, "suppressing duplicate terminal frame (close)");
            return;
        }
        let frame = EventFrame::close(
            &self.channel_id,
            &self.thread_id.to_string(),
            &self.run_id.to_string(),
        );
        self.manager.broadcast(&self.channel_id, frame).await;
    }

    /// Emit the terminal failure/cancellation frame. A second terminal
    /// call (either kind) is a no-op.
    pub async fn send_error(&self, detail: &str) {
        if self.terminal_sent.swap(true, Ordering::AcqRel) {
            tracing::warn!(run_id = %self.run_id, "suppressing duplicate terminal frame (error)");
            return;
        }
        let frame = EventFrame::error(
            &self.channel_id,
            &self.thread_id.to_string(),
            &self.run_id.to_string(),
            detail,
        );
        self.manager.broadcast(&self.channel_id, frame).await;
    }

    /// Record an action event in the per-run log. Shown as actions in
    /// UIs during the run; cached into `Run.metadata.events` afterwards.
    pub fn dispatch_action(&self, event: Value) {
        self.actions.lock().push(event);
    }

    pub fn actions(&self) -> Vec<Value> {
        self.actions.lock().clone()
    }

    pub fn terminal_sent(&self) -> bool {
        self.terminal_sent.load(Ordering::Acquire)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ChannelManager;
    use relay_domain::agent::AgentConfig;
    use relay_domain::event::FrameEvent;

    fn dispatcher(manager: Arc<ChannelManager>) -> Dispatcher {
        let ctx = RunContext::new(
            "ch1",
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            AgentConfig::default_agent(),
        );
        Dispatcher::new(&ctx, manager)
    }

    #[tokio::test]
    async fn stream_then_close_in_order() {
        let manager = Arc::new(ChannelManager::new());
        let (_id, mut rx) = manager.connect("ch1").await;
        let d = dispatcher(manager);

        d.send_stream(&ChatMessage::assistant("hi"), FrameMessageType::Message, true, false)
            .await;
        d.send_close().await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event, FrameEvent::Message);
        assert!(first.streaming);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event, FrameEvent::Close);
    }

    #[tokio::test]
    async fn exactly_one_terminal_frame() {
        let manager = Arc::new(ChannelManager::new());
        let (_id, mut rx) = manager.connect("ch1").await;
        let d = dispatcher(manager);

        d.send_close().await;
        d.send_error("late failure").await;
        d.send_close().await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event, FrameEvent::Close);
        assert!(rx.try_recv().is_err());
        assert!(d.terminal_sent());
    }

    #[tokio::test]
    async fn error_terminal_excludes_close() {
        let manager = Arc::new(ChannelManager::new());
        let (_id, mut rx) = manager.connect("ch1").await;
        let d = dispatcher(manager);

        d.send_error("boom").await;
        d.send_close().await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event, FrameEvent::Error);
        assert_eq!(first.error_detail.as_deref(), Some("boom"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn action_log_accumulates() {
        let manager = Arc::new(ChannelManager::new());
        let d = dispatcher(manager);
        d.dispatch_action(serde_json::json!({"step": 1}));
        d.dispatch_action(serde_json::json!({"step": 2}));
        assert_eq!(d.actions().len(), 2);
    }
}
