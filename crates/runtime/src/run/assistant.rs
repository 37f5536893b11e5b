//! Hosted-assistant flavor — the delegated loop.
//!
//! The step loop runs on the remote service; this side mirrors the user
//! message into the remote thread, consumes the normalized event
//! stream, and answers each `requires_action` by running the submitted
//! tool calls locally and posting their string outputs back. Enriched
//! tool calls are buffered through the handler so structured outputs
//! can be spliced into the step the remote service reports with strings
//! only.

use std::sync::Arc;

use futures_util::StreamExt;

use relay_domain::error::{Error, Result};
use relay_domain::event::AssistantEvent;
use relay_domain::message::ChatMessage;
use relay_providers::{AssistantService, RemoteEvent, RemoteRunParams};
use relay_stores::{DataSourceStore, ThreadStore};
use relay_tools::ToolRegistry;

use crate::context::RunContext;
use crate::events::EventHandler;
use crate::tool_runner::ToolRunner;

use super::LoopOutcome;

pub(crate) struct AssistantRunner {
    pub ctx: Arc<RunContext>,
    pub service: Arc<dyn AssistantService>,
    pub registry: ToolRegistry,
    pub handler: Arc<EventHandler>,
    pub threads: Arc<dyn ThreadStore>,
    pub data_sources: Arc<dyn DataSourceStore>,
}

impl AssistantRunner {
    pub async fn execute(
        &self,
        user_message: &ChatMessage,
    ) -> Result<(LoopOutcome, Option<String>)> {
        let remote_thread_id = self.ensure_remote_thread().await?;
        self.mirror_user_message(&remote_thread_id, user_message).await?;

        let config = &self.ctx.agent_config;
        let mut tools = self.registry.assistant_tools(&config.toolkits);
        if let Some(store_id) = &config.file_search_store {
            // Attach the vector store to the file_search marker.
            for tool in tools.iter_mut() {
                if tool["type"] == "file_search" {
                    tool["file_search"] = serde_json::json!({"vector_store_ids": [store_id]});
                }
            }
        }

        let params = RemoteRunParams {
            local_run_id: self.ctx.run_id,
            local_thread_id: self.ctx.thread_id,
            assistant_id: None,
            model: config.model.clone(),
            instructions: config.render_instructions(),
            tools,
            temperature: config.temperature,
            tool_choice: config.tool_choice.clone(),
        };

        let runner = ToolRunner::new(self.registry.clone());
        let mut stream = self.service.stream_run(&remote_thread_id, &params).await?;
        let mut remote_run_id: Option<String> = None;

        loop {
            let mut pending_action = None;

            while let Some(event) = stream.next().await {
                match event? {
                    RemoteEvent::RunStarted { run_id } => {
                        remote_run_id = Some(run_id);
                    }
                    RemoteEvent::Assistant(AssistantEvent::RequiresAction { tool_calls }) => {
                        self.handler
                            .handle(AssistantEvent::RequiresAction {
                                tool_calls: tool_calls.clone(),
                            })
                            .await?;
                        pending_action = Some(tool_calls);
                        break;
                    }
                    RemoteEvent::Assistant(event) => {
                        let terminal = event.is_terminal();
                        self.handler.handle(event).await?;
                        if terminal {
                            break;
                        }
                    }
                }
            }

            let terminal = self.handler.terminal();
            if let Some(error) = terminal.failed {
                return Err(Error::Provider { provider: "assistant".into(), message: error });
            }
            if terminal.cancelled {
                return Ok((LoopOutcome::Cancelled, remote_run_id));
            }
            if terminal.completed {
                return Ok((LoopOutcome::Completed, remote_run_id));
            }

            let Some(tool_calls) = pending_action else {
                // Stream closed without a terminal event; the remote
                // service is trusted, so treat a clean close as done.
                tracing::warn!(run_id = %self.ctx.run_id, "remote stream ended without terminal event");
                return Ok((LoopOutcome::Completed, remote_run_id));
            };

            // Poll point: before dispatching tools / resuming the remote run.
            if self.ctx.is_stop_requested() {
                self.cancel_remote(&remote_thread_id, remote_run_id.as_deref()).await;
                return Ok((LoopOutcome::Cancelled, remote_run_id));
            }

            let mut outputs: Vec<(String, String)> = Vec::with_capacity(tool_calls.len());
            for call in &tool_calls {
                if self.ctx.is_stop_requested() {
                    self.cancel_remote(&remote_thread_id, remote_run_id.as_deref()).await;
                    return Ok((LoopOutcome::Cancelled, remote_run_id));
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
                    // Terminate locally; the dangling remote run is
                    // cancelled so it cannot keep producing events.
                    self.cancel_remote(&remote_thread_id, remote_run_id.as_deref()).await;
                    return Ok((LoopOutcome::Completed, remote_run_id));
                }
                outputs.push((call.id.clone(), result.output_string));
            }

            let run_id = remote_run_id.clone().ok_or_else(|| Error::Provider {
                provider: "assistant".into(),
                message: "requires_action before the remote run id was announced".into(),
            })?;
            stream = self
                .service
                .submit_tool_outputs(&remote_thread_id, &run_id, &params, &outputs)
                .await?;
        }
    }

    /// Fetch or create the remote thread handle and persist it back.
    async fn ensure_remote_thread(&self) -> Result<String> {
        let mut thread = self
            .threads
            .get_or_create(self.ctx.thread_id, self.ctx.tenant_id.as_deref(), &[])
            .await?;
        if let Some(external_id) = thread.external_id {
            return Ok(external_id);
        }
        let external_id = self.service.create_thread().await?;
        thread.external_id = Some(external_id.clone());
        thread.modified_at = chrono::Utc::now();
        self.threads.save(&thread).await?;
        Ok(external_id)
    }

    /// Mirror the user message and its attachments into the remote
    /// thread. Attachments resolve through the data-source store; a
    /// missing file is skipped, not fatal.
    async fn mirror_user_message(
        &self,
        remote_thread_id: &str,
        message: &ChatMessage,
    ) -> Result<()> {
        let mut remote_files = Vec::new();
        for attachment in &message.metadata.attachments {
            match self.data_sources.get(&attachment.file_id).await? {
                Some((source, bytes)) => {
                    let name = source
                        .file_name
                        .clone()
                        .unwrap_or_else(|| attachment.file_id.clone());
                    let remote_id = self.service.upload_file(bytes, &name).await?;
                    remote_files.push((remote_id, attachment.kind));
                }
                None => {
                    tracing::warn!(file_id = %attachment.file_id, "attachment not found; skipping mirror");
                }
            }
        }
        self.service
            .add_message(remote_thread_id, message, &remote_files)
            .await?;
        Ok(())
    }

    async fn cancel_remote(&self, remote_thread_id: &str, remote_run_id: Option<&str>) {
        let Some(run_id) = remote_run_id else {
            return;
        };
        if let Err(e) = self.service.cancel_run(remote_thread_id, run_id).await {
            tracing::warn!(
                run_id = %self.ctx.run_id,
                remote_run_id = %run_id,
                error = %e,
                "failed to cancel in-flight remote run"
            );
        }
    }
}
