//! Hosted-assistant service adapter.
//!
//! The hosted flavor delegates the step loop to a remote stateful
//! assistant service that owns threads and runs. This module defines the
//! [`AssistantService`] trait the orchestrator consumes and the
//! OpenAI-assistants-shaped reference implementation.
//!
//! Remote wire events are normalized into the domain [`AssistantEvent`]
//! taxonomy here, at the adapter boundary. The orchestrator never sees
//! remote event names; the only adapter-level addition is
//! [`RemoteEvent::RunStarted`], which carries the remote run id needed
//! for submit-tool-outputs and cancellation.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use relay_domain::error::{Error, Result};
use relay_domain::event::AssistantEvent;
use relay_domain::message::{
    AttachmentKind, ChatMessage, ContentBlock, Role, ToolCall, ToolCallKind,
};
use relay_domain::run::{RunStep, StepStatus, Usage};
use relay_domain::stream::BoxStream;

use crate::sse::{sse_stream, SseEvent};
use crate::util::from_reqwest;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parameters for opening a streaming remote run.
#[derive(Debug, Clone)]
pub struct RemoteRunParams {
    /// Local identifiers stamped onto normalized steps and messages.
    pub local_run_id: Uuid,
    pub local_thread_id: Uuid,
    /// Optional persistent assistant handle; unset when run parameters
    /// are passed inline.
    pub assistant_id: Option<String>,
    pub model: String,
    pub instructions: String,
    /// Resolved tool schemas in the remote service's wire format.
    pub tools: Vec<Value>,
    pub temperature: f32,
    pub tool_choice: String,
}

/// An event from the remote run stream.
#[derive(Debug, Clone)]
pub enum RemoteEvent {
    /// The remote run exists; carries the remote run id.
    RunStarted { run_id: String },
    /// A normalized domain event.
    Assistant(AssistantEvent),
}

/// The surface of a hosted assistant service: remote threads, messages,
/// files, and streaming runs with a tool-output round trip.
#[async_trait]
pub trait AssistantService: Send + Sync {
    /// Create a remote thread and return its handle.
    async fn create_thread(&self) -> Result<String>;

    /// Mirror a user message (and its attachments) into the remote
    /// thread. `file_ids` are remote file handles previously uploaded.
    async fn add_message(
        &self,
        thread_id: &str,
        message: &ChatMessage,
        file_ids: &[(String, AttachmentKind)],
    ) -> Result<String>;

    /// Upload bytes and return the remote file handle.
    async fn upload_file(&self, bytes: Vec<u8>, name: &str) -> Result<String>;

    /// Download the content of a remote file (code-interpreter images).
    async fn get_file(&self, file_id: &str) -> Result<Vec<u8>>;

    /// Open a streaming run against the remote thread.
    async fn stream_run(
        &self,
        thread_id: &str,
        params: &RemoteRunParams,
    ) -> Result<BoxStream<'static, Result<RemoteEvent>>>;

    /// Submit tool outputs for a run in `requires_action`; the returned
    /// stream continues the run.
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        params: &RemoteRunParams,
        outputs: &[(String, String)],
    ) -> Result<BoxStream<'static, Result<RemoteEvent>>>;

    /// Cancel an in-flight remote run.
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reference implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiAssistantService {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiAssistantService {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("OpenAI-Beta", "assistants=v2")
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        let resp = self.post(path).json(&body).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Provider {
                provider: "assistant".into(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn open_event_stream(
        &self,
        path: &str,
        body: Value,
        params: &RemoteRunParams,
    ) -> Result<BoxStream<'static, Result<RemoteEvent>>> {
        let resp = self.post(path).json(&body).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: "assistant".into(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }

        let ctx = RemoteParseContext {
            local_run_id: params.local_run_id,
            local_thread_id: params.local_thread_id,
        };
        Ok(sse_stream(resp, move |event: &SseEvent| {
            parse_remote_event(event, &ctx)
        }))
    }

    fn run_body(&self, params: &RemoteRunParams, stream: bool) -> Value {
        let mut body = serde_json::json!({
            "model": params.model,
            "instructions": params.instructions,
            "tools": params.tools,
            "temperature": params.temperature,
            "tool_choice": params.tool_choice,
            "stream": stream,
        });
        if let Some(assistant_id) = &params.assistant_id {
            body["assistant_id"] = Value::String(assistant_id.clone());
        }
        body
    }
}

#[async_trait]
impl AssistantService for OpenAiAssistantService {
    async fn create_thread(&self) -> Result<String> {
        let v = self.post_json("/threads", serde_json::json!({})).await?;
        v.get("id")
            .and_then(|i| i.as_str())
            .map(String::from)
            .ok_or_else(|| Error::Provider {
                provider: "assistant".into(),
                message: "thread create response missing id".into(),
            })
    }

    async fn add_message(
        &self,
        thread_id: &str,
        message: &ChatMessage,
        file_ids: &[(String, AttachmentKind)],
    ) -> Result<String> {
        // Images ride in the content array; other files become
        // attachments routed to the file_search toolkit.
        let mut content = vec![serde_json::json!({
            "type": "text",
            "text": message.text(),
        })];
        let mut attachments: Vec<Value> = Vec::new();
        for (file_id, kind) in file_ids {
            match kind {
                AttachmentKind::Image => content.push(serde_json::json!({
                    "type": "image_file",
                    "image_file": {"file_id": file_id},
                })),
                AttachmentKind::File => attachments.push(serde_json::json!({
                    "file_id": file_id,
                    "tools": [{"type": "file_search"}],
                })),
            }
        }

        let mut body = serde_json::json!({
            "role": "user",
            "content": content,
        });
        if !attachments.is_empty() {
            body["attachments"] = Value::Array(attachments);
        }

        let v = self
            .post_json(&format!("/threads/{thread_id}/messages"), body)
            .await?;
        v.get("id")
            .and_then(|i| i.as_str())
            .map(String::from)
            .ok_or_else(|| Error::Provider {
                provider: "assistant".into(),
                message: "message create response missing id".into(),
            })
    }

    async fn upload_file(&self, bytes: Vec<u8>, name: &str) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(name.to_string());
        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);
        let resp = self
            .post("/files")
            .multipart(form)
            .send()
            .await
            .map_err(from_reqwest)?;
        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Provider {
                provider: "assistant".into(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }
        let v: Value = serde_json::from_str(&text)?;
        v.get("id")
            .and_then(|i| i.as_str())
            .map(String::from)
            .ok_or_else(|| Error::Provider {
                provider: "assistant".into(),
                message: "file upload response missing id".into(),
            })
    }

    async fn get_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let resp = self
            .get(&format!("/files/{file_id}/content"))
            .send()
            .await
            .map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Provider {
                provider: "assistant".into(),
                message: format!("file content fetch failed: HTTP {}", status.as_u16()),
            });
        }
        Ok(resp.bytes().await.map_err(from_reqwest)?.to_vec())
    }

    async fn stream_run(
        &self,
        thread_id: &str,
        params: &RemoteRunParams,
    ) -> Result<BoxStream<'static, Result<RemoteEvent>>> {
        let body = self.run_body(params, true);
        self.open_event_stream(&format!("/threads/{thread_id}/runs"), body, params)
            .await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        params: &RemoteRunParams,
        outputs: &[(String, String)],
    ) -> Result<BoxStream<'static, Result<RemoteEvent>>> {
        let tool_outputs: Vec<Value> = outputs
            .iter()
            .map(|(call_id, output)| {
                serde_json::json!({"tool_call_id": call_id, "output": output})
            })
            .collect();
        let body = serde_json::json!({
            "tool_outputs": tool_outputs,
            "stream": true,
        });
        self.open_event_stream(
            &format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            body,
            params,
        )
        .await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<()> {
        self.post_json(
            &format!("/threads/{thread_id}/runs/{run_id}/cancel"),
            serde_json::json!({}),
        )
        .await?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Remote event normalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy)]
struct RemoteParseContext {
    local_run_id: Uuid,
    local_thread_id: Uuid,
}

/// Remote object ids are strings; derive a stable local uuid so delta
/// and final snapshots of the same object share an id.
fn uuid_from_remote(id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes())
}

fn parse_remote_event(event: &SseEvent, ctx: &RemoteParseContext) -> Vec<Result<RemoteEvent>> {
    if event.data.trim() == "[DONE]" {
        return Vec::new();
    }

    let data: Value = match serde_json::from_str(&event.data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let name = event.event.as_deref().unwrap_or("");
    match name {
        "thread.run.created" | "thread.run.queued" | "thread.run.in_progress" => {
            match data.get("id").and_then(|i| i.as_str()) {
                Some(run_id) if name == "thread.run.created" => {
                    vec![Ok(RemoteEvent::RunStarted { run_id: run_id.to_string() })]
                }
                _ => Vec::new(),
            }
        }

        "thread.message.delta" => parse_message_delta(&data, ctx),
        "thread.message.completed" => parse_message_completed(&data, ctx),

        "thread.run.step.delta" => parse_step(&data, ctx, false),
        "thread.run.step.completed" => parse_step(&data, ctx, true),

        "thread.run.requires_action" => parse_requires_action(&data),

        "thread.run.completed" => {
            let usage = data.get("usage").and_then(parse_remote_usage);
            vec![Ok(RemoteEvent::Assistant(AssistantEvent::Completed { usage }))]
        }
        "thread.run.failed" => {
            let error = data
                .get("last_error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("remote run failed")
                .to_string();
            vec![Ok(RemoteEvent::Assistant(AssistantEvent::Failed { error }))]
        }
        "thread.run.cancelled" | "thread.run.expired" => {
            vec![Ok(RemoteEvent::Assistant(AssistantEvent::Cancelled))]
        }

        other => {
            tracing::debug!(event = %other, "skipping unhandled remote event");
            Vec::new()
        }
    }
}

fn parse_message_delta(data: &Value, ctx: &RemoteParseContext) -> Vec<Result<RemoteEvent>> {
    let Some(remote_id) = data.get("id").and_then(|i| i.as_str()) else {
        return Vec::new();
    };
    let blocks = data
        .get("delta")
        .and_then(|d| d.get("content"))
        .map(|c| parse_content_blocks(c))
        .unwrap_or_default();

    let mut message = ChatMessage::assistant("");
    message.id = uuid_from_remote(remote_id);
    message.content = blocks;
    message.thread_id = Some(ctx.local_thread_id);
    message.run_id = Some(ctx.local_run_id);
    message.metadata.streaming = true;

    vec![Ok(RemoteEvent::Assistant(AssistantEvent::MessageDelta { message }))]
}

fn parse_message_completed(data: &Value, ctx: &RemoteParseContext) -> Vec<Result<RemoteEvent>> {
    let Some(remote_id) = data.get("id").and_then(|i| i.as_str()) else {
        return Vec::new();
    };
    let blocks = data
        .get("content")
        .map(|c| parse_content_blocks(c))
        .unwrap_or_default();

    let mut events = Vec::new();
    // Surface image blocks separately so the handler can persist bytes.
    for block in &blocks {
        if let ContentBlock::ImageRef { file_id, .. } = block {
            events.push(Ok(RemoteEvent::Assistant(AssistantEvent::ImageFile {
                file_id: file_id.clone(),
            })));
        }
    }

    let mut message = ChatMessage::assistant("");
    message.id = uuid_from_remote(remote_id);
    message.role = match data.get("role").and_then(|r| r.as_str()) {
        Some("user") => Role::User,
        _ => Role::Assistant,
    };
    message.content = blocks;
    message.thread_id = Some(ctx.local_thread_id);
    message.run_id = Some(ctx.local_run_id);

    events.push(Ok(RemoteEvent::Assistant(AssistantEvent::MessageDone { message })));
    events
}

fn parse_content_blocks(content: &Value) -> Vec<ContentBlock> {
    let Some(arr) = content.as_array() else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|block| match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => block
                .get("text")
                .and_then(|t| t.get("value"))
                .and_then(|v| v.as_str())
                .map(|text| ContentBlock::Text { text: text.to_string() }),
            Some("image_file") => block
                .get("image_file")
                .and_then(|i| i.get("file_id"))
                .and_then(|f| f.as_str())
                .map(|file_id| ContentBlock::ImageRef {
                    file_id: file_id.to_string(),
                    url: None,
                }),
            _ => None,
        })
        .collect()
}

fn parse_step(data: &Value, ctx: &RemoteParseContext, done: bool) -> Vec<Result<RemoteEvent>> {
    let Some(remote_id) = data.get("id").and_then(|i| i.as_str()) else {
        return Vec::new();
    };
    // Deltas nest step_details under "delta"; snapshots carry it flat.
    let details = data
        .get("step_details")
        .or_else(|| data.get("delta").and_then(|d| d.get("step_details")));
    let Some(details) = details else {
        return Vec::new();
    };

    let mut events = Vec::new();
    let step = match details.get("type").and_then(|t| t.as_str()) {
        Some("tool_calls") => {
            let tool_calls: Vec<ToolCall> = details
                .get("tool_calls")
                .and_then(|t| t.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|tc| parse_remote_tool_call(tc, &mut events))
                        .collect()
                })
                .unwrap_or_default();
            let mut step =
                RunStep::tool_calls(ctx.local_run_id, ctx.local_thread_id, tool_calls);
            step.id = uuid_from_remote(remote_id);
            step
        }
        Some("message_creation") => {
            let message_id = details
                .get("message_creation")
                .and_then(|m| m.get("message_id"))
                .and_then(|i| i.as_str())
                .map(uuid_from_remote)
                .unwrap_or_else(Uuid::new_v4);
            let mut step =
                RunStep::message_creation(ctx.local_run_id, ctx.local_thread_id, message_id);
            step.id = uuid_from_remote(remote_id);
            step
        }
        _ => return events,
    };

    let mut step = step;
    if let Some(usage) = data.get("usage").and_then(parse_remote_usage) {
        step.usage = usage;
    }
    if done {
        step.finish(StepStatus::Completed);
        events.push(Ok(RemoteEvent::Assistant(AssistantEvent::StepDone { step })));
    } else {
        events.push(Ok(RemoteEvent::Assistant(AssistantEvent::StepDelta { step })));
    }
    events
}

/// Parse one remote tool call. Code-interpreter image outputs are also
/// surfaced as `ImageFile` events through `extra_events`.
fn parse_remote_tool_call(
    tc: &Value,
    extra_events: &mut Vec<Result<RemoteEvent>>,
) -> Option<ToolCall> {
    let id = tc.get("id").and_then(|i| i.as_str())?.to_string();
    match tc.get("type").and_then(|t| t.as_str()) {
        Some("function") => {
            let func = tc.get("function")?;
            let name = func.get("name").and_then(|n| n.as_str()).unwrap_or("").to_string();
            let arguments = func
                .get("arguments")
                .and_then(|a| a.as_str())
                .unwrap_or("{}")
                .to_string();
            let mut call = ToolCall::function(id, name, arguments);
            call.output = func
                .get("output")
                .and_then(|o| o.as_str())
                .map(String::from);
            Some(call)
        }
        Some("code_interpreter") => {
            let ci = tc.get("code_interpreter");
            let input = ci
                .and_then(|c| c.get("input"))
                .and_then(|i| i.as_str())
                .unwrap_or("")
                .to_string();
            let outputs = ci
                .and_then(|c| c.get("outputs"))
                .cloned()
                .unwrap_or(Value::Array(Vec::new()));

            if let Some(arr) = outputs.as_array() {
                for out in arr {
                    if let Some(file_id) = out
                        .get("image")
                        .and_then(|i| i.get("file_id"))
                        .and_then(|f| f.as_str())
                    {
                        extra_events.push(Ok(RemoteEvent::Assistant(
                            AssistantEvent::ImageFile { file_id: file_id.to_string() },
                        )));
                    }
                }
            }

            let mut call = ToolCall {
                id,
                name: "code_interpreter".into(),
                arguments: serde_json::json!({ "input": input }).to_string(),
                output: None,
                structured_output: Some(outputs),
                kind: ToolCallKind::CodeInterpreter,
            };
            call.output = call
                .structured_output
                .as_ref()
                .map(|o| o.to_string());
            Some(call)
        }
        Some("file_search") => Some(ToolCall {
            id,
            name: "file_search".into(),
            arguments: "{}".into(),
            output: None,
            structured_output: tc.get("file_search").cloned(),
            kind: ToolCallKind::FileSearch,
        }),
        _ => None,
    }
}

fn parse_requires_action(data: &Value) -> Vec<Result<RemoteEvent>> {
    let tool_calls: Vec<ToolCall> = data
        .get("required_action")
        .and_then(|ra| ra.get("submit_tool_outputs"))
        .and_then(|sto| sto.get("tool_calls"))
        .and_then(|tc| tc.as_array())
        .map(|arr| {
            let mut ignored = Vec::new();
            arr.iter()
                .filter_map(|tc| parse_remote_tool_call(tc, &mut ignored))
                .collect()
        })
        .unwrap_or_default();

    vec![Ok(RemoteEvent::Assistant(AssistantEvent::RequiresAction { tool_calls }))]
}

fn parse_remote_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
