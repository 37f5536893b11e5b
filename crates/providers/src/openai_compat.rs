//! OpenAI-compatible chat-completions adapter.
//!
//! Works with any endpoint that follows the OpenAI chat completions
//! contract. Tool-call carrier messages from memory are expanded into
//! the assistant + tool wire messages the API expects, so replayed
//! history round-trips through the provider unchanged.

use futures_util::StreamExt;
use serde_json::Value;

use relay_domain::error::{Error, Result};
use relay_domain::message::{ChatMessage, Role, ToolCall, ToolDefinition};
use relay_domain::run::Usage;
use relay_domain::stream::{BoxStream, StreamEvent};

use crate::sse::{sse_stream, SseEvent};
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use crate::util::from_reqwest;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        id: impl Into<String>,
        base_url: &str,
        api_key: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            id: id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            default_model: default_model.into(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().flat_map(msg_to_wire).collect();

        let mut body = serde_json::json!({
            "model": self.effective_model(req),
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] =
                Value::String(req.tool_choice.clone().unwrap_or_else(|| "auto".into()));
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Expand one domain message into wire messages.
///
/// A tool-call carrier becomes the assistant message (with `tool_calls`)
/// followed by one `tool` message per executed call, so the model sees
/// its own calls and their outputs on the next request.
fn msg_to_wire(msg: &ChatMessage) -> Vec<Value> {
    let tool_calls = msg.tool_calls();
    if msg.role == Role::Assistant && !tool_calls.is_empty() {
        let mut out = Vec::with_capacity(1 + tool_calls.len());

        let calls: Vec<Value> = tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments,
                    }
                })
            })
            .collect();

        let text = msg.text();
        out.push(serde_json::json!({
            "role": "assistant",
            "content": if text.is_empty() { Value::Null } else { Value::String(text) },
            "tool_calls": calls,
        }));

        for tc in tool_calls {
            out.push(serde_json::json!({
                "role": "tool",
                "tool_call_id": tc.id,
                "content": tc.output.clone().unwrap_or_default(),
            }));
        }
        return out;
    }

    vec![serde_json::json!({
        "role": role_to_str(msg.role),
        "content": msg.text(),
    })]
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(provider: &str, body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.into(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Provider {
        provider: provider.into(),
        message: "no message in choice".into(),
    })?;

    Ok(ChatResponse {
        content: message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        tool_calls: parse_wire_tool_calls(message),
        usage: body.get("usage").and_then(parse_wire_usage),
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        finish_reason: choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}

fn parse_wire_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let name = func.get("name")?.as_str()?.to_string();
            let arguments = func
                .get("arguments")
                .and_then(|v| v.as_str())
                .unwrap_or("{}")
                .to_string();
            Some(ToolCall::function(id, name, arguments))
        })
        .collect()
}

fn parse_wire_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE streaming helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_stream_data(data: &str) -> Vec<Result<StreamEvent>> {
    if data.trim() == "[DONE]" {
        return vec![Ok(StreamEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        })];
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    // Usage-only chunk (stream_options.include_usage).
    let Some(choice) = choice else {
        if let Some(usage) = v.get("usage").and_then(parse_wire_usage) {
            return vec![Ok(StreamEvent::Done {
                usage: Some(usage),
                finish_reason: None,
            })];
        }
        return Vec::new();
    };

    let delta = choice.get("delta").unwrap_or(&Value::Null);
    let mut events = Vec::new();

    // Tool call fragments. The first fragment of a call carries an id
    // and name; argument fragments are keyed by the positional index.
    if let Some(tc_arr) = delta.get("tool_calls").and_then(|t| t.as_array()) {
        for tc in tc_arr {
            let idx = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0);

            if let Some(id) = tc.get("id").and_then(|i| i.as_str()) {
                let name = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or("");
                events.push(Ok(StreamEvent::ToolCallStarted {
                    call_id: id.to_string(),
                    tool_name: name.to_string(),
                }));
            }

            if let Some(args) = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|a| a.as_str())
            {
                if !args.is_empty() {
                    events.push(Ok(StreamEvent::ToolCallDelta {
                        call_id: idx.to_string(),
                        delta: args.to_string(),
                    }));
                }
            }
        }
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::Token {
                text: text.to_string(),
            }));
        }
    }

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        events.push(Ok(StreamEvent::Done {
            usage: v.get("usage").and_then(parse_wire_usage),
            finish_reason: Some(fr.to_string()),
        }));
    }

    events
}

/// Guarantee the stream ends with a `Done` even when the endpoint closes
/// the body without the `[DONE]` sentinel.
fn with_done_fallback(
    inner: BoxStream<'static, Result<StreamEvent>>,
) -> BoxStream<'static, Result<StreamEvent>> {
    let stream = async_stream::stream! {
        let mut inner = inner;
        let mut done_emitted = false;
        while let Some(event) = inner.next().await {
            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                done_emitted = true;
            }
            yield event;
        }
        if !done_emitted {
            yield Ok(StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) });
        }
    };
    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, false);

        tracing::debug!(provider = %self.id, url = %url, "chat request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), resp_text),
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_chat_response(&self.id, &resp_json)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, true);

        tracing::debug!(provider = %self.id, url = %url, "chat stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        let inner = sse_stream(resp, |event: &SseEvent| parse_stream_data(&event.data));
        Ok(with_done_fallback(inner))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiCompatProvider {
        OpenAiCompatProvider::new("openai", "https://api.test/v1", "sk-test", "gpt-4o-mini")
            .unwrap()
    }

    #[test]
    fn body_includes_tool_choice_only_with_tools() {
        let p = provider();
        let mut req = ChatRequest::default();
        req.messages.push(ChatMessage::user("hi"));
        let body = p.build_chat_body(&req, false);
        assert!(body.get("tool_choice").is_none());

        req.tools.push(ToolDefinition {
            name: "web_browser".into(),
            description: "fetch".into(),
            parameters: serde_json::json!({"type": "object"}),
        });
        let body = p.build_chat_body(&req, false);
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["function"]["name"], "web_browser");
    }

    #[test]
    fn tool_choice_override_forwarded() {
        let p = provider();
        let mut req = ChatRequest::default();
        req.tools.push(ToolDefinition {
            name: "t".into(),
            description: String::new(),
            parameters: serde_json::json!({}),
        });
        req.tool_choice = Some("required".into());
        let body = p.build_chat_body(&req, false);
        assert_eq!(body["tool_choice"], "required");
    }

    #[test]
    fn carrier_message_expands_to_assistant_plus_tool_messages() {
        let mut tc = ToolCall::function("call_1", "web_browser", r#"{"url":"x"}"#);
        tc.output = Some("page text".into());
        let msg = ChatMessage::tool_call_carrier("thinking", vec![tc]);

        let wire = msg_to_wire(&msg);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0]["role"], "assistant");
        assert_eq!(wire[0]["tool_calls"][0]["id"], "call_1");
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call_1");
        assert_eq!(wire[1]["content"], "page text");
    }

    #[test]
    fn plain_messages_map_one_to_one() {
        let wire = msg_to_wire(&ChatMessage::user("hello"));
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[0]["content"], "hello");
    }

    #[test]
    fn stream_parse_token_delta() {
        let events =
            parse_stream_data(r#"{"choices":[{"delta":{"content":"Hel"},"index":0}]}"#);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Token { text } if text == "Hel"
        ));
    }

    #[test]
    fn stream_parse_tool_call_start_and_delta() {
        let started = parse_stream_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"web_browser","arguments":""}}]}}]}"#,
        );
        assert!(matches!(
            started[0].as_ref().unwrap(),
            StreamEvent::ToolCallStarted { call_id, tool_name }
                if call_id == "call_1" && tool_name == "web_browser"
        ));

        let delta = parse_stream_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"url\""}}]}}]}"#,
        );
        assert!(matches!(
            delta[0].as_ref().unwrap(),
            StreamEvent::ToolCallDelta { call_id, delta } if call_id == "0" && delta == "{\"url\""
        ));
    }

    #[test]
    fn stream_parse_finish_reason() {
        let events = parse_stream_data(
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        );
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Done { finish_reason: Some(fr), .. } if fr == "tool_calls"
        ));
    }

    #[test]
    fn stream_parse_usage_only_chunk() {
        let events = parse_stream_data(
            r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15}}"#,
        );
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Done { usage: Some(u), .. } if u.total_tokens == 15
        ));
    }

    #[test]
    fn stream_parse_done_sentinel() {
        let events = parse_stream_data("[DONE]");
        assert!(matches!(events[0].as_ref().unwrap(), StreamEvent::Done { .. }));
    }

    #[test]
    fn full_response_parse() {
        let body = serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "web_browser", "arguments": "{\"url\":\"https://example.com\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 20, "completion_tokens": 10, "total_tokens": 30}
        });
        let resp = parse_chat_response("openai", &body).unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "web_browser");
        assert_eq!(resp.usage.unwrap().total_tokens, 30);
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
    }
}
