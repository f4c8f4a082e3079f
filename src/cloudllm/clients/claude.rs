//! `AnthropicProvider` — Anthropic Messages API adapter.
//!
//! The Anthropic Messages API is wire-incompatible with the OpenAI chat-completions shape:
//! the system prompt is a top-level field rather than a `messages[]` entry, content is an array
//! of typed blocks, auth uses `x-api-key` instead of `Authorization: Bearer`, and `max_tokens`
//! is mandatory. This adapter translates natively rather than routing through the
//! OpenAI-compatible request builder in `common.rs`.

use crate::cloudllm::client_wrapper::{
    LLMRequest, LLMResponse, LLMStreamChunk, LLMStreamChunkStream, LLMUsage, Message,
    ProviderAdapter, ProviderError, Role, ToolCall,
};
use crate::cloudllm::clients::http_pool::get_http_client;
use futures::future::BoxFuture;
use futures_util::StreamExt;
use serde_json::{json, Value};

const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Anthropic requires `max_tokens`; the unified request leaves it optional, so a default is
/// substituted when the caller didn't specify one.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Adapter for Anthropic's `/v1/messages` endpoint.
pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, "https://api.anthropic.com/v1")
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let client = get_http_client(&base_url);
        Self {
            api_key: api_key.into(),
            base_url,
            client,
        }
    }

    fn build_request(&self, req: &LLMRequest) -> Value {
        let system: String = req
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content_str())
            .collect::<Vec<_>>()
            .join("\n");

        let messages: Vec<Value> = req
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(message_to_anthropic_json)
            .collect();

        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": req.temperature,
        });
        let obj = body.as_object_mut().unwrap();

        if !system.is_empty() {
            obj.insert("system".to_string(), json!(system));
        }
        if let Some(stop) = &req.stop {
            obj.insert("stop_sequences".to_string(), json!(stop));
        }
        if let Some(tools) = &req.tools {
            let tool_defs: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            obj.insert("tools".to_string(), json!(tool_defs));
        }

        body
    }
}

/// Translate one unified message into an Anthropic `messages[]` entry.
///
/// A `Role::Tool` message becomes a `user`-role message wrapping a `tool_result` block; an
/// assistant message carrying tool calls becomes `tool_use` blocks alongside any text.
fn message_to_anthropic_json(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": msg.tool_call_id,
                "content": msg.content_str(),
            }]
        }),
        Role::Assistant if msg.tool_calls.is_some() => {
            let mut blocks = Vec::new();
            if let Some(text) = &msg.content {
                if !text.is_empty() {
                    blocks.push(json!({"type": "text", "text": text.as_ref()}));
                }
            }
            for tc in msg.tool_calls.as_ref().unwrap() {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": tc.id,
                    "name": tc.name,
                    "input": tc.arguments,
                }));
            }
            json!({"role": "assistant", "content": blocks})
        }
        _ => json!({
            "role": msg.role.to_string(),
            "content": [{"type": "text", "text": msg.content_str()}],
        }),
    }
}

/// Parse an Anthropic Messages API response body into the unified [`LLMResponse`].
fn parse_anthropic_response(body: Value) -> Result<LLMResponse, ProviderError> {
    let blocks = body
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| ProviderError::Protocol("missing content[] in response".to_string()))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                let id = block
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let name = block
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let arguments = block.get("input").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(ToolCall { id, name, arguments });
            }
            _ => {}
        }
    }

    let usage = body.get("usage").map(|u| {
        let prompt_tokens = u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let completion_tokens = u
            .get("output_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        LLMUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    });

    let finish_reason = body
        .get("stop_reason")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let id = body
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    Ok(LLMResponse {
        id,
        model,
        message: Message {
            role: Role::Assistant,
            content: if text.is_empty() {
                None
            } else {
                Some(std::sync::Arc::from(text.as_str()))
            },
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
            name: None,
        },
        usage,
        finish_reason,
        raw_response: Some(body),
    })
}

/// Decode an Anthropic Messages SSE stream into [`LLMStreamChunk`]s.
///
/// Events are typed by a top-level `"type"` field (not framed by event name the way some SSE
/// APIs are); `content_block_delta` carries incremental text/tool-input fragments,
/// `message_stop` signals completion. Malformed lines are skipped rather than erroring the
/// whole stream.
fn decode_anthropic_sse(
    byte_stream: impl futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> LLMStreamChunkStream {
    let chunked = byte_stream.map(|c| c.map_err(ProviderError::from));
    Box::pin(futures::stream::unfold(
        (chunked, String::new(), false),
        |(mut stream, mut buf, mut done)| async move {
            loop {
                if done {
                    return None;
                }
                if let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim_end_matches('\r').to_string();
                    buf.drain(..=pos);
                    let line = line.trim();
                    if !line.starts_with("data: ") {
                        continue;
                    }
                    let value: Value = match serde_json::from_str(&line[6..]) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    match value.get("type").and_then(|t| t.as_str()) {
                        Some("content_block_delta") => {
                            let delta = value.get("delta").cloned().unwrap_or(Value::Null);
                            let text = delta
                                .get("text")
                                .or_else(|| delta.get("partial_json"))
                                .cloned()
                                .unwrap_or(Value::Null);
                            return Some((
                                Ok(LLMStreamChunk {
                                    id: String::new(),
                                    model: String::new(),
                                    delta: json!({ "content": text }),
                                    finish_reason: None,
                                }),
                                (stream, buf, done),
                            ));
                        }
                        Some("message_delta") => {
                            let finish_reason = value
                                .get("delta")
                                .and_then(|d| d.get("stop_reason"))
                                .and_then(|s| s.as_str())
                                .map(|s| s.to_string());
                            return Some((
                                Ok(LLMStreamChunk {
                                    id: String::new(),
                                    model: String::new(),
                                    delta: Value::Null,
                                    finish_reason,
                                }),
                                (stream, buf, done),
                            ));
                        }
                        Some("message_stop") => {
                            done = true;
                            continue;
                        }
                        _ => continue,
                    }
                }
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        continue;
                    }
                    Some(Err(e)) => return Some((Err(e), (stream, buf, true))),
                    None => return None,
                }
            }
        },
    ))
}

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, req: &LLMRequest) -> Result<LLMResponse, ProviderError> {
        let body = self.build_request(req);
        let url = format!("{}/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let json_body: Value = resp.json().await?;
        parse_anthropic_response(json_body)
    }

    fn stream_complete<'a>(
        &'a self,
        req: &'a LLMRequest,
    ) -> BoxFuture<'a, Result<Option<LLMStreamChunkStream>, ProviderError>> {
        Box::pin(async move {
            let mut body = self.build_request(req);
            body["stream"] = Value::Bool(true);

            let url = format!("{}/messages", self.base_url);
            let resp = self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(ProviderError::Http {
                    status: status.as_u16(),
                    body: text,
                });
            }

            Ok(Some(decode_anthropic_sse(resp.bytes_stream())))
        })
    }
}
