//! Shared wire-translation helpers for the OpenAI-compatible chat-completions dialect.
//!
//! [`OpenAIProvider`](super::openai::OpenAIProvider) and
//! [`GrokProvider`](super::grok::GrokProvider) both speak the same chat-completions wire shape
//! (identical shape, different host) so the JSON construction, response parsing, and
//! SSE-stream decoding live here once and get reused by both adapters.

use crate::cloudllm::client_wrapper::{
    LLMRequest, LLMResponse, LLMStreamChunk, LLMUsage, Message, ProviderError, Role, ToolCall,
    ToolChoice,
};
use futures_util::StreamExt;
use serde_json::{json, Value};

/// Build the dialect-A/D JSON request body from a unified [`LLMRequest`].
pub fn build_openai_request(req: &LLMRequest) -> Value {
    let messages: Vec<Value> = req.messages.iter().map(message_to_openai_json).collect();

    let mut body = json!({
        "model": req.model,
        "messages": messages,
        "temperature": req.temperature,
        "stream": req.stream,
    });

    let obj = body.as_object_mut().unwrap();

    if let Some(max_tokens) = req.max_tokens {
        obj.insert("max_tokens".to_string(), json!(max_tokens));
    }
    if let Some(top_p) = req.top_p {
        obj.insert("top_p".to_string(), json!(top_p));
    }
    if let Some(stop) = &req.stop {
        obj.insert("stop".to_string(), json!(stop));
    }
    if let Some(tools) = &req.tools {
        let tool_defs: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        obj.insert("tools".to_string(), json!(tool_defs));
    }
    if let Some(choice) = &req.tool_choice {
        obj.insert(
            "tool_choice".to_string(),
            match choice {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::None => json!("none"),
                ToolChoice::Required => json!("required"),
                ToolChoice::Named(name) => json!({"type": "function", "function": {"name": name}}),
            },
        );
    }
    if let Some(schema) = &req.structured_output {
        obj.insert(
            "response_format".to_string(),
            json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "description": schema.description,
                    "schema": schema.schema,
                    "strict": schema.strict,
                }
            }),
        );
    }

    body
}

fn message_to_openai_json(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id,
            "content": msg.content_str(),
        }),
        Role::Assistant if msg.tool_calls.is_some() => {
            let tool_calls: Vec<Value> = msg
                .tool_calls
                .as_ref()
                .unwrap()
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": serde_json::to_string(&tc.arguments).unwrap_or_default(),
                        }
                    })
                })
                .collect();
            json!({
                "role": "assistant",
                "content": serde_json::Value::Null,
                "tool_calls": tool_calls,
            })
        }
        _ => json!({
            "role": msg.role.to_string(),
            "content": msg.content_str(),
        }),
    }
}

/// Parse a dialect-A/D chat-completions JSON response into the unified [`LLMResponse`].
pub fn parse_openai_response(body: Value) -> Result<LLMResponse, ProviderError> {
    let choice = body
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| ProviderError::Protocol("missing choices[0] in response".to_string()))?;

    let message_json = choice
        .get("message")
        .ok_or_else(|| ProviderError::Protocol("missing choices[0].message".to_string()))?;

    let content = message_json
        .get("content")
        .and_then(|c| c.as_str())
        .filter(|s| !s.is_empty())
        .map(std::sync::Arc::<str>::from);

    let tool_calls = message_json.get("tool_calls").and_then(|tcs| tcs.as_array()).map(|arr| {
        arr.iter()
            .filter_map(|tc| {
                let id = tc.get("id")?.as_str()?.to_string();
                let func = tc.get("function")?;
                let name = func.get("name")?.as_str()?.to_string();
                let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
                let arguments: Value =
                    serde_json::from_str(args_str).unwrap_or_else(|_| json!({}));
                Some(ToolCall { id, name, arguments })
            })
            .collect::<Vec<_>>()
    });

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|f| f.as_str())
        .map(|s| s.to_string());

    let usage = body.get("usage").map(|u| LLMUsage {
        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        completion_tokens: u
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
    });

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
            content,
            tool_calls,
            tool_call_id: None,
            name: None,
        },
        usage,
        finish_reason,
        raw_response: Some(body),
    })
}

/// Decode an OpenAI-style SSE byte stream into [`LLMStreamChunk`]s.
///
/// Each event line is prefixed `data: `; the stream terminates on the literal `data: [DONE]`.
/// Malformed lines are skipped rather than erroring the whole stream.
pub fn decode_openai_sse(
    byte_stream: impl futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> crate::cloudllm::client_wrapper::LLMStreamChunkStream {
    let chunked = byte_stream.map(|chunk| chunk.map_err(ProviderError::from));
    Box::pin(futures::stream::unfold(
        (chunked, String::new(), false),
        |(mut stream, mut buf, mut done)| async move {
            loop {
                if done {
                    return None;
                }
                // Drain any complete lines already buffered.
                if let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim_end_matches('\r').to_string();
                    buf.drain(..=pos);
                    if let Some(chunk) = parse_sse_line(&line, &mut done) {
                        return Some((chunk, (stream, buf, done)));
                    }
                    continue;
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

fn parse_sse_line(
    line: &str,
    done: &mut bool,
) -> Option<Result<LLMStreamChunk, ProviderError>> {
    let line = line.trim();
    if line.is_empty() || !line.starts_with("data: ") {
        return None;
    }
    let payload = &line[6..];
    if payload == "[DONE]" {
        *done = true;
        return None;
    }
    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(_) => return None,
    };
    let choice = value.get("choices").and_then(|c| c.get(0));
    let delta = choice
        .and_then(|c| c.get("delta"))
        .cloned()
        .unwrap_or(Value::Null);
    let finish_reason = choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(|f| f.as_str())
        .map(|s| s.to_string());
    let id = value
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let model = value
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Some(Ok(LLMStreamChunk {
        id,
        model,
        delta,
        finish_reason,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::client_wrapper::ToolCall;

    #[test]
    fn builds_tool_call_assistant_message() {
        let msg = Message::assistant_tool_calls(vec![ToolCall {
            id: "call_1".into(),
            name: "calculator".into(),
            arguments: json!({"expression": "2+2"}),
        }]);
        let v = message_to_openai_json(&msg);
        assert_eq!(v["role"], "assistant");
        assert!(v["content"].is_null());
        assert_eq!(v["tool_calls"][0]["function"]["name"], "calculator");
    }

    #[test]
    fn parses_basic_response() {
        let body = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4.1-mini",
            "choices": [{
                "message": {"role": "assistant", "content": "hello"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12},
        });
        let resp = parse_openai_response(body).unwrap();
        assert_eq!(resp.message.content_str(), "hello");
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn parses_tool_call_response() {
        let body = json!({
            "id": "chatcmpl-2",
            "model": "gpt-4.1-mini",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "calculator", "arguments": "{\"expression\":\"2+2\"}"}
                    }]
                },
                "finish_reason": "tool_calls",
            }],
        });
        let resp = parse_openai_response(body).unwrap();
        assert!(resp.message.content.is_none());
        let calls = resp.message.tool_calls.unwrap();
        assert_eq!(calls[0].name, "calculator");
        assert_eq!(calls[0].arguments["expression"], "2+2");
    }
}
