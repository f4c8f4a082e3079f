//! `GeminiProvider` — Google Gemini `generateContent` adapter.
//!
//! Gemini's wire shape diverges from the other providers in three ways: the system message
//! becomes a top-level `system_instruction` rather than a `contents[]` entry, tool calls/results
//! are typed `functionCall`/`functionResponse` parts rather than a dedicated message role, and
//! authentication is a `?key=` query parameter rather than a header. Streaming is
//! newline-delimited JSON (one `GenerateContentResponse` object per line), not SSE.

use crate::cloudllm::client_wrapper::{
    LLMRequest, LLMResponse, LLMStreamChunk, LLMStreamChunkStream, LLMUsage, Message,
    ProviderAdapter, ProviderError, Role, ToolCall, ToolChoice,
};
use crate::cloudllm::clients::http_pool::get_http_client;
use futures::future::BoxFuture;
use futures_util::StreamExt;
use serde_json::{json, Value};

/// Adapter for Google's Gemini `generateContent`/`streamGenerateContent` endpoints.
pub struct GeminiProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, "https://generativelanguage.googleapis.com/v1beta")
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
        let system_text: String = req
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content_str())
            .collect::<Vec<_>>()
            .join("\n");

        let contents: Vec<Value> = req
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(message_to_gemini_json)
            .collect();

        let mut generation_config = json!({ "temperature": req.temperature });
        let gc = generation_config.as_object_mut().unwrap();
        if let Some(max_tokens) = req.max_tokens {
            gc.insert("maxOutputTokens".to_string(), json!(max_tokens));
        }
        if let Some(top_p) = req.top_p {
            gc.insert("topP".to_string(), json!(top_p));
        }
        if let Some(stop) = &req.stop {
            gc.insert("stopSequences".to_string(), json!(stop));
        }
        if let Some(schema) = &req.structured_output {
            gc.insert("responseMimeType".to_string(), json!("application/json"));
            gc.insert("responseSchema".to_string(), schema.schema.clone());
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        let obj = body.as_object_mut().unwrap();

        if !system_text.is_empty() {
            obj.insert(
                "system_instruction".to_string(),
                json!({ "parts": [{"text": system_text}] }),
            );
        }
        if let Some(tools) = &req.tools {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            obj.insert(
                "tools".to_string(),
                json!([{ "function_declarations": declarations }]),
            );
        }
        if let Some(choice) = &req.tool_choice {
            let mode = match choice {
                ToolChoice::Auto => "AUTO",
                ToolChoice::None => "NONE",
                ToolChoice::Required => "ANY",
                ToolChoice::Named(_) => "ANY",
            };
            obj.insert(
                "toolConfig".to_string(),
                json!({ "functionCallingConfig": { "mode": mode } }),
            );
        }

        body
    }

    fn endpoint(&self, model: &str, stream: bool) -> String {
        let method = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        format!(
            "{}/models/{}:{}?key={}",
            self.base_url,
            model,
            method,
            urlencoding::encode(&self.api_key)
        )
    }
}

/// Translate one unified message into a Gemini `contents[]` entry.
///
/// `Role::Assistant` maps to Gemini's `"model"` role; `Role::Tool` maps to `"function"` and wraps
/// a `functionResponse` part instead of plain text.
fn message_to_gemini_json(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => json!({
            "role": "function",
            "parts": [{
                "functionResponse": {
                    "name": msg.name.clone().unwrap_or_default(),
                    "response": { "content": msg.content_str() },
                }
            }]
        }),
        Role::Assistant if msg.tool_calls.is_some() => {
            let mut parts = Vec::new();
            if let Some(text) = &msg.content {
                if !text.is_empty() {
                    parts.push(json!({"text": text.as_ref()}));
                }
            }
            for tc in msg.tool_calls.as_ref().unwrap() {
                parts.push(json!({
                    "functionCall": { "name": tc.name, "args": tc.arguments }
                }));
            }
            json!({"role": "model", "parts": parts})
        }
        Role::Assistant => json!({
            "role": "model",
            "parts": [{"text": msg.content_str()}],
        }),
        _ => json!({
            "role": "user",
            "parts": [{"text": msg.content_str()}],
        }),
    }
}

/// Parse one `GenerateContentResponse` JSON object into the unified [`LLMResponse`].
///
/// Gemini never issues call IDs for `functionCall` parts, so one is synthesized from the part's
/// position within the response (`call_{index}`).
fn parse_gemini_response(body: Value) -> Result<LLMResponse, ProviderError> {
    let candidate = body
        .get("candidates")
        .and_then(|c| c.get(0))
        .ok_or_else(|| ProviderError::Protocol("missing candidates[0] in response".to_string()))?;

    let parts = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .cloned()
        .unwrap_or_default();

    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for (index, part) in parts.iter().enumerate() {
        if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
            text.push_str(t);
        } else if let Some(call) = part.get("functionCall") {
            let name = call
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let arguments = call.get("args").cloned().unwrap_or_else(|| json!({}));
            tool_calls.push(ToolCall {
                id: format!("call_{}", index),
                name,
                arguments,
            });
        }
    }

    let finish_reason = candidate
        .get("finishReason")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let usage = body.get("usageMetadata").map(|u| {
        let prompt_tokens = u
            .get("promptTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let completion_tokens = u
            .get("candidatesTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let total_tokens = u
            .get("totalTokenCount")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(prompt_tokens + completion_tokens);
        LLMUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    });

    Ok(LLMResponse {
        id: String::new(),
        model: String::new(),
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

/// Decode a Gemini newline-delimited-JSON stream into [`LLMStreamChunk`]s.
///
/// Unlike the SSE dialects, NDJSON frames are not prefixed; malformed or partial lines are
/// skipped rather than erroring the whole stream.
fn decode_gemini_ndjson(
    byte_stream: impl futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> LLMStreamChunkStream {
    let chunked = byte_stream.map(|c| c.map_err(ProviderError::from));
    Box::pin(futures::stream::unfold(
        (chunked, String::new()),
        |(mut stream, mut buf)| async move {
            loop {
                if let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    let value: Value = match serde_json::from_str(&line) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    let candidate = value.get("candidates").and_then(|c| c.get(0));
                    let text = candidate
                        .and_then(|c| c.get("content"))
                        .and_then(|c| c.get("parts"))
                        .and_then(|p| p.get(0))
                        .and_then(|p| p.get("text"))
                        .cloned()
                        .unwrap_or(Value::Null);
                    let finish_reason = candidate
                        .and_then(|c| c.get("finishReason"))
                        .and_then(|f| f.as_str())
                        .map(|s| s.to_string());
                    return Some((
                        Ok(LLMStreamChunk {
                            id: String::new(),
                            model: String::new(),
                            delta: json!({ "content": text }),
                            finish_reason,
                        }),
                        (stream, buf),
                    ));
                }
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        continue;
                    }
                    Some(Err(e)) => return Some((Err(e), (stream, buf))),
                    None => return None,
                }
            }
        },
    ))
}

#[async_trait::async_trait]
impl ProviderAdapter for GeminiProvider {
    fn provider_name(&self) -> &str {
        "gemini"
    }

    fn supports_structured_output(&self) -> bool {
        true
    }

    async fn complete(&self, req: &LLMRequest) -> Result<LLMResponse, ProviderError> {
        let body = self.build_request(req);
        let url = self.endpoint(&req.model, false);
        let resp = self.client.post(&url).json(&body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let json_body: Value = resp.json().await?;
        let mut parsed = parse_gemini_response(json_body)?;
        parsed.model = req.model.clone();
        Ok(parsed)
    }

    fn stream_complete<'a>(
        &'a self,
        req: &'a LLMRequest,
    ) -> BoxFuture<'a, Result<Option<LLMStreamChunkStream>, ProviderError>> {
        Box::pin(async move {
            let body = self.build_request(req);
            let url = self.endpoint(&req.model, true);
            let resp = self.client.post(&url).json(&body).send().await?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(ProviderError::Http {
                    status: status.as_u16(),
                    body: text,
                });
            }

            Ok(Some(decode_gemini_ndjson(resp.bytes_stream())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::client_wrapper::ToolDefinition;

    #[test]
    fn pulls_system_instruction_out_of_contents() {
        let provider = GeminiProvider::new("key");
        let req = LLMRequest::new(
            vec![Message::system("be terse"), Message::user("hi")],
            "gemini-2.5-flash".into(),
        );
        let body = provider.build_request(&req);
        assert_eq!(body["system_instruction"]["parts"][0]["text"], "be terse");
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[test]
    fn api_key_is_a_query_parameter_not_a_header() {
        let provider = GeminiProvider::new("secret-key");
        let url = provider.endpoint("gemini-2.5-flash", false);
        assert!(url.contains("key=secret-key"));
        assert!(url.ends_with(":generateContent?key=secret-key"));
    }

    #[test]
    fn tools_become_function_declarations() {
        let provider = GeminiProvider::new("key");
        let req = LLMRequest::new(vec![Message::user("hi")], "gemini-2.5-flash".into())
            .with_tools(vec![ToolDefinition {
                name: "calculator".into(),
                description: "evaluate".into(),
                parameters: json!({"type": "object"}),
            }]);
        let body = provider.build_request(&req);
        assert_eq!(
            body["tools"][0]["function_declarations"][0]["name"],
            "calculator"
        );
    }

    #[test]
    fn parses_function_call_and_synthesizes_id() {
        let body = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "Let me check."},
                        {"functionCall": {"name": "calculator", "args": {"expression": "2+2"}}}
                    ]
                },
                "finishReason": "STOP",
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 4},
        });
        let resp = parse_gemini_response(body).unwrap();
        assert_eq!(resp.message.content_str(), "Let me check.");
        let calls = resp.message.tool_calls.unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "calculator");
        assert_eq!(resp.usage.unwrap().total_tokens, 16);
    }
}
