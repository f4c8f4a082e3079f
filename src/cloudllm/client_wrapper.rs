//! Unified request/response model shared by every provider adapter.
//!
//! Every vendor speaks a different wire dialect (OpenAI chat-completions, Anthropic Messages,
//! Gemini `generateContent`, or an OpenAI-compatible host like xAI). This module defines the
//! single provider-agnostic shape ([`LLMRequest`]/[`LLMResponse`]/[`Message`]/[`ToolCall`]) that
//! the reasoning engine and conversation manager operate on, plus the [`ProviderAdapter`] trait
//! contract every dialect-specific client implements to translate to/from its own wire format.
//!
//! # Example
//!
//! ```rust
//! use cloudllm::client_wrapper::{Message, Role, LLMRequest};
//!
//! let req = LLMRequest::new(
//!     vec![Message::system("You are a helpful assistant."), Message::user("Hello!")],
//!     "gpt-4.1-mini".to_string(),
//! );
//! assert_eq!(req.messages.len(), 2);
//! assert_eq!(req.temperature, 0.7);
//! ```

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Who sent a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{}", s)
    }
}

/// A tool invocation requested by (or fed back to) the model.
///
/// `arguments` are always a parsed [`serde_json::Value`] by the time a [`Message`] carries this
/// type — adapters that receive a JSON string from the wire (e.g. OpenAI's `function.arguments`)
/// parse it immediately rather than passing the raw string further up the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One message in a conversation.
///
/// `content` is `None` (not `Some("")`) when a turn genuinely carries no text, e.g. an assistant
/// message that only requests tool calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Option<Arc<str>>,
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Set on `Role::Tool` messages — correlates the result back to the `ToolCall.id` it answers.
    pub tool_call_id: Option<String>,
    /// Set on `Role::Tool` messages carrying the name of the tool that was invoked.
    pub name: Option<String>,
}

impl Message {
    /// Build a plain text message with no tool-call metadata.
    pub fn new(role: Role, content: impl Into<Arc<str>>) -> Self {
        Message {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<Arc<str>>) -> Self {
        Message::new(Role::System, content)
    }

    pub fn user(content: impl Into<Arc<str>>) -> Self {
        Message::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<Arc<str>>) -> Self {
        Message::new(Role::Assistant, content)
    }

    /// Build an assistant message that only requests tool calls (no text content).
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Message {
            role: Role::Assistant,
            content: None,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            name: None,
        }
    }

    /// Build a `Role::Tool` message reporting the result of one tool call back to the model.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<Arc<str>>,
    ) -> Self {
        Message {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }

    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// A tool's contract as advertised to a provider, JSON-Schema-shaped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A JSON-Schema-constrained structured output request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredOutputSchema {
    pub name: String,
    pub description: Option<String>,
    pub schema: serde_json::Value,
    pub strict: bool,
}

/// How the model should decide whether (and which) tool to call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    /// Force a call to this specific tool by name.
    Named(String),
}

/// Cumulative token accounting for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LLMUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<ToolChoice>,
    pub structured_output: Option<StructuredOutputSchema>,
    pub stream: bool,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
}

impl LLMRequest {
    /// Construct a request with the crate's default sampling parameters
    /// (`temperature = 0.7`, everything else unset).
    pub fn new(messages: Vec<Message>, model: String) -> Self {
        LLMRequest {
            messages,
            model,
            temperature: 0.7,
            max_tokens: None,
            tools: None,
            tool_choice: None,
            structured_output: None,
            stream: false,
            top_p: None,
            stop: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub id: String,
    pub model: String,
    pub message: Message,
    pub usage: Option<LLMUsage>,
    /// The provider's own finish-reason string, passed through unmapped — values differ enough
    /// across vendors (`"stop"`, `"end_turn"`, `"STOP"`) that collapsing them into a shared enum
    /// would lose information without adding type safety callers actually need.
    pub finish_reason: Option<String>,
    /// The raw JSON body, retained for callers that need a field this struct doesn't model.
    pub raw_response: Option<serde_json::Value>,
}

/// One incremental chunk of a streamed completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMStreamChunk {
    pub id: String,
    pub model: String,
    pub delta: serde_json::Value,
    pub finish_reason: Option<String>,
}

/// A boxed stream of stream chunks, falling back to a `Result` per-chunk for transport errors.
pub type LLMStreamChunkStream = BoxStream<'static, Result<LLMStreamChunk, ProviderError>>;

/// Errors a provider adapter can surface.
///
/// All variants are surfaced to the caller rather than silently recovered.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// A non-2xx HTTP response.
    Http { status: u16, body: String },
    /// Malformed/unexpected JSON shape in an otherwise-successful HTTP response.
    Protocol(String),
    /// The adapter was invoked without a resource it required (e.g. no HTTP client configured).
    /// Indicates a programming error in the hosting application, not a transient failure.
    PreconditionViolated(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Http { status, body } => {
                write!(f, "provider returned HTTP {}: {}", status, body)
            }
            ProviderError::Protocol(msg) => write!(f, "provider protocol error: {}", msg),
            ProviderError::PreconditionViolated(msg) => {
                write!(f, "provider precondition violated: {}", msg)
            }
        }
    }
}

impl Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => ProviderError::Http {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => ProviderError::Protocol(e.to_string()),
        }
    }
}

/// Translates the unified request/response model to/from one vendor's wire dialect.
///
/// Implementations own (or borrow from a shared pool, see [`crate::cloudllm::clients::http_pool`])
/// a `reqwest::Client`; a missing/misconfigured client resource surfaces as
/// [`ProviderError::PreconditionViolated`] rather than panicking.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Short vendor/dialect identifier, e.g. `"openai"`, `"anthropic"`, `"gemini"`, `"grok"`.
    fn provider_name(&self) -> &str;

    /// Models this adapter instance is willing to serve. An empty slice means "no restriction" —
    /// the caller's `LLMRequest.model` is passed through unchecked.
    fn supported_models(&self) -> &[&str] {
        &[]
    }

    fn supports_tool_calling(&self) -> bool {
        true
    }

    fn supports_structured_output(&self) -> bool {
        false
    }

    async fn complete(&self, req: &LLMRequest) -> Result<LLMResponse, ProviderError>;

    /// Open a streaming completion. The default implementation reports "no streaming support"
    /// rather than erroring — callers should fall back to [`ProviderAdapter::complete`].
    ///
    /// Each call opens its own connection; there is no shared long-lived generator across calls.
    fn stream_complete<'a>(
        &'a self,
        _req: &'a LLMRequest,
    ) -> BoxFuture<'a, Result<Option<LLMStreamChunkStream>, ProviderError>> {
        Box::pin(async { Ok(None) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_expected_fields() {
        let m = Message::user("hi");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content_str(), "hi");
        assert!(m.tool_calls.is_none());

        let tc = ToolCall {
            id: "call_1".into(),
            name: "calculator".into(),
            arguments: serde_json::json!({"expression": "2+2"}),
        };
        let m = Message::assistant_tool_calls(vec![tc.clone()]);
        assert!(m.content.is_none());
        assert_eq!(m.tool_calls.unwrap()[0].id, "call_1");

        let m = Message::tool_result("call_1", "calculator", "4");
        assert_eq!(m.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(m.name.as_deref(), Some("calculator"));
    }

    #[test]
    fn request_default_sampling_params() {
        let req = LLMRequest::new(vec![Message::user("hi")], "gpt-4.1-mini".into());
        assert_eq!(req.temperature, 0.7);
        assert!(req.max_tokens.is_none());
        assert!(!req.stream);
    }

    #[test]
    fn provider_error_display() {
        let e = ProviderError::Http {
            status: 429,
            body: "rate limited".into(),
        };
        assert!(e.to_string().contains("429"));
    }
}
