//! Conversation state held across one reasoning chain's lifetime.
//!
//! [`ConversationManager`] wraps the `Vec<Message>` a [`crate::cloudllm::reasoning::ReasoningEngine`]
//! sends on every turn, pinning an optional system message at index 0 and providing the trimming
//! logic that keeps a long-running chain's request within a token budget.

use crate::cloudllm::client_wrapper::{Message, Role};
use crate::cloudllm::tool_exec::ToolResult;

/// Holds a conversation's message history with an optional pinned system message at index 0.
#[derive(Debug, Clone, Default)]
pub struct ConversationManager {
    messages: Vec<Message>,
    has_system_message: bool,
}

impl ConversationManager {
    pub fn new() -> Self {
        ConversationManager {
            messages: Vec::new(),
            has_system_message: false,
        }
    }

    /// Replace the system message in place at index 0 (inserting it there if none exists yet).
    pub fn set_system_message(&mut self, content: impl Into<std::sync::Arc<str>>) {
        let message = Message::system(content);
        if self.has_system_message {
            self.messages[0] = message;
        } else {
            self.messages.insert(0, message);
            self.has_system_message = true;
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Append a `Role::Tool` message correlated to `tool_call_id`, rendered through
    /// [`ConversationManager::format_tool_result_for_llm`].
    pub fn push_tool_result(&mut self, tool_call_id: impl Into<String>, name: &str, result: &ToolResult) {
        let rendered = Self::format_tool_result_for_llm(name, result);
        self.messages.push(Message::tool_result(tool_call_id, name, rendered));
    }

    /// Renders exactly `"Tool '<name>' failed. <error>"` on failure and `"Tool '<name>' executed
    /// successfully. <output>"` on success — the literal prefixes are part of the contract any
    /// caller re-deriving this text must match verbatim.
    pub fn format_tool_result_for_llm(name: &str, result: &ToolResult) -> String {
        if result.success {
            format!(
                "Tool '{}' executed successfully. {}",
                name,
                result.output.as_deref().unwrap_or("")
            )
        } else {
            format!(
                "Tool '{}' failed. {}",
                name,
                result.error.as_deref().unwrap_or("unknown error")
            )
        }
    }

    /// True when the most recent assistant message carries `tool_calls` that don't yet have a
    /// matching `tool`-role message (by `tool_call_id`) later in the history.
    pub fn has_outstanding_tool_calls(&self) -> bool {
        let Some(last_assistant_calls) = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .and_then(|m| m.tool_calls.as_ref())
        else {
            return false;
        };
        if last_assistant_calls.is_empty() {
            return false;
        }

        let answered: std::collections::HashSet<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        last_assistant_calls
            .iter()
            .any(|call| !answered.contains(call.id.as_str()))
    }

    /// Drop all history. When `preserve_system` is true and a system message was set, it is
    /// restored at index 0 afterward.
    pub fn clear(&mut self, preserve_system: bool) {
        let system = if preserve_system && self.has_system_message {
            Some(self.messages[0].clone())
        } else {
            None
        };
        self.messages.clear();
        self.has_system_message = false;
        if let Some(system) = system {
            self.messages.push(system);
            self.has_system_message = true;
        }
    }

    /// First truncate by raw message count (dropping oldest non-system messages), then
    /// iteratively pop the oldest non-system message while `estimate_tokens` still exceeds
    /// `max_tokens` — never removing the system message, and always leaving at least one
    /// non-system message even if that message alone exceeds budget.
    pub fn trim_to_budget(
        &mut self,
        max_messages: usize,
        max_tokens: usize,
        estimate_tokens: fn(&[Message]) -> usize,
    ) {
        let system_offset = if self.has_system_message { 1 } else { 0 };

        while self.messages.len() > max_messages.max(system_offset + 1) {
            self.messages.remove(system_offset);
        }

        while self.messages.len() > system_offset + 1
            && estimate_tokens(&self.messages) > max_tokens
        {
            self.messages.remove(system_offset);
        }
    }
}

/// Default token estimator: sum of every message's content length plus, for assistant messages
/// carrying tool calls, each call's name length and its serialized-arguments length, divided by 4
/// (integer division) — no flat per-message surcharge.
pub fn default_estimate_tokens(messages: &[Message]) -> usize {
    let mut chars = 0usize;
    for message in messages {
        chars += message.content_str().len();
        if let Some(tool_calls) = &message.tool_calls {
            for call in tool_calls {
                chars += call.name.len();
                chars += serde_json::to_string(&call.arguments).unwrap_or_default().len();
            }
        }
    }
    chars / 4
}
