//! Iteration-bounded ReAct reasoning engine and its step-event observer.
//!
//! [`ReasoningEngine`] drives a [`ReasoningChain`] through Thought → Action → Observation → Answer
//! turns against a [`ProviderAdapter`](crate::cloudllm::client_wrapper::ProviderAdapter), stopping
//! as soon as any [`StopReason`] predicate fires rather than running until the model happens to
//! stop emitting tool calls.

use crate::cloudllm::client_wrapper::{
    LLMRequest, Message, ProviderAdapter, Role, ToolChoice, ToolDefinition,
};
use crate::cloudllm::conversation::{default_estimate_tokens, ConversationManager};
use crate::cloudllm::tool_exec::{ToolExecutionContext, ToolExecutor};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sampling and loop-bound configuration for a [`ReasoningEngine`].
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub max_iterations: usize,
    pub max_tool_calls: usize,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Checked case-insensitively against each no-tool-call response's content, in order; the
    /// first one found ends the loop with [`StopReason::Completed`].
    pub stop_phrases: Vec<String>,
    /// When true, logs each step at `debug` level in addition to notifying the observer.
    pub verbose: bool,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        ReasoningConfig {
            max_iterations: 10,
            max_tool_calls: 20,
            timeout: Duration::from_secs(300),
            temperature: 0.7,
            max_tokens: Some(2000),
            stop_phrases: vec![
                "Final Answer:".to_string(),
                "FINAL ANSWER:".to_string(),
                "最终答案：".to_string(),
                "答案：".to_string(),
            ],
            verbose: false,
        }
    }
}

/// Discriminates what a [`ReasoningStep`] carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepType {
    Thought,
    ToolCall,
    ToolResult,
    Answer,
    Error,
}

/// One recorded event in a [`ReasoningChain`]'s history. `index` is a monotonically increasing
/// position within the chain, assigned by [`ReasoningChain::push_step`].
#[derive(Debug, Clone)]
pub struct ReasoningStep {
    pub index: usize,
    pub step_type: StepType,
    pub content: String,
    pub tool_name: Option<String>,
    pub tool_call_id: Option<String>,
    pub timestamp: Instant,
}

/// Why a [`ReasoningEngine::run`] invocation stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    MaxIterations,
    MaxToolCalls,
    Timeout,
    Error,
    /// Reserved: no external cancellation channel is wired up yet, so nothing raises this today.
    UserInterrupt,
    /// Reserved: no repetition/stagnation detector exists yet.
    NoProgress,
}

/// One reasoning run's full history: the original task plus every step appended while answering
/// it.
#[derive(Debug, Clone)]
pub struct ReasoningChain {
    pub chain_id: String,
    pub task: String,
    pub steps: Vec<ReasoningStep>,
}

impl ReasoningChain {
    pub fn new(chain_id: impl Into<String>, task: impl Into<String>) -> Self {
        ReasoningChain {
            chain_id: chain_id.into(),
            task: task.into(),
            steps: Vec::new(),
        }
    }

    fn push_step(
        &mut self,
        step_type: StepType,
        content: impl Into<String>,
        tool_name: Option<String>,
        tool_call_id: Option<String>,
    ) -> &ReasoningStep {
        let step = ReasoningStep {
            index: self.steps.len(),
            step_type,
            content: content.into(),
            tool_name,
            tool_call_id,
            timestamp: Instant::now(),
        };
        self.steps.push(step);
        self.steps.last().unwrap()
    }
}

/// The outcome of one [`ReasoningEngine::run`] invocation.
#[derive(Debug, Clone)]
pub struct ReasoningResult {
    pub chain: ReasoningChain,
    pub stop_reason: StopReason,
    pub final_answer: Option<String>,
    pub iterations: usize,
    pub tool_calls_made: usize,
}

/// Callback notified after every step appended to a chain. Must not mutate the chain — it only
/// receives a shared reference. A panic inside the callback is caught and logged at `error` level
/// rather than aborting the reasoning loop: a misbehaving observer degrades observability, not
/// correctness.
pub type StepObserver = dyn Fn(&ReasoningStep) + Send + Sync;

fn notify_observer(observer: Option<&StepObserver>, step: &ReasoningStep) {
    let Some(observer) = observer else { return };
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| observer(step)));
    if result.is_err() {
        log::error!(
            "step observer panicked while handling step {} ({:?})",
            step.index,
            step.step_type
        );
    }
}

/// Strip a single leading separator character from `{'-', ':', '：', '—'}` plus surrounding
/// whitespace from the text following a matched stop phrase.
fn extract_final_answer(content: &str, phrase_end: usize) -> String {
    let rest = &content[phrase_end..];
    let rest = rest.trim_start();
    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if matches!(c, '-' | ':' | '：' | '—') => chars.as_str().trim().to_string(),
        _ => rest.trim().to_string(),
    }
}

fn find_stop_phrase(content: &str, stop_phrases: &[String]) -> Option<usize> {
    let lower = content.to_lowercase();
    let mut best: Option<(usize, usize)> = None;
    for phrase in stop_phrases {
        let lower_phrase = phrase.to_lowercase();
        if let Some(pos) = lower.find(&lower_phrase) {
            let end = pos + lower_phrase.len();
            if best.map(|(p, _)| pos < p).unwrap_or(true) {
                best = Some((pos, end));
            }
        }
    }
    best.map(|(_, end)| end)
}

/// Drives a [`ReasoningChain`] against one provider adapter and tool executor, sequentially
/// executing any tool calls the model requests within a turn.
pub struct ReasoningEngine {
    adapter: Arc<dyn ProviderAdapter>,
    executor: Arc<ToolExecutor>,
    model: String,
    config: ReasoningConfig,
    observer: Option<Arc<StepObserver>>,
}

impl ReasoningEngine {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, executor: Arc<ToolExecutor>, model: impl Into<String>) -> Self {
        ReasoningEngine {
            adapter,
            executor,
            model: model.into(),
            config: ReasoningConfig::default(),
            observer: None,
        }
    }

    pub fn with_config(mut self, config: ReasoningConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observer(mut self, observer: Arc<StepObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.executor.registry().read().unwrap().get_schemas()
    }

    /// Human-readable nudge listing the names of every tool the chain's registry exposes; the
    /// actual schemas still go in the request's `tools` field.
    fn system_message(&self) -> String {
        let tool_names: Vec<String> = self
            .executor
            .registry()
            .read()
            .unwrap()
            .list_tools();

        let mut message = String::from(
            "You are a careful reasoning agent. Work through the task step by step. \
             When you need information or a capability you don't have, call one of the \
             available tools rather than guessing. When you are ready to give your final \
             answer, begin that line with \"Final Answer:\" followed by the answer and \
             nothing else before it.\n\nAvailable tools:\n",
        );
        if tool_names.is_empty() {
            message.push_str("- (none configured)\n");
        } else {
            for name in &tool_names {
                message.push_str(&format!("- {}\n", name));
            }
        }
        message
    }

    /// Run `chain` to completion (or until a termination predicate fires), sending requests
    /// through the configured provider adapter and executing any requested tool calls
    /// sequentially.
    pub async fn run(&self, chain: &mut ReasoningChain) -> ReasoningResult {
        let start = Instant::now();
        let mut conversation = ConversationManager::new();
        conversation.set_system_message(self.system_message());
        conversation.push(Message::user(chain.task.clone()));

        let mut iterations = 0usize;
        let mut tool_calls_made = 0usize;

        loop {
            if iterations >= self.config.max_iterations {
                self.log_verbose("reached max_iterations");
                return self.finish(chain, StopReason::MaxIterations, iterations, tool_calls_made, None);
            }
            if start.elapsed() >= self.config.timeout {
                self.log_verbose("reasoning timeout elapsed");
                return self.finish(chain, StopReason::Timeout, iterations, tool_calls_made, None);
            }

            conversation.trim_to_budget(200, 32_000, default_estimate_tokens);

            let request = LLMRequest::new(conversation.messages().to_vec(), self.model.clone())
                .with_tools(self.tool_definitions());
            let mut request = request;
            request.temperature = self.config.temperature;
            request.max_tokens = self.config.max_tokens;
            request.tool_choice = Some(ToolChoice::Auto);

            let response = match self.adapter.complete(&request).await {
                Ok(response) => response,
                Err(e) => {
                    let step = chain.push_step(StepType::Error, e.to_string(), None, None).clone();
                    self.log_step(&step);
                    notify_observer(self.observer.as_deref(), &step);
                    return self.finish(chain, StopReason::Error, iterations, tool_calls_made, None);
                }
            };

            iterations += 1;
            let message = response.message;

            match message.tool_calls.as_ref().filter(|calls| !calls.is_empty()) {
                None => {
                    let content = message.content_str().to_string();
                    if let Some(phrase_end) = find_stop_phrase(&content, &self.config.stop_phrases) {
                        let answer = extract_final_answer(&content, phrase_end);
                        let step = chain
                            .push_step(StepType::Answer, answer.clone(), None, None)
                            .clone();
                        self.log_step(&step);
                        notify_observer(self.observer.as_deref(), &step);
                        return self.finish(
                            chain,
                            StopReason::Completed,
                            iterations,
                            tool_calls_made,
                            Some(answer),
                        );
                    }

                    let step = chain
                        .push_step(StepType::Thought, content.clone(), None, None)
                        .clone();
                    self.log_step(&step);
                    notify_observer(self.observer.as_deref(), &step);
                    conversation.push(Message::assistant(content));
                }
                Some(tool_calls) => {
                    if tool_calls_made + tool_calls.len() > self.config.max_tool_calls {
                        self.log_verbose("reached max_tool_calls");
                        return self.finish(
                            chain,
                            StopReason::MaxToolCalls,
                            iterations,
                            tool_calls_made,
                            None,
                        );
                    }

                    conversation.push(Message::assistant_tool_calls(tool_calls.clone()));
                    for call in tool_calls {
                        let step = chain
                            .push_step(
                                StepType::ToolCall,
                                serde_json::to_string(&call.arguments).unwrap_or_default(),
                                Some(call.name.clone()),
                                Some(call.id.clone()),
                            )
                            .clone();
                        self.log_step(&step);
                        notify_observer(self.observer.as_deref(), &step);
                    }

                    let calls: Vec<(String, serde_json::Value)> = tool_calls
                        .iter()
                        .map(|c| (c.name.clone(), c.arguments.clone()))
                        .collect();
                    let ctx = ToolExecutionContext::default();
                    let results = self.executor.execute_multiple(calls, false, &ctx).await;
                    tool_calls_made += tool_calls.len();

                    for (call, result) in tool_calls.iter().zip(results.iter()) {
                        let rendered = ConversationManager::format_tool_result_for_llm(&call.name, result);
                        let step = chain
                            .push_step(
                                StepType::ToolResult,
                                rendered.clone(),
                                Some(call.name.clone()),
                                Some(call.id.clone()),
                            )
                            .clone();
                        self.log_step(&step);
                        notify_observer(self.observer.as_deref(), &step);
                        conversation.push_tool_result(call.id.clone(), &call.name, result);
                    }
                }
            }
        }
    }

    fn finish(
        &self,
        chain: &ReasoningChain,
        stop_reason: StopReason,
        iterations: usize,
        tool_calls_made: usize,
        final_answer: Option<String>,
    ) -> ReasoningResult {
        ReasoningResult {
            chain: chain.clone(),
            stop_reason,
            final_answer,
            iterations,
            tool_calls_made,
        }
    }

    fn log_verbose(&self, message: &str) {
        if self.config.verbose {
            log::debug!("{}", message);
        }
    }

    fn log_step(&self, step: &ReasoningStep) {
        if self.config.verbose {
            log::debug!("step {} ({:?}): {}", step.index, step.step_type, step.content);
        }
    }
}

/// Tests whether a conversation's `Role::Assistant` message requesting tool calls has been
/// answered, mirroring [`ConversationManager::has_outstanding_tool_calls`] but operating directly
/// on a slice, useful for tests asserting mid-chain invariants.
pub fn has_unanswered_tool_calls(messages: &[Message]) -> bool {
    let Some(last_assistant_calls) = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .and_then(|m| m.tool_calls.as_ref())
    else {
        return false;
    };
    let answered: std::collections::HashSet<&str> = messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    last_assistant_calls
        .iter()
        .any(|call| !answered.contains(call.id.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::client_wrapper::{LLMResponse, LLMUsage, ProviderError, ToolCall};
    use crate::cloudllm::tool_exec::{Tool, ToolExecutionContext as Ctx, ToolRegistry, ToolResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, RwLock};

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]})
        }
        async fn execute(&self, arguments: serde_json::Value, _ctx: &Ctx) -> ToolResult {
            ToolResult::success(arguments["text"].as_str().unwrap_or("").to_string())
        }
    }

    fn executor() -> Arc<ToolExecutor> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        Arc::new(ToolExecutor::new(Arc::new(RwLock::new(registry))))
    }

    struct ScriptedAdapter {
        responses: Mutex<Vec<LLMResponse>>,
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn provider_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _req: &LLMRequest) -> Result<LLMResponse, ProviderError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(ProviderError::Protocol("scripted responses exhausted".to_string()));
            }
            Ok(responses.remove(0))
        }
    }

    fn response_with_text(text: &str) -> LLMResponse {
        LLMResponse {
            id: "resp".to_string(),
            model: "test-model".to_string(),
            message: Message::assistant(text),
            usage: Some(LLMUsage::default()),
            finish_reason: Some("stop".to_string()),
            raw_response: None,
        }
    }

    fn response_with_tool_call(name: &str, args: serde_json::Value) -> LLMResponse {
        LLMResponse {
            id: "resp".to_string(),
            model: "test-model".to_string(),
            message: Message::assistant_tool_calls(vec![ToolCall {
                id: "call_1".to_string(),
                name: name.to_string(),
                arguments: args,
            }]),
            usage: Some(LLMUsage::default()),
            finish_reason: Some("tool_calls".to_string()),
            raw_response: None,
        }
    }

    #[tokio::test]
    async fn pure_answer_path_stops_completed() {
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(ScriptedAdapter {
            responses: Mutex::new(vec![response_with_text("Final Answer: 42")]),
        });
        let engine = ReasoningEngine::new(adapter, executor(), "test-model");
        let mut chain = ReasoningChain::new("chain-1", "what is the answer?");
        let result = engine.run(&mut chain).await;
        assert_eq!(result.stop_reason, StopReason::Completed);
        assert_eq!(result.final_answer.as_deref(), Some("42"));
        assert_eq!(result.iterations, 1);
    }

    #[tokio::test]
    async fn single_tool_call_then_answer() {
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(ScriptedAdapter {
            responses: Mutex::new(vec![
                response_with_tool_call("echo", serde_json::json!({"text": "hi"})),
                response_with_text("Final Answer: hi"),
            ]),
        });
        let engine = ReasoningEngine::new(adapter, executor(), "test-model");
        let mut chain = ReasoningChain::new("chain-2", "echo hi");
        let result = engine.run(&mut chain).await;
        assert_eq!(result.stop_reason, StopReason::Completed);
        assert_eq!(result.tool_calls_made, 1);
        assert!(chain
            .steps
            .iter()
            .any(|s| s.step_type == StepType::ToolCall && s.tool_name.as_deref() == Some("echo")));
        assert!(chain.steps.iter().any(|s| s.step_type == StepType::ToolResult));
    }

    #[tokio::test]
    async fn max_tool_calls_budget_is_enforced() {
        let many_calls: Vec<LLMResponse> = (0..5)
            .map(|_| response_with_tool_call("echo", serde_json::json!({"text": "x"})))
            .collect();
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(ScriptedAdapter {
            responses: Mutex::new(many_calls),
        });
        let engine = ReasoningEngine::new(adapter, executor(), "test-model").with_config(ReasoningConfig {
            max_tool_calls: 2,
            ..ReasoningConfig::default()
        });
        let mut chain = ReasoningChain::new("chain-3", "loop forever");
        let result = engine.run(&mut chain).await;
        assert_eq!(result.stop_reason, StopReason::MaxToolCalls);
    }

    #[tokio::test]
    async fn max_iterations_budget_is_enforced() {
        let many_thoughts: Vec<LLMResponse> = (0..5).map(|_| response_with_text("still thinking")).collect();
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(ScriptedAdapter {
            responses: Mutex::new(many_thoughts),
        });
        let engine = ReasoningEngine::new(adapter, executor(), "test-model").with_config(ReasoningConfig {
            max_iterations: 3,
            ..ReasoningConfig::default()
        });
        let mut chain = ReasoningChain::new("chain-4", "keep thinking");
        let result = engine.run(&mut chain).await;
        assert_eq!(result.stop_reason, StopReason::MaxIterations);
        assert_eq!(result.iterations, 3);
    }

    #[tokio::test]
    async fn adapter_error_surfaces_as_stop_reason_error_with_chain_step() {
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(ScriptedAdapter {
            responses: Mutex::new(vec![]),
        });
        let engine = ReasoningEngine::new(adapter, executor(), "test-model");
        let mut chain = ReasoningChain::new("chain-5", "this will fail immediately");
        let result = engine.run(&mut chain).await;
        assert_eq!(result.stop_reason, StopReason::Error);
        assert!(result.chain.steps.iter().any(|s| s.step_type == StepType::Error));
    }

    #[tokio::test]
    async fn observer_is_notified_for_every_step_and_panics_dont_abort_the_loop() {
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(ScriptedAdapter {
            responses: Mutex::new(vec![response_with_text("Final Answer: done")]),
        });
        let notified = Arc::new(AtomicUsize::new(0));
        let notified_clone = Arc::clone(&notified);
        let observer: Arc<StepObserver> = Arc::new(move |_step: &ReasoningStep| {
            notified_clone.fetch_add(1, Ordering::SeqCst);
            panic!("observer misbehaving on purpose");
        });
        let engine = ReasoningEngine::new(adapter, executor(), "test-model").with_observer(observer);
        let mut chain = ReasoningChain::new("chain-6", "trigger one step");
        let result = engine.run(&mut chain).await;
        assert_eq!(result.stop_reason, StopReason::Completed);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_phrase_matching_is_case_insensitive_and_strips_separator() {
        let content = "Thinking done. final answer: - 42";
        let end = find_stop_phrase(content, &["Final Answer:".to_string()]).unwrap();
        assert_eq!(extract_final_answer(content, end), "42");
    }
}
