//! Tool contract, registry, and executor.
//!
//! [`Tool`] is the contract every built-in (and user-supplied) tool implements. [`ToolRegistry`]
//! holds named tools and exports their schemas in the shape the reasoning engine hands to a
//! [`ToolDefinition`](crate::cloudllm::client_wrapper::ToolDefinition). [`ToolExecutor`] is the
//! thing that actually calls a tool — it wraps every call in argument validation and a timeout,
//! and keeps a bounded execution history for diagnostics.

use crate::cloudllm::client_wrapper::ToolDefinition;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Per-call context handed to a [`Tool::execute`] invocation. Currently carries nothing but
/// exists as an extension point (e.g. a future caller identity or cancellation token) so adding
/// fields later doesn't change every tool's signature.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionContext {
    pub call_id: Option<String>,
}

/// The outcome of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        ToolResult {
            success: true,
            output: Some(output.into()),
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn error_result(error: impl Into<String>) -> Self {
        ToolResult {
            success: false,
            output: None,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

impl fmt::Display for ToolResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            write!(f, "{}", self.output.as_deref().unwrap_or(""))
        } else {
            write!(f, "Error: {}", self.error.as_deref().unwrap_or("unknown error"))
        }
    }
}

/// A callable tool: name, description, a JSON-Schema parameter contract, and an async body.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON-Schema object describing accepted arguments, e.g.
    /// `{"type": "object", "properties": {...}, "required": [...]}`.
    fn parameters(&self) -> serde_json::Value;

    /// Which display category this tool belongs to, for `ToolRegistry::list_categories`.
    fn category(&self) -> &str {
        "general"
    }

    /// How long a single call to this tool is allowed to run before [`Tool::safe_execute`] cuts
    /// it off. Individual tools override this for naturally slow operations.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Shallow structural check of `arguments` against [`Tool::parameters`] — every property
    /// named in `required` must be present, and every present property whose schema names a
    /// primitive JSON-Schema `type` (string/integer/number/boolean/array/object) must match it.
    /// Does not recurse into nested object/array schemas.
    fn validate_arguments(&self, arguments: &serde_json::Value) -> bool {
        let schema = self.parameters();
        let required = schema
            .get("required")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();
        for key in &required {
            let Some(key) = key.as_str() else { continue };
            if arguments.get(key).is_none() {
                return false;
            }
        }

        let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
            return true;
        };
        for (key, prop_schema) in properties {
            let Some(value) = arguments.get(key) else {
                continue;
            };
            let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            if !json_value_matches_type(value, expected_type) {
                return false;
            }
        }
        true
    }

    /// Run the tool body. Implementations assume `arguments` has already passed
    /// [`Tool::validate_arguments`] — [`Tool::safe_execute`] guarantees that.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        context: &ToolExecutionContext,
    ) -> ToolResult;

    /// Validate, run with a timeout, and catch panics — the entry point [`ToolExecutor`] calls
    /// instead of [`Tool::execute`] directly.
    async fn safe_execute(
        &self,
        arguments: serde_json::Value,
        context: &ToolExecutionContext,
    ) -> ToolResult {
        if !self.validate_arguments(&arguments) {
            return ToolResult::error_result(format!(
                "Invalid arguments for tool '{}'",
                self.name()
            ));
        }

        let timeout = self.timeout();
        match tokio::time::timeout(timeout, self.execute(arguments, context)).await {
            Ok(result) => result,
            Err(_) => ToolResult::error_result(format!(
                "Tool execution timed out after {} seconds",
                timeout.as_secs()
            )),
        }
    }
}

/// Does `value` match a JSON-Schema primitive `type` name? Unrecognized type names are treated
/// as unconstrained (return `true`) rather than rejected, since the schema author may be using a
/// draft feature this shallow checker doesn't understand.
fn json_value_matches_type(value: &serde_json::Value, expected_type: &str) -> bool {
    match expected_type {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// Summary metadata for one display category, as returned by [`ToolRegistry::get_category_info`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryInfo {
    pub name: String,
    pub tool_count: usize,
    pub tool_names: Vec<String>,
}

/// A named collection of [`Tool`]s. Read-mostly in steady state — writers are expected only
/// during bootstrap or explicit test setup.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Returns `false` without replacing the existing entry if `tool.name()` is
    /// already registered — use [`ToolRegistry::register_override`] to replace intentionally.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> bool {
        if self.tools.contains_key(tool.name()) {
            log::warn!(
                "tool '{}' is already registered; ignoring duplicate registration",
                tool.name()
            );
            return false;
        }
        self.tools.insert(tool.name().to_string(), tool);
        true
    }

    /// Register a tool, replacing any existing entry with the same name.
    pub fn register_override(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas in the shape the reasoning engine hands the provider adapter — always OpenAI
    /// function-call shape regardless of the destination dialect; adapters reshape at send time.
    pub fn get_schemas(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Alias for [`ToolRegistry::get_schemas`] — named to match how callers building an
    /// [`LLMRequest`](crate::cloudllm::client_wrapper::LLMRequest) reach for it.
    pub fn get_tools_for_llm(&self) -> Vec<ToolDefinition> {
        self.get_schemas()
    }

    pub fn clear(&mut self) {
        self.tools.clear();
    }

    pub fn list_categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self
            .tools
            .values()
            .map(|t| t.category().to_string())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        categories.sort();
        categories
    }

    pub fn get_category_info(&self, category: &str) -> CategoryInfo {
        let mut tool_names: Vec<String> = self
            .tools
            .values()
            .filter(|t| t.category() == category)
            .map(|t| t.name().to_string())
            .collect();
        tool_names.sort();
        CategoryInfo {
            name: category.to_string(),
            tool_count: tool_names.len(),
            tool_names,
        }
    }
}

/// One recorded tool invocation, kept in [`ToolExecutor`]'s ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub success: bool,
    pub duration: Duration,
    pub error: Option<String>,
}

/// Per-tool rollup within [`ExecutionStatistics`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolUsageStats {
    pub call_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_duration: Duration,
}

/// Aggregate counters over everything currently in the ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStatistics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub average_execution_time: Duration,
    pub tools_used: HashMap<String, ToolUsageStats>,
}

const EXECUTION_HISTORY_CAP: usize = 1000;

struct ExecutorState {
    history: VecDeque<ExecutionRecord>,
}

/// Calls tools through a [`ToolRegistry`], recording every attempt (found or not) into a bounded
/// execution history.
pub struct ToolExecutor {
    registry: Arc<RwLock<ToolRegistry>>,
    state: RwLock<ExecutorState>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<RwLock<ToolRegistry>>) -> Self {
        ToolExecutor {
            registry,
            state: RwLock::new(ExecutorState {
                history: VecDeque::with_capacity(EXECUTION_HISTORY_CAP),
            }),
        }
    }

    fn record(&self, record: ExecutionRecord) {
        let mut state = self.state.write().unwrap();
        if state.history.len() == EXECUTION_HISTORY_CAP {
            state.history.pop_front();
        }
        state.history.push_back(record);
    }

    /// Run one tool by name. A missing tool is recorded as a failed execution but does not call
    /// into [`Tool::safe_execute`] at all — there is nothing to validate or time out.
    pub async fn execute_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        context: &ToolExecutionContext,
    ) -> ToolResult {
        let tool = { self.registry.read().unwrap().get(name) };
        let start = Instant::now();
        let result = match tool {
            Some(tool) => tool.safe_execute(arguments.clone(), context).await,
            None => ToolResult::error_result(format!("Tool '{}' not found in registry", name)),
        };
        self.record(ExecutionRecord {
            tool_name: name.to_string(),
            arguments,
            success: result.success,
            duration: start.elapsed(),
            error: result.error.clone(),
        });
        result
    }

    /// Parse `arguments_json` and call [`ToolExecutor::execute_tool`]. A JSON-parse failure is
    /// recorded and returned as a failed [`ToolResult`] without ever reaching the registry.
    pub async fn execute_from_llm_call(
        &self,
        name: &str,
        arguments_json: &str,
        context: &ToolExecutionContext,
    ) -> ToolResult {
        let parsed: Result<serde_json::Value, _> = serde_json::from_str(arguments_json);
        match parsed {
            Ok(arguments) => self.execute_tool(name, arguments, context).await,
            Err(e) => {
                let result =
                    ToolResult::error_result(format!("Failed to parse arguments: {}", e));
                self.record(ExecutionRecord {
                    tool_name: name.to_string(),
                    arguments: serde_json::Value::Null,
                    success: false,
                    duration: Duration::ZERO,
                    error: result.error.clone(),
                });
                result
            }
        }
    }

    /// Run a batch of `(name, arguments)` calls, preserving input order in the returned vector
    /// regardless of completion order. `parallel` controls whether calls race concurrently or
    /// run one after another — the reasoning engine always passes `false` for calls made within
    /// a single turn, so tool side effects within a turn stay ordered and deterministic.
    pub async fn execute_multiple(
        &self,
        calls: Vec<(String, serde_json::Value)>,
        parallel: bool,
        context: &ToolExecutionContext,
    ) -> Vec<ToolResult> {
        if parallel {
            let futures = calls
                .into_iter()
                .map(|(name, args)| async move { self.execute_tool(&name, args, context).await });
            futures_util::future::join_all(futures).await
        } else {
            let mut results = Vec::new();
            for (name, args) in calls {
                results.push(self.execute_tool(&name, args, context).await);
            }
            results
        }
    }

    pub fn get_execution_history(&self) -> Vec<ExecutionRecord> {
        self.state.read().unwrap().history.iter().cloned().collect()
    }

    pub fn get_statistics(&self) -> ExecutionStatistics {
        let state = self.state.read().unwrap();
        let total = state.history.len() as u64;
        let successful = state.history.iter().filter(|r| r.success).count() as u64;
        let failed = total - successful;
        let success_rate = if total > 0 {
            successful as f64 / total as f64
        } else {
            0.0
        };
        let total_duration: Duration = state.history.iter().map(|r| r.duration).sum();
        let average_execution_time = if total > 0 {
            total_duration / total as u32
        } else {
            Duration::ZERO
        };

        let mut tools_used: HashMap<String, ToolUsageStats> = HashMap::new();
        for record in state.history.iter() {
            let stats = tools_used.entry(record.tool_name.clone()).or_default();
            stats.call_count += 1;
            if record.success {
                stats.success_count += 1;
            } else {
                stats.failure_count += 1;
            }
            stats.total_duration += record.duration;
        }

        ExecutionStatistics {
            total,
            successful,
            failed,
            success_rate,
            average_execution_time,
            tools_used,
        }
    }

    pub fn registry(&self) -> Arc<RwLock<ToolRegistry>> {
        Arc::clone(&self.registry)
    }
}

static GLOBAL_TOOL_REGISTRY: Lazy<Arc<RwLock<ToolRegistry>>> =
    Lazy::new(|| Arc::new(RwLock::new(ToolRegistry::new())));

/// The process-wide default tool registry. Tests wanting isolation should build their own
/// `Arc<RwLock<ToolRegistry>>` and a matching [`ToolExecutor`] rather than mutating this one.
pub fn get_global_tool_registry() -> Arc<RwLock<ToolRegistry>> {
    Arc::clone(&GLOBAL_TOOL_REGISTRY)
}

/// Replace the contents of the process-wide default tool registry in place.
pub fn set_global_tool_registry(registry: ToolRegistry) {
    *GLOBAL_TOOL_REGISTRY.write().unwrap() = registry;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

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
            json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]})
        }
        async fn execute(&self, arguments: serde_json::Value, _ctx: &ToolExecutionContext) -> ToolResult {
            ToolResult::success(arguments["text"].as_str().unwrap_or("").to_string())
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never returns in time"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(10)
        }
        async fn execute(&self, _arguments: serde_json::Value, _ctx: &ToolExecutionContext) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(5)).await;
            ToolResult::success("too late")
        }
    }

    fn executor_with(tool: Arc<dyn Tool>) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(tool);
        ToolExecutor::new(Arc::new(RwLock::new(registry)))
    }

    #[tokio::test]
    async fn missing_tool_is_not_found_without_reaching_safe_execute() {
        let executor = executor_with(Arc::new(Echo));
        let ctx = ToolExecutionContext::default();
        let result = executor.execute_tool("nonexistent", json!({}), &ctx).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap(), "Tool 'nonexistent' not found in registry");
    }

    #[tokio::test]
    async fn missing_arguments_are_rejected_before_execute_runs() {
        let executor = executor_with(Arc::new(Echo));
        let ctx = ToolExecutionContext::default();
        let result = executor.execute_tool("echo", json!({}), &ctx).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap(), "Invalid arguments for tool 'echo'");
    }

    #[tokio::test]
    async fn timeout_produces_expected_message() {
        let executor = executor_with(Arc::new(Slow));
        let ctx = ToolExecutionContext::default();
        let result = executor.execute_tool("slow", json!({}), &ctx).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap(), "Tool execution timed out after 0 seconds");
    }

    #[tokio::test]
    async fn malformed_json_arguments_are_reported() {
        let executor = executor_with(Arc::new(Echo));
        let ctx = ToolExecutionContext::default();
        let result = executor.execute_from_llm_call("echo", "{not json", &ctx).await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Failed to parse arguments:"));
    }

    #[tokio::test]
    async fn sequential_execute_multiple_preserves_order() {
        let executor = executor_with(Arc::new(Echo));
        let ctx = ToolExecutionContext::default();
        let calls = vec![
            ("echo".to_string(), json!({"text": "one"})),
            ("echo".to_string(), json!({"text": "two"})),
            ("echo".to_string(), json!({"text": "three"})),
        ];
        let results = executor.execute_multiple(calls, false, &ctx).await;
        let outputs: Vec<_> = results.iter().map(|r| r.output.clone().unwrap()).collect();
        assert_eq!(outputs, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn parallel_execute_multiple_preserves_input_order() {
        let executor = executor_with(Arc::new(Echo));
        let ctx = ToolExecutionContext::default();
        let calls = vec![
            ("echo".to_string(), json!({"text": "one"})),
            ("echo".to_string(), json!({"text": "two"})),
            ("echo".to_string(), json!({"text": "three"})),
        ];
        let results = executor.execute_multiple(calls, true, &ctx).await;
        let outputs: Vec<_> = results.iter().map(|r| r.output.clone().unwrap()).collect();
        assert_eq!(outputs, vec!["one", "two", "three"]);
        assert_eq!(executor.get_execution_history().len(), 3);
    }

    #[tokio::test]
    async fn execution_history_never_exceeds_the_ring_buffer_cap() {
        let executor = executor_with(Arc::new(Echo));
        let ctx = ToolExecutionContext::default();
        for i in 0..(EXECUTION_HISTORY_CAP + 50) {
            let _ = executor
                .execute_tool("echo", json!({"text": i.to_string()}), &ctx)
                .await;
        }
        let history = executor.get_execution_history();
        assert_eq!(history.len(), EXECUTION_HISTORY_CAP);
        let stats = executor.get_statistics();
        assert_eq!(stats.total, EXECUTION_HISTORY_CAP as u64);
        // oldest records were evicted: the first surviving call is call #50, not #0.
        assert_eq!(history.first().unwrap().arguments["text"], "50");
    }

    #[tokio::test]
    async fn every_call_is_recorded_even_when_tool_is_missing() {
        let executor = executor_with(Arc::new(Echo));
        let ctx = ToolExecutionContext::default();
        let _ = executor.execute_tool("echo", json!({"text": "hi"}), &ctx).await;
        let _ = executor.execute_tool("ghost", json!({}), &ctx).await;
        let history = executor.get_execution_history();
        assert_eq!(history.len(), 2);
        let stats = executor.get_statistics();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn wrong_argument_type_is_rejected_before_execute_runs() {
        let executor = executor_with(Arc::new(Echo));
        let ctx = ToolExecutionContext::default();
        let result = executor.execute_tool("echo", json!({"text": 42}), &ctx).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap(), "Invalid arguments for tool 'echo'");
    }

    #[test]
    fn duplicate_registration_does_not_replace_existing_tool() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(Arc::new(Echo)));
        assert!(!registry.register(Arc::new(Echo)));
        assert_eq!(registry.list_tools(), vec!["echo".to_string()]);
    }
}
