//! Web Search Tool
//!
//! A thin contract-only wrapper around a pluggable [`SearchBackend`]. This module defines the
//! tool's name/schema/error taxonomy and dispatches to whatever backend the hosting application
//! configures — it does not ship a concrete search-engine integration (no bundled API key, no
//! bundled HTTP scraping). Callers wanting an out-of-the-box backend implement [`SearchBackend`]
//! themselves, typically by wrapping a `reqwest::Client` against their search provider of choice.

use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// One search hit returned by a [`SearchBackend`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Errors a [`SearchBackend`] can surface.
#[derive(Debug, Clone)]
pub enum WebSearchError {
    /// The query was empty or `num_results` was out of the backend's accepted range.
    InvalidQuery(String),
    /// The backend's upstream request failed (network error, non-2xx, malformed response).
    BackendError(String),
}

impl fmt::Display for WebSearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebSearchError::InvalidQuery(msg) => write!(f, "Invalid search query: {}", msg),
            WebSearchError::BackendError(msg) => write!(f, "Search backend error: {}", msg),
        }
    }
}

impl Error for WebSearchError {}

/// Pluggable search implementation. `WebSearchTool` owns one of these and calls it on every
/// invocation — this crate ships no implementation of this trait.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Run a search and return up to `num_results` hits.
    async fn search(
        &self,
        query: &str,
        num_results: u32,
    ) -> Result<Vec<SearchResult>, WebSearchError>;

    /// Short identifier surfaced in [`crate::cloudllm::tool_exec::ToolResult::metadata`], e.g.
    /// `"duckduckgo"`, `"bing"`, `"internal-index"`.
    fn backend_name(&self) -> &str;
}

/// `web_search` [`crate::cloudllm::tool_exec::Tool`] — accepts a query string and an optional
/// result-count argument, and returns whatever the configured [`SearchBackend`] finds.
#[derive(Clone)]
pub struct WebSearchTool {
    backend: Arc<dyn SearchBackend>,
    default_num_results: u32,
}

impl WebSearchTool {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        WebSearchTool {
            backend,
            default_num_results: 5,
        }
    }

    pub fn with_default_num_results(mut self, default_num_results: u32) -> Self {
        self.default_num_results = default_num_results;
        self
    }
}

#[async_trait]
impl crate::cloudllm::tool_exec::Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information and return titles, URLs, and snippets."
    }

    fn category(&self) -> &str {
        "research"
    }

    fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(20)
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "num_results": {
                    "type": "integer",
                    "description": "Number of results to return (1-20).",
                },
            },
            "required": ["query"],
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _context: &crate::cloudllm::tool_exec::ToolExecutionContext,
    ) -> crate::cloudllm::tool_exec::ToolResult {
        use crate::cloudllm::tool_exec::ToolResult;

        let query = arguments["query"].as_str().unwrap_or("").trim();
        if query.is_empty() {
            return ToolResult::error_result("Search query cannot be empty");
        }

        let num_results = arguments["num_results"]
            .as_u64()
            .map(|n| n as u32)
            .unwrap_or(self.default_num_results);
        if num_results == 0 || num_results > 20 {
            return ToolResult::error_result("num_results must be between 1 and 20");
        }

        match self.backend.search(query, num_results).await {
            Ok(results) => {
                let output = serde_json::to_string(&results).unwrap_or_default();
                ToolResult::success(output)
                    .with_metadata("query", serde_json::json!(query))
                    .with_metadata("num_results", serde_json::json!(results.len()))
                    .with_metadata("backend", serde_json::json!(self.backend.backend_name()))
            }
            Err(e) => ToolResult::error_result(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::tool_exec::{Tool, ToolExecutionContext};

    struct FixedBackend(Vec<SearchResult>);

    #[async_trait]
    impl SearchBackend for FixedBackend {
        async fn search(
            &self,
            _query: &str,
            num_results: u32,
        ) -> Result<Vec<SearchResult>, WebSearchError> {
            Ok(self.0.iter().take(num_results as usize).cloned().collect())
        }

        fn backend_name(&self) -> &str {
            "fixed"
        }
    }

    fn sample_results() -> Vec<SearchResult> {
        vec![
            SearchResult {
                title: "Rust".to_string(),
                url: "https://rust-lang.org".to_string(),
                snippet: "A systems language".to_string(),
            },
            SearchResult {
                title: "Tokio".to_string(),
                url: "https://tokio.rs".to_string(),
                snippet: "An async runtime".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn empty_query_is_rejected_before_reaching_backend() {
        let tool = WebSearchTool::new(Arc::new(FixedBackend(sample_results())));
        let ctx = ToolExecutionContext::default();
        let result = tool
            .safe_execute(serde_json::json!({"query": "   "}), &ctx)
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn out_of_range_num_results_is_rejected() {
        let tool = WebSearchTool::new(Arc::new(FixedBackend(sample_results())));
        let ctx = ToolExecutionContext::default();
        let result = tool
            .safe_execute(serde_json::json!({"query": "rust", "num_results": 50}), &ctx)
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn successful_search_reports_backend_in_metadata() {
        let tool = WebSearchTool::new(Arc::new(FixedBackend(sample_results())));
        let ctx = ToolExecutionContext::default();
        let result = tool
            .safe_execute(serde_json::json!({"query": "rust", "num_results": 1}), &ctx)
            .await;
        assert!(result.success);
        assert_eq!(result.metadata["backend"], serde_json::json!("fixed"));
        assert_eq!(result.metadata["num_results"], serde_json::json!(1));
    }
}
