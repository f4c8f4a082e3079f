// src/lib.rs

// Import the top-level `cloudllm` module.
pub mod cloudllm;

// Re-exporting key items for easier external access.
pub use cloudllm::client_wrapper;
pub use cloudllm::client_wrapper::{Message, ProviderAdapter, Role};
pub use cloudllm::config::ProviderRegistry;
pub use cloudllm::reasoning::{ReasoningChain, ReasoningEngine};
pub use cloudllm::tool_exec::{Tool, ToolExecutor, ToolRegistry};

/// Initializes `env_logger`, ignoring the error from a second call.
///
/// Call at the top of a test or `main` to see `log::debug!`/`log::info!` output; controlled
/// by the standard `RUST_LOG` environment variable.
pub fn init_logger() {
    let _ = env_logger::try_init();
}
