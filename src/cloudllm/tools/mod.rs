//! Built-in Tool Implementations
//!
//! Production-ready [`crate::cloudllm::tool_exec::Tool`] implementations a reasoning engine can
//! dispatch through a [`crate::cloudllm::tool_exec::ToolRegistry`].
//!
//! # Available Tools
//!
//! - **Calculator** (`calculator`): arithmetic, trigonometric, hyperbolic, logarithmic, and
//!   statistical expression evaluation, guarded by an identifier allow-list before evaluation.
//! - **Code Executor** (`code_executor`): runs a Python snippet in a `python3` subprocess behind
//!   an import/builtin/attribute allow-list screen, with byte-capped output and a hard timeout.
//! - **File System** (`filesystem`): read/write/append/list/delete operations scoped to a root
//!   directory, with path-escape prevention and opt-in, recursive-gated deletion.
//! - **Web Search** (`web_search`): a thin wrapper around a pluggable [`web_search::SearchBackend`]
//!   — this module defines the contract, not a concrete search integration.

pub mod calculator;
pub mod code_executor;
pub mod filesystem;
pub mod web_search;

pub use calculator::{Calculator, CalculatorError, CalculatorResult, CalculatorTool};
pub use code_executor::{CodeExecutionOutcome, CodeExecutorError, CodeExecutorTool};
pub use filesystem::{DirectoryEntry, FileMetadata, FileSystemError, FileSystemTool};
pub use web_search::{SearchBackend, SearchResult, WebSearchError, WebSearchTool};
