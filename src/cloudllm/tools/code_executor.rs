//! Sandboxed Python code execution.
//!
//! A tokenized (Rust has no Python parser to AST-walk) pre-execution security screen rejects
//! imports outside an allow-list, calls to dangerous builtins, and access to dangerous dunder
//! attributes before any code reaches an interpreter. Code that passes the screen runs in a real
//! `python3` subprocess — spawned and timed out the same way [`crate::cloudllm::tools::bash`]
//! runs shell commands — rather than in-process, so a bug in the screen can't escalate into
//! arbitrary code running inside this process. If the script assigns a top-level `result` name,
//! its `repr()` is recovered from a marker line appended after the script and reported alongside
//! stdout/stderr.

use std::error::Error;
use std::fmt;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;

/// Modules a script is permitted to `import`.
const SAFE_MODULES: &[&str] = &[
    "math",
    "random",
    "datetime",
    "json",
    "re",
    "itertools",
    "collections",
    "string",
    "statistics",
    "functools",
    "decimal",
    "fractions",
];

/// Prefixes every line the result-capture trailer prints, so it can be stripped back out of
/// stdout after the subprocess exits. A control character keeps collisions with ordinary program
/// output implausible.
const RESULT_MARKER: &str = "\u{1}__code_executor_result__\u{1}";

/// Appended to every screened script. If the script defines a top-level `result`, its `repr()` is
/// printed behind [`RESULT_MARKER`] so [`extract_result`] can recover it without touching the
/// user's own stdout.
const RESULT_CAPTURE_TRAILER: &str = "\nif 'result' in globals():\n    print('\\x01__code_executor_result__\\x01' + repr(result))\n";

/// Split the trailer's marker line (if present) out of captured stdout, returning the cleaned
/// stdout and the `repr()` of the sandboxed script's top-level `result`, if it defined one.
fn extract_result(stdout: &str) -> (String, Option<String>) {
    let mut kept = Vec::new();
    let mut result = None;
    for line in stdout.lines() {
        match line.strip_prefix(RESULT_MARKER) {
            Some(repr) => result = Some(repr.to_string()),
            None => kept.push(line),
        }
    }
    let mut cleaned = kept.join("\n");
    if result.is_none() && stdout.ends_with('\n') {
        cleaned.push('\n');
    }
    (cleaned, result)
}

/// Builtin functions whose presence in the source always aborts execution, regardless of import
/// screening — these can reach outside the sandbox even without an `import` statement.
const DANGEROUS_CALLS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "open",
    "input",
    "globals",
    "locals",
    "vars",
    "getattr",
    "setattr",
    "delattr",
    "exit",
    "quit",
];

/// Dunder attributes that let otherwise-inert code reach back into the interpreter's internals
/// (e.g. `().__class__.__bases__[0].__subclasses__()` sandbox escapes).
const DANGEROUS_ATTRS: &[&str] = &[
    "__class__",
    "__bases__",
    "__subclasses__",
    "__globals__",
    "__builtins__",
    "__code__",
    "__closure__",
    "__dict__",
];

/// Errors a [`CodeExecutorTool`] invocation can surface.
#[derive(Debug, Clone)]
pub enum CodeExecutorError {
    /// The security screen rejected the code before it ever reached an interpreter.
    UnsafeCode(String),
    /// The interpreter ran but exited non-zero, timed out, or the subprocess itself failed.
    RuntimeError(String),
}

impl fmt::Display for CodeExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeExecutorError::UnsafeCode(msg) => write!(f, "Unsafe code rejected: {}", msg),
            CodeExecutorError::RuntimeError(msg) => write!(f, "Execution error: {}", msg),
        }
    }
}

impl Error for CodeExecutorError {}

/// The captured outcome of one subprocess run.
#[derive(Debug, Clone)]
pub struct CodeExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub duration: Duration,
    /// `repr()` of the script's top-level `result` name, if it defined one.
    pub result: Option<String>,
}

/// Reject code containing an `import`/`from ... import` of a module outside [`SAFE_MODULES`], a
/// call to a name in [`DANGEROUS_CALLS`], or an attribute access in [`DANGEROUS_ATTRS`]. This is
/// a line/token scan, not a real parser — it errs toward rejecting code a full AST walk would
/// have allowed rather than risk missing something a real parser would have caught.
fn check_code_is_safe(code: &str) -> Result<(), CodeExecutorError> {
    for raw_line in code.lines() {
        let line = raw_line.trim();
        if let Some(rest) = line.strip_prefix("import ") {
            for module in rest.split(',') {
                let module = module.trim().split_whitespace().next().unwrap_or("");
                let top_level = module.split('.').next().unwrap_or("");
                if !SAFE_MODULES.contains(&top_level) {
                    return Err(CodeExecutorError::UnsafeCode(format!(
                        "import of module '{}' is not allowed",
                        top_level
                    )));
                }
            }
        } else if let Some(rest) = line.strip_prefix("from ") {
            let module = rest.split_whitespace().next().unwrap_or("");
            let top_level = module.split('.').next().unwrap_or("");
            if !SAFE_MODULES.contains(&top_level) {
                return Err(CodeExecutorError::UnsafeCode(format!(
                    "import from module '{}' is not allowed",
                    top_level
                )));
            }
        }
    }

    for &func in DANGEROUS_CALLS {
        let pattern = format!("{}(", func);
        if code.contains(&pattern) {
            return Err(CodeExecutorError::UnsafeCode(format!(
                "call to '{}' is not allowed",
                func
            )));
        }
    }

    for &attr in DANGEROUS_ATTRS {
        if code.contains(attr) {
            return Err(CodeExecutorError::UnsafeCode(format!(
                "access to '{}' is not allowed",
                attr
            )));
        }
    }

    Ok(())
}

async fn read_limited<R: AsyncReadExt + Unpin>(
    mut reader: R,
    max_bytes: usize,
    stream_name: &'static str,
) -> Result<Vec<u8>, CodeExecutorError> {
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => return Ok(buf),
            Ok(n) => {
                if buf.len() + n > max_bytes {
                    return Err(CodeExecutorError::RuntimeError(format!(
                        "{} exceeded the {} byte limit",
                        stream_name, max_bytes
                    )));
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            Err(e) => return Err(CodeExecutorError::RuntimeError(e.to_string())),
        }
    }
}

/// Runs Python source in a `python3` subprocess behind the [`check_code_is_safe`] screen.
#[derive(Clone)]
pub struct CodeExecutorTool {
    timeout: Duration,
    max_output_size: usize,
}

impl CodeExecutorTool {
    pub fn new() -> Self {
        CodeExecutorTool {
            timeout: Duration::from_secs(10),
            max_output_size: 64 * 1024,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_size(mut self, max_output_size: usize) -> Self {
        self.max_output_size = max_output_size;
        self
    }

    /// Run `code` in a fresh `python3 -c` subprocess. Public so it can be exercised directly in
    /// tests without going through the [`crate::cloudllm::tool_exec::Tool`] envelope.
    pub async fn run(&self, code: &str) -> Result<CodeExecutionOutcome, CodeExecutorError> {
        check_code_is_safe(code)?;

        let start = Instant::now();
        let timeout = self.timeout;
        let max_output = self.max_output_size;
        let script = format!("{}\n{}", code, RESULT_CAPTURE_TRAILER);

        match tokio::time::timeout(timeout, async move {
            let mut command = TokioCommand::new("python3");
            command
                .arg("-c")
                .arg(&script)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());

            let mut child = command
                .spawn()
                .map_err(|e| CodeExecutorError::RuntimeError(e.to_string()))?;
            let stdout_pipe = child.stdout.take().expect("stdout was piped");
            let stderr_pipe = child.stderr.take().expect("stderr was piped");

            let (stdout_result, stderr_result) = tokio::join!(
                read_limited(stdout_pipe, max_output, "stdout"),
                read_limited(stderr_pipe, max_output, "stderr"),
            );

            let (stdout_bytes, stderr_bytes) = match (stdout_result, stderr_result) {
                (Err(e), _) | (_, Err(e)) => {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    return Err(e);
                }
                (Ok(out), Ok(err)) => (out, err),
            };

            let status = child
                .wait()
                .await
                .map_err(|e| CodeExecutorError::RuntimeError(e.to_string()))?;

            let raw_stdout = String::from_utf8_lossy(&stdout_bytes).to_string();
            let (stdout, result) = extract_result(&raw_stdout);

            Ok(CodeExecutionOutcome {
                stdout,
                stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
                success: status.success(),
                duration: start.elapsed(),
                result,
            })
        })
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CodeExecutorError::RuntimeError(format!(
                "execution exceeded {} second timeout",
                timeout.as_secs()
            ))),
        }
    }
}

impl Default for CodeExecutorTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl crate::cloudllm::tool_exec::Tool for CodeExecutorTool {
    fn name(&self) -> &str {
        "code_executor"
    }

    fn description(&self) -> &str {
        "Execute a short Python snippet in a subprocess sandbox restricted to a safe module \
         allow-list. stdout/stderr are captured and returned, along with the repr() of a \
         top-level `result` variable if the snippet defines one; code using disallowed imports \
         or builtins is rejected before it runs."
    }

    fn category(&self) -> &str {
        "code"
    }

    fn timeout(&self) -> Duration {
        self.timeout + Duration::from_secs(2)
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {"type": "string"},
                "language": {"type": "string", "enum": ["python"]},
            },
            "required": ["code"],
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _context: &crate::cloudllm::tool_exec::ToolExecutionContext,
    ) -> crate::cloudllm::tool_exec::ToolResult {
        use crate::cloudllm::tool_exec::ToolResult;

        let code = arguments["code"].as_str().unwrap_or("").trim();
        if code.is_empty() {
            return ToolResult::error_result("code cannot be empty");
        }
        let language = arguments["language"].as_str().unwrap_or("python");
        if language != "python" {
            return ToolResult::error_result(format!("unsupported language: {}", language));
        }

        match self.run(code).await {
            Ok(outcome) => {
                let mut output = String::new();
                if !outcome.stdout.is_empty() {
                    output.push_str(&outcome.stdout);
                }
                if let Some(result) = &outcome.result {
                    if !output.is_empty() && !output.ends_with('\n') {
                        output.push('\n');
                    }
                    output.push_str("result: ");
                    output.push_str(result);
                }
                if output.is_empty() {
                    output.push_str("(no output)");
                }
                let tool_result = if outcome.success {
                    ToolResult::success(output)
                } else {
                    ToolResult::error_result(format!(
                        "process exited with failure. stderr: {}",
                        outcome.stderr
                    ))
                };
                let mut tool_result = tool_result
                    .with_metadata("stdout", serde_json::json!(outcome.stdout))
                    .with_metadata("stderr", serde_json::json!(outcome.stderr))
                    .with_metadata(
                        "duration_ms",
                        serde_json::json!(outcome.duration.as_millis() as u64),
                    );
                if let Some(result) = &outcome.result {
                    tool_result = tool_result.with_metadata("result", serde_json::json!(result));
                }
                tool_result
            }
            Err(e) => ToolResult::error_result(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_disallowed_import() {
        let err = check_code_is_safe("import os\nprint(os.getcwd())").unwrap_err();
        assert!(matches!(err, CodeExecutorError::UnsafeCode(_)));
    }

    #[test]
    fn rejects_from_import_of_disallowed_module() {
        let err = check_code_is_safe("from subprocess import run").unwrap_err();
        assert!(matches!(err, CodeExecutorError::UnsafeCode(_)));
    }

    #[test]
    fn allows_safe_module_imports() {
        assert!(check_code_is_safe("import math\nprint(math.sqrt(4))").is_ok());
        assert!(check_code_is_safe("import json, statistics").is_ok());
        assert!(check_code_is_safe("import functools, decimal, fractions").is_ok());
    }

    #[test]
    fn extracts_result_marker_from_stdout() {
        let stdout = format!("hello\n{}42\n", RESULT_MARKER);
        let (cleaned, result) = extract_result(&stdout);
        assert_eq!(cleaned, "hello");
        assert_eq!(result.as_deref(), Some("42"));
    }

    #[test]
    fn extract_result_is_none_without_marker() {
        let (cleaned, result) = extract_result("hello\nworld\n");
        assert_eq!(cleaned, "hello\nworld\n");
        assert!(result.is_none());
    }

    #[test]
    fn rejects_dangerous_builtin_calls() {
        assert!(check_code_is_safe("eval('1+1')").is_err());
        assert!(check_code_is_safe("open('/etc/passwd')").is_err());
        assert!(check_code_is_safe("__import__('os')").is_err());
    }

    #[test]
    fn rejects_dangerous_dunder_access() {
        assert!(check_code_is_safe("().__class__.__bases__").is_err());
        assert!(check_code_is_safe("x.__globals__").is_err());
    }

    #[test]
    fn allows_ordinary_arithmetic_and_loops() {
        assert!(check_code_is_safe("total = 0\nfor i in range(10):\n    total += i\nprint(total)").is_ok());
    }
}
