use crate::{
    analyzer::SafetyValidator,
    engine::{CapturedRun, EngineCapabilities, ExecutionOptions, PythonEngine},
    errors::{ErrorKind, WorkbenchError},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Substituted for empty stdout on a successful run
pub const NO_OUTPUT_MESSAGE: &str = "Code executed successfully (no output)";

/// Outcome of one submission. Every failure path ends up in here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error_kind: Option<ErrorKind>,
}

impl ExecutionResult {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error_kind: None,
        }
    }

    pub fn failed(kind: ErrorKind, output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error_kind: Some(kind),
        }
    }

    pub fn from_error(err: &WorkbenchError) -> Self {
        Self::failed(err.kind(), err.to_string())
    }
}

/// Validates, runs and classifies submitted code
pub struct ExecutionSandbox {
    validator: Arc<SafetyValidator>,
    engine: Arc<dyn PythonEngine>,
    options: ExecutionOptions,
}

impl ExecutionSandbox {
    pub fn new(
        validator: Arc<SafetyValidator>,
        engine: Arc<dyn PythonEngine>,
        options: ExecutionOptions,
    ) -> Self {
        Self {
            validator,
            engine,
            options,
        }
    }

    pub fn validator(&self) -> &Arc<SafetyValidator> {
        &self.validator
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn engine_capabilities(&self) -> EngineCapabilities {
        self.engine.capabilities()
    }

    pub async fn execute(&self, source: &str) -> ExecutionResult {
        let validation = self.validator.validate(source).await;
        if !validation.ok {
            let err = WorkbenchError::CodeValidation(validation.reason.unwrap_or_default());
            return ExecutionResult::from_error(&err);
        }

        match self.engine.run(source, &self.options).await {
            Ok(run) => classify(run),
            Err(WorkbenchError::Timeout) => {
                warn!("[SANDBOX] Run timed out after {:?}", self.options.timeout);
                ExecutionResult::failed(
                    ErrorKind::TimeoutError,
                    format!(
                        "Execution timeout exceeded ({}s)",
                        self.options.timeout.as_secs()
                    ),
                )
            }
            Err(e) => {
                error!("[SANDBOX] Engine failure: {}", e);
                ExecutionResult::failed(ErrorKind::RuntimeError, e.to_string())
            }
        }
    }
}

fn classify(run: CapturedRun) -> ExecutionResult {
    if let Some(exception) = run.exception {
        info!("[SANDBOX] Code raised {}", exception.kind);
        return ExecutionResult::failed(
            ErrorKind::RuntimeError,
            format!("{}: {}", exception.kind, exception.message),
        );
    }

    let stderr = run.stderr.trim();
    if !stderr.is_empty() {
        info!("[SANDBOX] Code wrote to stderr, treating as failure");
        return ExecutionResult::failed(ErrorKind::RuntimeError, stderr);
    }

    let stdout = run.stdout.trim();
    if stdout.is_empty() {
        ExecutionResult::succeeded(NO_OUTPUT_MESSAGE)
    } else {
        ExecutionResult::succeeded(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RaisedException;
    use crate::errors::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays a canned outcome and counts invocations
    struct ScriptedEngine {
        outcome: fn() -> Result<CapturedRun>,
        runs: AtomicUsize,
    }

    impl ScriptedEngine {
        fn new(outcome: fn() -> Result<CapturedRun>) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                runs: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PythonEngine for ScriptedEngine {
        async fn run(&self, _code: &str, _options: &ExecutionOptions) -> Result<CapturedRun> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }

        fn capabilities(&self) -> EngineCapabilities {
            EngineCapabilities {
                name: "scripted".to_string(),
                interpreter: None,
                enforces_timeout: false,
                isolated: false,
            }
        }
    }

    fn sandbox(engine: Arc<ScriptedEngine>) -> ExecutionSandbox {
        ExecutionSandbox::new(
            Arc::new(SafetyValidator::without_linter()),
            engine,
            ExecutionOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_rejected_code_never_runs() {
        let engine = ScriptedEngine::new(|| Ok(CapturedRun::default()));
        let result = sandbox(engine.clone()).execute("import socketserverx\n").await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::CodeValidationError));
        let reason = sandbox(engine.clone())
            .validator()
            .validate("import socketserverx\n")
            .await
            .reason
            .unwrap();
        assert_eq!(result.output, reason);
        assert!(result.output.contains("socketserverx"));
        assert_eq!(engine.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stdout_is_trimmed() {
        let engine = ScriptedEngine::new(|| {
            Ok(CapturedRun {
                stdout: "\n  42  \n".to_string(),
                ..CapturedRun::default()
            })
        });
        let result = sandbox(engine).execute("print(42)\n").await;
        assert_eq!(result, ExecutionResult::succeeded("42"));
    }

    #[tokio::test]
    async fn test_empty_output_placeholder() {
        let engine = ScriptedEngine::new(|| Ok(CapturedRun::default()));
        let result = sandbox(engine).execute("x = 1\n").await;
        assert!(result.success);
        assert_eq!(result.output, NO_OUTPUT_MESSAGE);
    }

    #[tokio::test]
    async fn test_exception_becomes_runtime_error() {
        let engine = ScriptedEngine::new(|| {
            Ok(CapturedRun {
                stdout: "partial".to_string(),
                stderr: String::new(),
                exception: Some(RaisedException {
                    kind: "ZeroDivisionError".to_string(),
                    message: "division by zero".to_string(),
                }),
            })
        });
        let result = sandbox(engine).execute("1 / 0\n").await;
        assert_eq!(
            result,
            ExecutionResult::failed(ErrorKind::RuntimeError, "ZeroDivisionError: division by zero")
        );
    }

    #[tokio::test]
    async fn test_stderr_without_exception_is_failure() {
        let engine = ScriptedEngine::new(|| {
            Ok(CapturedRun {
                stdout: "fine".to_string(),
                stderr: "warning: something\n".to_string(),
                exception: None,
            })
        });
        let result = sandbox(engine).execute("print('fine')\n").await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::RuntimeError));
        assert_eq!(result.output, "warning: something");
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let engine = ScriptedEngine::new(|| Err(WorkbenchError::Timeout));
        let result = sandbox(engine).execute("x = 1\n").await;
        assert_eq!(result.error_kind, Some(ErrorKind::TimeoutError));
    }

    #[tokio::test]
    async fn test_engine_failure_is_captured() {
        let engine = ScriptedEngine::new(|| Err(WorkbenchError::Runtime("boom".into())));
        let result = sandbox(engine).execute("x = 1\n").await;
        assert_eq!(result.error_kind, Some(ErrorKind::RuntimeError));
        assert!(result.output.contains("boom"));
    }
}
