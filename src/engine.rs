use crate::{config::ResourceLimits, errors::Result, policy::SandboxPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Options for one restricted run
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Wall clock timeout
    pub timeout: Duration,
    /// Capability table used to build the restricted namespace
    pub policy: Arc<SandboxPolicy>,
    /// Directory exposed read-only through the `datasets` accessor
    pub dataset_dir: Option<PathBuf>,
    /// Captured stdout/stderr are truncated to this many bytes
    pub max_output_bytes: usize,
    /// Environment variables to set
    pub env_vars: HashMap<String, String>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self::from_limits(&ResourceLimits::default(), Arc::new(SandboxPolicy::standard()))
    }
}

impl ExecutionOptions {
    pub fn from_limits(limits: &ResourceLimits, policy: Arc<SandboxPolicy>) -> Self {
        Self {
            timeout: limits.timeout(),
            policy,
            dataset_dir: None,
            max_output_bytes: limits.max_output_bytes,
            env_vars: HashMap::new(),
        }
    }

    pub fn with_dataset_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dataset_dir = Some(dir.into());
        self
    }
}

/// An exception that escaped the executed code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaisedException {
    /// Exception class name, e.g. `ZeroDivisionError`
    pub kind: String,
    pub message: String,
}

/// Everything a run left behind, before classification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedRun {
    pub stdout: String,
    pub stderr: String,
    pub exception: Option<RaisedException>,
}

/// Capabilities of a Python execution engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineCapabilities {
    /// Engine name
    pub name: String,
    /// Interpreter the engine launches
    pub interpreter: Option<PathBuf>,
    /// Whether runs are bounded by a wall-clock timeout
    pub enforces_timeout: bool,
    /// Whether the engine offers OS-level isolation (never true here)
    pub isolated: bool,
}

/// Trait for Python execution engines
#[async_trait]
pub trait PythonEngine: Send + Sync {
    /// Run already-validated code in a restricted namespace.
    ///
    /// Exceptions raised by the code are reported in `CapturedRun`, not as
    /// `Err`. `Err` is reserved for engine failures and `Timeout`.
    async fn run(&self, code: &str, options: &ExecutionOptions) -> Result<CapturedRun>;

    /// Get engine capabilities
    fn capabilities(&self) -> EngineCapabilities;
}
