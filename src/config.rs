use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for a workbench instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbenchConfig {
    /// Directory holding one parquet file per dataset
    pub dataset_dir: PathBuf,
    /// The single source artifact holding user-defined functions
    pub functions_path: PathBuf,
    /// Python interpreter; discovered on PATH when unset
    pub python_path: Option<PathBuf>,
    /// External static-analysis pass
    pub linter: LinterConfig,
    /// Execution limits
    pub limits: ResourceLimits,
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("data").join("local_storage"),
            functions_path: PathBuf::from("functions").join("user_defined.py"),
            python_path: None,
            linter: LinterConfig::default(),
            limits: ResourceLimits::default(),
        }
    }
}

impl WorkbenchConfig {
    /// Load a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Defaults overlaid with `PYWORKBENCH_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Overlay `PYWORKBENCH_*` environment variables onto this config
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = env_path("PYWORKBENCH_DATASET_DIR") {
            self.dataset_dir = dir;
        }
        if let Some(path) = env_path("PYWORKBENCH_FUNCTIONS_PATH") {
            self.functions_path = path;
        }
        if let Some(python) = env_path("PYWORKBENCH_PYTHON") {
            self.python_path = Some(python);
        }
        if let Ok(linter) = std::env::var("PYWORKBENCH_LINTER") {
            let linter = linter.trim();
            if linter.eq_ignore_ascii_case("off") || linter.eq_ignore_ascii_case("none") {
                self.linter.enabled = false;
            } else if !linter.is_empty() {
                self.linter.enabled = true;
                self.linter.command = linter.to_string();
            }
        }
        if let Some(secs) = std::env::var("PYWORKBENCH_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            self.limits.timeout_seconds = secs.clamp(1, 600);
        }
        self
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// External linter invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinterConfig {
    pub enabled: bool,
    /// Executable name or path
    pub command: String,
    /// Arguments placed before the file path
    pub args: Vec<String>,
}

impl Default for LinterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "ruff".to_string(),
            args: vec![
                "check".to_string(),
                "--output-format".to_string(),
                "json".to_string(),
                "--no-cache".to_string(),
            ],
        }
    }
}

/// Resource limits for sandboxed execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Wall-clock timeout in seconds
    pub timeout_seconds: u64,
    /// Captured stdout/stderr beyond this many bytes is truncated
    pub max_output_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl ResourceLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

/// Import allow-list: anything not matched is rejected
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportPolicy {
    allowed: BTreeSet<String>,
}

impl ImportPolicy {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allow(&mut self, module: impl Into<String>) {
        self.allowed.insert(module.into());
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }

    /// Check if an import is allowed.
    ///
    /// A module passes when it equals an entry, when an entry is a dotted
    /// prefix of it, or when it is a dotted prefix of an entry. Relative
    /// imports never pass.
    pub fn is_allowed(&self, module: &str) -> bool {
        if module.is_empty() || module.starts_with('.') {
            return false;
        }
        self.allowed
            .iter()
            .any(|entry| is_dotted_prefix(entry, module) || is_dotted_prefix(module, entry))
    }
}

fn is_dotted_prefix(prefix: &str, name: &str) -> bool {
    match name.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('.'),
        None => false,
    }
}
