use crate::{
    analyzer::SafetyValidator,
    catalog::{DatasetCatalog, ParquetCatalog},
    config::WorkbenchConfig,
    engine::{ExecutionOptions, PythonEngine},
    lint::{Linter, RuffLinter},
    native::NativePythonEngine,
    policy::SandboxPolicy,
    repository::FunctionRepository,
    workbench::Workbench,
    Result,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Options for creating a workbench
#[derive(Default)]
pub struct WorkbenchOptions {
    /// Paths, interpreter, linter and limits
    pub config: WorkbenchConfig,
    /// Capability tables; the standard policy when unset
    pub policy: Option<SandboxPolicy>,
    /// Execution engine; a native interpreter is discovered when unset
    pub engine: Option<Arc<dyn PythonEngine>>,
    /// Lint pass; `ruff` is discovered when unset and enabled in config
    pub linter: Option<Arc<dyn Linter>>,
}

impl WorkbenchOptions {
    pub fn from_config(config: WorkbenchConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Options for a bundled interpreter
    pub fn bundled(python_path: PathBuf) -> Self {
        let mut options = Self::default();
        options.config.python_path = Some(python_path);
        options
    }

    pub fn with_policy(mut self, policy: SandboxPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn PythonEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_linter(mut self, linter: Arc<dyn Linter>) -> Self {
        self.linter = Some(linter);
        self
    }
}

fn resolve_linter(options: &WorkbenchOptions, policy: &SandboxPolicy) -> Option<Arc<dyn Linter>> {
    if let Some(linter) = &options.linter {
        return Some(linter.clone());
    }
    let config = &options.config.linter;
    if !config.enabled {
        info!("[VALIDATOR] Lint pass disabled by configuration");
        return None;
    }
    match RuffLinter::discover(config) {
        Some(linter) => Some(Arc::new(linter.with_builtins(policy.preloaded_names()))),
        None => {
            warn!(
                "[VALIDATOR] Linter '{}' not found on PATH, lint pass skipped",
                config.command
            );
            None
        }
    }
}

fn resolve_engine(options: &WorkbenchOptions) -> Result<Arc<dyn PythonEngine>> {
    if let Some(engine) = &options.engine {
        return Ok(engine.clone());
    }
    let engine = match &options.config.python_path {
        Some(path) => NativePythonEngine::with_python_path(path.clone())?,
        None => NativePythonEngine::new()?,
    };
    info!("[SANDBOX] Using interpreter {:?}", engine.python_path());
    Ok(Arc::new(engine))
}

/// Create a workbench with custom options
pub fn create_workbench(options: WorkbenchOptions) -> Result<Workbench> {
    let policy = Arc::new(options.policy.clone().unwrap_or_default());
    let linter = resolve_linter(&options, &policy);
    let engine = resolve_engine(&options)?;

    let catalog = ParquetCatalog::new(&options.config.dataset_dir)?;
    let execution = ExecutionOptions::from_limits(&options.config.limits, policy.clone())
        .with_dataset_dir(catalog.root());
    let catalog: Arc<dyn DatasetCatalog> = Arc::new(catalog);
    let functions = FunctionRepository::open(&options.config.functions_path);
    let validator = Arc::new(SafetyValidator::new(policy, linter));

    Ok(Workbench::new(
        options.config,
        validator,
        engine,
        execution,
        catalog,
        functions,
    ))
}

/// Create a workbench from `PYWORKBENCH_*` environment settings
pub fn create_default_workbench() -> Result<Workbench> {
    create_workbench(WorkbenchOptions::from_config(WorkbenchConfig::from_env()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinterConfig;

    #[test]
    fn test_disabled_linter_resolves_to_none() {
        let mut options = WorkbenchOptions::default();
        options.config.linter = LinterConfig {
            enabled: false,
            ..LinterConfig::default()
        };
        assert!(resolve_linter(&options, &SandboxPolicy::standard()).is_none());
    }

    #[test]
    fn test_missing_linter_resolves_to_none() {
        let mut options = WorkbenchOptions::default();
        options.config.linter.command = "no-such-linter-on-path".to_string();
        assert!(resolve_linter(&options, &SandboxPolicy::standard()).is_none());
    }

    #[test]
    fn test_bad_interpreter_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = WorkbenchOptions::bundled(PathBuf::from("/nonexistent/python3"));
        options.config.dataset_dir = dir.path().join("data");
        options.config.functions_path = dir.path().join("fns.py");
        assert!(matches!(
            create_workbench(options),
            Err(crate::WorkbenchError::PythonNotFound)
        ));
    }
}
