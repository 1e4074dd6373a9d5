use crate::{
    engine::{CapturedRun, EngineCapabilities, ExecutionOptions, PythonEngine},
    errors::{Result, WorkbenchError},
    policy::DATASETS_NAME,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const OUTPUT_START: &str = "OUTPUT_JSON_START";
const OUTPUT_END: &str = "OUTPUT_JSON_END";

/// Runs inside the interpreter after `_RT_CONFIG_JSON` is defined.
///
/// Wrapper names are `_rt_`-prefixed and live in the wrapper module only; the
/// submitted code sees nothing but the restricted globals built below.
const WRAPPER_BODY: &str = r#"
import builtins as _rt_builtins
import contextlib as _rt_contextlib
import importlib as _rt_importlib
import io as _rt_io
import json as _rt_json
import os as _rt_os
import re as _rt_re
import sys as _rt_sys

_RT_CONFIG = _rt_json.loads(_RT_CONFIG_JSON)
_RT_ALLOWED = tuple(_RT_CONFIG["allowed_imports"])


def _rt_allowed(name):
    if not name or name.startswith("."):
        return False
    for entry in _RT_ALLOWED:
        if name == entry or name.startswith(entry + ".") or entry.startswith(name + "."):
            return True
    return False


_rt_real_import = _rt_builtins.__import__


def _rt_guarded_import(name, globals=None, locals=None, fromlist=(), level=0):
    if level > 0:
        raise ImportError("Relative imports are not allowed")
    if not _rt_allowed(name):
        raise ImportError(f"Import of '{name}' is not allowed")
    return _rt_real_import(name, globals, locals, fromlist, level)


class _RtDatasets:
    """Read-only view of the dataset directory."""

    __slots__ = ("_root",)

    def __init__(self, root):
        self._root = root

    def path(self, name):
        if not isinstance(name, str) or not _rt_re.fullmatch(r"[A-Za-z0-9_]+", name):
            raise ValueError(f"Invalid dataset name: {name!r}")
        if self._root is None:
            raise LookupError("No dataset directory configured")
        return _rt_os.path.join(self._root, name + ".parquet")

    def exists(self, name):
        return _rt_os.path.isfile(self.path(name))

    def names(self):
        if self._root is None or not _rt_os.path.isdir(self._root):
            return []
        return sorted(f[: -len(".parquet")] for f in _rt_os.listdir(self._root) if f.endswith(".parquet"))

    def read(self, name):
        if not self.exists(name):
            raise KeyError(f"Dataset '{name}' not found")
        return _rt_importlib.import_module("polars").read_parquet(self.path(name))

    def __repr__(self):
        return f"<datasets {self.names()!r}>"


_rt_safe_builtins = {}
for _rt_name in _RT_CONFIG["builtins"]:
    if hasattr(_rt_builtins, _rt_name):
        _rt_safe_builtins[_rt_name] = getattr(_rt_builtins, _rt_name)
_rt_safe_builtins["__import__"] = _rt_guarded_import

_rt_globals = {"__builtins__": _rt_safe_builtins, "__name__": "__main__"}

# Import noise from optional packages must not reach the captured streams
with _rt_contextlib.redirect_stdout(_rt_io.StringIO()), _rt_contextlib.redirect_stderr(_rt_io.StringIO()):
    for _rt_binding in _RT_CONFIG["bindings"]:
        try:
            _rt_value = _rt_importlib.import_module(_rt_binding["module"])
            if _rt_binding.get("attribute"):
                _rt_value = getattr(_rt_value, _rt_binding["attribute"])
        except Exception:
            continue
        _rt_globals[_rt_binding["alias"]] = _rt_value

_rt_globals[_RT_CONFIG["datasets_name"]] = _RtDatasets(_RT_CONFIG.get("dataset_dir"))

_rt_stdout = _rt_io.StringIO()
_rt_stderr = _rt_io.StringIO()
_rt_exception = None
try:
    with _rt_contextlib.redirect_stdout(_rt_stdout), _rt_contextlib.redirect_stderr(_rt_stderr):
        _rt_code = compile(_RT_CONFIG["source"], "<submission>", "exec")
        exec(_rt_code, _rt_globals, {})
except BaseException as _rt_error:
    _rt_exception = {"kind": type(_rt_error).__name__, "message": str(_rt_error)}

_rt_out = _rt_sys.__stdout__
_rt_out.write("OUTPUT_JSON_START\n")
_rt_out.write(_rt_json.dumps({
    "stdout": _rt_stdout.getvalue(),
    "stderr": _rt_stderr.getvalue(),
    "exception": _rt_exception,
}))
_rt_out.write("\nOUTPUT_JSON_END\n")
_rt_out.flush()
"#;

#[derive(Debug, Deserialize)]
struct WrapperOutput {
    stdout: String,
    stderr: String,
    exception: Option<crate::engine::RaisedException>,
}

/// Runs submitted code in a fresh CPython subprocess with a restricted namespace
pub struct NativePythonEngine {
    python_path: PathBuf,
}

impl NativePythonEngine {
    /// Create a new native Python engine (finds Python in PATH)
    pub fn new() -> Result<Self> {
        let python_path = which::which("python3")
            .or_else(|_| which::which("python"))
            .map_err(|_| WorkbenchError::PythonNotFound)?;

        Ok(Self { python_path })
    }

    /// Create with explicit Python path or executable name
    pub fn with_python_path(python_path: PathBuf) -> Result<Self> {
        let python_path = which::which(&python_path).map_err(|_| WorkbenchError::PythonNotFound)?;
        Ok(Self { python_path })
    }

    /// Get the Python executable path being used
    pub fn python_path(&self) -> &Path {
        &self.python_path
    }

    /// The complete program fed to the interpreter on stdin
    fn wrapper_program(code: &str, options: &ExecutionOptions) -> Result<String> {
        let policy = &options.policy;
        let config = serde_json::json!({
            "source": code,
            "allowed_imports": policy.imports.entries().collect::<Vec<_>>(),
            "builtins": &policy.builtins,
            "bindings": &policy.bindings,
            "dataset_dir": options
                .dataset_dir
                .as_ref()
                .map(|dir| dir.to_string_lossy().into_owned()),
            "datasets_name": DATASETS_NAME,
        });

        // A JSON string literal is also a valid Python string literal
        let literal = serde_json::to_string(&config.to_string())?;
        Ok(format!("_RT_CONFIG_JSON = {literal}\n{WRAPPER_BODY}"))
    }

    fn parse_output(stdout: &str, stderr: &str, max_bytes: usize) -> Result<CapturedRun> {
        let payload = stdout
            .rfind(OUTPUT_START)
            .and_then(|start| {
                let body = &stdout[start + OUTPUT_START.len()..];
                body.find(OUTPUT_END).map(|end| body[..end].trim())
            })
            .ok_or_else(|| {
                let detail = stderr.trim();
                WorkbenchError::Runtime(if detail.is_empty() {
                    "interpreter exited without producing a result".to_string()
                } else {
                    truncate(detail, max_bytes)
                })
            })?;

        let parsed: WrapperOutput = serde_json::from_str(payload)?;
        Ok(CapturedRun {
            stdout: truncate(&parsed.stdout, max_bytes),
            stderr: truncate(&parsed.stderr, max_bytes),
            exception: parsed.exception,
        })
    }
}

fn truncate(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n... [output truncated]", &text[..cut])
}

#[async_trait]
impl PythonEngine for NativePythonEngine {
    async fn run(&self, code: &str, options: &ExecutionOptions) -> Result<CapturedRun> {
        let program = Self::wrapper_program(code, options)?;

        let mut cmd = Command::new(&self.python_path);
        cmd.arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("MPLBACKEND", "Agg")
            .kill_on_drop(true);
        for (key, value) in &options.env_vars {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take();
        debug!(
            "[SANDBOX] Spawned {:?} (pid {:?})",
            self.python_path,
            child.id()
        );

        let run = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(program.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };

        // Dropping the future on expiry drops the child, which kills it
        let output = match tokio::time::timeout(options.timeout, run).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(
                    "[SANDBOX] Execution exceeded {:?}, interpreter killed",
                    options.timeout
                );
                return Err(WorkbenchError::Timeout);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Self::parse_output(&stdout, &stderr, options.max_output_bytes)
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            name: "Native Python (restricted namespace)".to_string(),
            interpreter: Some(self.python_path.clone()),
            enforces_timeout: true,
            isolated: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn engine() -> Option<NativePythonEngine> {
        NativePythonEngine::new().ok()
    }

    #[test]
    fn test_wrapper_embeds_source_as_literal() {
        let program =
            NativePythonEngine::wrapper_program("print(\"a\\nb\")\n", &ExecutionOptions::default())
                .unwrap();
        assert!(program.starts_with("_RT_CONFIG_JSON = \""));
        assert!(program.contains(OUTPUT_START));
        assert!(!program.contains("print(\"a\\nb\")\n"));
    }

    #[test]
    fn test_parse_output_uses_last_marker_block() {
        let stdout = "noise\nOUTPUT_JSON_START\n{\"stdout\":\"hi\\n\",\"stderr\":\"\",\"exception\":null}\nOUTPUT_JSON_END\n";
        let run = NativePythonEngine::parse_output(stdout, "", 1024).unwrap();
        assert_eq!(run.stdout, "hi\n");
        assert!(run.exception.is_none());
    }

    #[test]
    fn test_parse_output_without_markers_is_runtime_error() {
        let err = NativePythonEngine::parse_output("", "Fatal Python error", 1024).unwrap_err();
        assert!(matches!(err, WorkbenchError::Runtime(msg) if msg.contains("Fatal")));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "héllo";
        let cut = truncate(text, 2);
        assert!(cut.starts_with('h'));
        assert!(cut.ends_with("[output truncated]"));
        assert_eq!(truncate("short", 10), "short");
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let result =
            NativePythonEngine::with_python_path(PathBuf::from("/nonexistent/bin/python3"));
        assert!(matches!(result, Err(WorkbenchError::PythonNotFound)));
    }

    #[tokio::test]
    async fn test_captures_stdout_and_bindings() {
        let Some(engine) = engine() else { return };
        let run = engine
            .run("print(math.sqrt(16))\n", &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(run.stdout.trim(), "4.0");
        assert!(run.exception.is_none());
    }

    #[tokio::test]
    async fn test_exception_is_captured() {
        let Some(engine) = engine() else { return };
        let run = engine
            .run("x = 1 / 0\n", &ExecutionOptions::default())
            .await
            .unwrap();
        let exception = run.exception.unwrap();
        assert_eq!(exception.kind, "ZeroDivisionError");
    }

    #[tokio::test]
    async fn test_dangerous_builtins_are_absent() {
        let Some(engine) = engine() else { return };
        let run = engine
            .run("open('/etc/hostname')\n", &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(run.exception.unwrap().kind, "NameError");
    }

    #[tokio::test]
    async fn test_runtime_import_guard() {
        let Some(engine) = engine() else { return };
        let run = engine
            .run("import not_on_the_list\n", &ExecutionOptions::default())
            .await
            .unwrap();
        let exception = run.exception.unwrap();
        assert_eq!(exception.kind, "ImportError");
        assert!(exception.message.contains("not allowed"));
    }

    #[tokio::test]
    async fn test_dataset_accessor_lists_directory() {
        let Some(engine) = engine() else { return };
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("orders.parquet"), b"").unwrap();
        let options = ExecutionOptions::default().with_dataset_dir(dir.path());
        let run = engine
            .run("print(datasets.names(), datasets.exists('items'))\n", &options)
            .await
            .unwrap();
        assert_eq!(run.stdout.trim(), "['orders'] False");
    }

    #[tokio::test]
    async fn test_timeout_kills_interpreter() {
        let Some(engine) = engine() else { return };
        let options = ExecutionOptions {
            timeout: Duration::from_secs(1),
            ..ExecutionOptions::default()
        };
        let result = engine.run("while True:\n    pass\n", &options).await;
        assert!(matches!(result, Err(WorkbenchError::Timeout)));
    }
}
