use crate::{
    config::LinterConfig,
    errors::{Result, WorkbenchError},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

const TEMP_PREFIX: &str = "pyworkbench-lint-";

/// One finding from the static-analysis pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintDiagnostic {
    pub line: usize,
    pub column: usize,
    pub message: String,
    pub code: String,
}

/// External static-analysis pass run after the policy checks
#[async_trait]
pub trait Linter: Send + Sync {
    /// Findings for `source`, in the order the tool reports them.
    ///
    /// `Ok(None)` means the tool could not be run at all.
    async fn check(&self, source: &str) -> Result<Option<Vec<LintDiagnostic>>>;
}

#[derive(Debug, Deserialize)]
struct RuffFinding {
    code: Option<String>,
    message: String,
    location: Option<RuffLocation>,
}

#[derive(Debug, Deserialize)]
struct RuffLocation {
    row: usize,
    column: usize,
}

/// Runs `ruff` over a temporary copy of the source
pub struct RuffLinter {
    command: PathBuf,
    args: Vec<String>,
    builtins: Vec<String>,
    temp_dir: Option<PathBuf>,
}

impl RuffLinter {
    pub fn new(config: &LinterConfig) -> Self {
        Self {
            command: PathBuf::from(&config.command),
            args: config.args.clone(),
            builtins: Vec::new(),
            temp_dir: None,
        }
    }

    /// Resolve the configured command on PATH, `None` when it is not installed
    pub fn discover(config: &LinterConfig) -> Option<Self> {
        let command = which::which(&config.command).ok()?;
        Some(Self {
            command,
            ..Self::new(config)
        })
    }

    /// Names the executed code sees without importing them (`pl`, `datasets`, ...)
    pub fn with_builtins(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.builtins = names.into_iter().collect();
        self
    }

    /// Directory for the scratch copy; the system temp dir when unset
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    fn command_args(&self, file: &Path) -> Result<Vec<OsString>> {
        let mut args: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        if !self.builtins.is_empty() {
            // A JSON array of plain strings is also a TOML array
            let names = serde_json::to_string(&self.builtins)?;
            args.push("--config".into());
            args.push(format!("lint.builtins = {names}").into());
        }
        args.push(file.as_os_str().to_owned());
        Ok(args)
    }

    fn parse_findings(stdout: &str) -> Vec<LintDiagnostic> {
        match serde_json::from_str::<Vec<RuffFinding>>(stdout.trim()) {
            Ok(findings) => findings
                .into_iter()
                .map(|finding| {
                    let code = finding.code.unwrap_or_else(|| "E999".to_string());
                    let (line, column) = finding
                        .location
                        .map(|loc| (loc.row, loc.column))
                        .unwrap_or((1, 1));
                    LintDiagnostic {
                        line,
                        column,
                        message: format!("{} ({})", finding.message, code),
                        code,
                    }
                })
                .collect(),
            // Plain-text output: one finding per non-empty line
            Err(_) => stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| LintDiagnostic {
                    line: 1,
                    column: 1,
                    message: line.to_string(),
                    code: "E999".to_string(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Linter for RuffLinter {
    async fn check(&self, source: &str) -> Result<Option<Vec<LintDiagnostic>>> {
        // Removed on drop, whichever way this function returns
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX).suffix(".py");
        let mut file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(source.as_bytes())?;
        file.flush()?;

        let output = match Command::new(&self.command)
            .args(self.command_args(file.path())?)
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "[VALIDATOR] Linter {:?} not found, skipping lint pass",
                    self.command
                );
                return Ok(None);
            }
            Err(e) => return Err(WorkbenchError::Io(e)),
        };

        if output.status.success() {
            return Ok(Some(Vec::new()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut findings = Self::parse_findings(&stdout);
        if findings.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let first = stderr
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or("linter exited with an error")
                .to_string();
            findings.push(LintDiagnostic {
                line: 1,
                column: 1,
                message: first,
                code: "E999".to_string(),
            });
        }
        debug!("[VALIDATOR] Linter reported {} finding(s)", findings.len());
        Ok(Some(findings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_findings() {
        let stdout = r#"[{"code":"F401","message":"`os` imported but unused","location":{"row":1,"column":8},"filename":"/tmp/x.py"}]"#;
        let findings = RuffLinter::parse_findings(stdout);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].code, "F401");
        assert_eq!((findings[0].line, findings[0].column), (1, 8));
        assert_eq!(findings[0].message, "`os` imported but unused (F401)");
    }

    #[test]
    fn test_parse_text_findings() {
        let stdout = "x.py:1:8: F401 `os` imported but unused\n\nFound 1 error.\n";
        let findings = RuffLinter::parse_findings(stdout);
        assert_eq!(findings.len(), 2);
        assert!(findings[0].message.contains("F401"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_skipped() {
        let linter = RuffLinter::new(&LinterConfig {
            enabled: true,
            command: "definitely-not-a-linter-binary".to_string(),
            args: vec![],
        });
        let result = linter.check("x = 1\n").await.unwrap();
        assert!(result.is_none());
    }

    fn leftover_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(TEMP_PREFIX))
            })
            .collect()
    }

    #[test]
    fn test_builtins_are_passed_as_config_override() {
        let linter = RuffLinter::new(&LinterConfig::default())
            .with_builtins(["datasets".to_string(), "pl".to_string()]);
        let args = linter.command_args(Path::new("/tmp/x.py")).unwrap();
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            [
                "check",
                "--output-format",
                "json",
                "--no-cache",
                "--config",
                r#"lint.builtins = ["datasets","pl"]"#,
                "/tmp/x.py",
            ]
        );

        let plain = RuffLinter::new(&LinterConfig::default());
        let args = plain.command_args(Path::new("x.py")).unwrap();
        assert!(!args.iter().any(|a| a == "--config"));
    }

    #[tokio::test]
    async fn test_scratch_file_removed_when_binary_missing() {
        let dir = tempfile::tempdir().unwrap();
        let linter = RuffLinter::new(&LinterConfig {
            enabled: true,
            command: "definitely-not-a-linter-binary".to_string(),
            args: vec![],
        })
        .with_temp_dir(dir.path());
        assert!(linter.check("x = 1\n").await.unwrap().is_none());
        assert!(leftover_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_scratch_file_removed_after_run() {
        let Ok(shell) = which::which("sh") else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        // Succeeds like a clean lint run, after checking the copy exists
        let linter = RuffLinter::new(&LinterConfig {
            enabled: true,
            command: shell.to_string_lossy().into_owned(),
            args: vec!["-c".to_string(), "test -f \"$0\"".to_string()],
        })
        .with_temp_dir(dir.path());
        assert_eq!(linter.check("x = 1\n").await.unwrap(), Some(vec![]));
        assert!(leftover_files(dir.path()).is_empty());

        // Failing run with no parsable output
        let linter = RuffLinter::new(&LinterConfig {
            enabled: true,
            command: shell.to_string_lossy().into_owned(),
            args: vec!["-c".to_string(), "exit 1".to_string()],
        })
        .with_temp_dir(dir.path());
        let findings = linter.check("x = 1\n").await.unwrap().unwrap();
        assert_eq!(findings.len(), 1);
        assert!(leftover_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_ruff_accepts_preloaded_names() {
        let Some(linter) = RuffLinter::discover(&LinterConfig::default()) else {
            return;
        };
        let linter = linter.with_builtins(crate::policy::SandboxPolicy::standard().preloaded_names());
        let findings = linter
            .check("print(datasets.names())\nframe = pl.DataFrame()\nprint(frame)\n")
            .await
            .unwrap()
            .unwrap();
        assert!(findings.is_empty(), "{findings:?}");
    }

    #[tokio::test]
    async fn test_ruff_flags_unused_import() {
        let Some(linter) = RuffLinter::discover(&LinterConfig::default()) else {
            return;
        };
        let findings = linter.check("import os\n").await.unwrap().unwrap();
        assert!(!findings.is_empty());
    }
}
