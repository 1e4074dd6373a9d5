use crate::{
    errors::{ErrorKind, Result, WorkbenchError},
    lint::{LintDiagnostic, Linter},
    parser::ParsedSource,
    policy::SandboxPolicy,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of a safety check, consumed once by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub ok: bool,
    pub reason: Option<String>,
    pub kind: Option<ErrorKind>,
}

impl ValidationResult {
    pub fn passed() -> Self {
        Self {
            ok: true,
            reason: None,
            kind: None,
        }
    }

    pub fn rejected(err: &WorkbenchError) -> Self {
        Self {
            ok: false,
            reason: Some(err.to_string()),
            kind: Some(err.kind()),
        }
    }
}

impl From<Result<()>> for ValidationResult {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::passed(),
            Err(e) => Self::rejected(&e),
        }
    }
}

/// A single policy breach found by the static pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },
    UnsafeImport {
        module: String,
        line: usize,
    },
    UnsafeCall {
        name: String,
        line: usize,
    },
}

impl From<Violation> for WorkbenchError {
    fn from(violation: Violation) -> Self {
        match violation {
            Violation::Syntax {
                line,
                column,
                message,
            } => WorkbenchError::SyntaxError {
                line,
                column,
                message,
            },
            Violation::UnsafeImport { module, .. } => WorkbenchError::UnsafeImport(module),
            Violation::UnsafeCall { name, .. } => WorkbenchError::UnsafeCall(name),
        }
    }
}

/// Every policy violation in `source`: a syntax error alone, or all import
/// violations followed by all denied calls, each in document order.
pub fn violations(source: &str, policy: &SandboxPolicy) -> Vec<Violation> {
    let parsed = match ParsedSource::parse(source) {
        Ok(parsed) => parsed,
        Err(WorkbenchError::SyntaxError {
            line,
            column,
            message,
        }) => {
            return vec![Violation::Syntax {
                line,
                column,
                message,
            }]
        }
        Err(other) => {
            return vec![Violation::Syntax {
                line: 1,
                column: 1,
                message: other.to_string(),
            }]
        }
    };

    let imports = parsed
        .imports()
        .into_iter()
        .filter(|import| !policy.imports.is_allowed(&import.module))
        .map(|import| Violation::UnsafeImport {
            module: import.module,
            line: import.line,
        });

    let calls = parsed
        .bare_calls()
        .into_iter()
        .filter(|call| policy.is_call_denied(&call.name))
        .map(|call| Violation::UnsafeCall {
            name: call.name,
            line: call.line,
        });

    imports.chain(calls).collect()
}

/// Static policy enforcement ahead of execution.
///
/// Advisory hardening only: passing code is not confined in any way.
pub struct SafetyValidator {
    policy: Arc<SandboxPolicy>,
    linter: Option<Arc<dyn Linter>>,
}

impl SafetyValidator {
    pub fn new(policy: Arc<SandboxPolicy>, linter: Option<Arc<dyn Linter>>) -> Self {
        Self { policy, linter }
    }

    /// Validator with the standard policy and no lint pass
    pub fn without_linter() -> Self {
        Self::new(Arc::new(SandboxPolicy::standard()), None)
    }

    pub fn policy(&self) -> &Arc<SandboxPolicy> {
        &self.policy
    }

    /// Syntax, import and call checks, short-circuiting on the first failure
    pub fn check_policy(&self, source: &str) -> Result<()> {
        match violations(source, &self.policy).into_iter().next() {
            Some(violation) => Err(violation.into()),
            None => Ok(()),
        }
    }

    /// All checks including the lint pass
    pub async fn check(&self, source: &str) -> Result<()> {
        self.check_policy(source)?;

        if let Some(linter) = &self.linter {
            if let Some(findings) = linter.check(source).await? {
                if let Some(first) = findings.into_iter().next() {
                    return Err(WorkbenchError::Lint(first.message));
                }
            }
        }
        Ok(())
    }

    pub async fn validate(&self, source: &str) -> ValidationResult {
        let result = self.check(source).await;
        match &result {
            Ok(()) => debug!("[VALIDATOR] Code passed all checks"),
            Err(e) => info!("[VALIDATOR] Code rejected: {}", e),
        }
        result.into()
    }

    /// Editor-facing findings: a single `E999` entry for a syntax error,
    /// otherwise whatever the linter reports.
    pub async fn diagnostics(&self, source: &str) -> Vec<LintDiagnostic> {
        if let Err(err) = ParsedSource::parse(source) {
            let (line, column) = match &err {
                WorkbenchError::SyntaxError { line, column, .. } => (*line, *column),
                _ => (1, 1),
            };
            return vec![LintDiagnostic {
                line,
                column,
                message: err.to_string(),
                code: "E999".to_string(),
            }];
        }

        let Some(linter) = &self.linter else {
            return Vec::new();
        };
        match linter.check(source).await {
            Ok(findings) => findings.unwrap_or_default(),
            Err(e) => vec![LintDiagnostic {
                line: 1,
                column: 1,
                message: format!("Linting error: {e}"),
                code: "E999".to_string(),
            }],
        }
    }
}
