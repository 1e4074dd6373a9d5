use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkbenchError>;

#[derive(Error, Debug)]
pub enum WorkbenchError {
    #[error("Syntax error at line {line}, column {column}: {message}")]
    SyntaxError {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Unsafe import detected: {0} - only standard library modules and approved packages are allowed")]
    UnsafeImport(String),

    #[error("Unsafe function call detected: {0}")]
    UnsafeCall(String),

    #[error("Lint error: {0}")]
    Lint(String),

    /// Validator rejection as seen by execution callers; carries the reason as is
    #[error("{0}")]
    CodeValidation(String),

    #[error("Runtime error during execution: {0}")]
    Runtime(String),

    #[error("Missing datasets: {}", .0.join(", "))]
    MissingDatasets(Vec<String>),

    #[error("SQL execution error: {0}")]
    QueryExecution(String),

    #[error("A function named '{0}' already exists")]
    NameConflict(String),

    #[error("'{0}' not found")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Python not installed or not found in PATH")]
    PythonNotFound,

    #[error("Execution timeout exceeded")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl WorkbenchError {
    /// The taxonomy tag reported to callers for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkbenchError::SyntaxError { .. } => ErrorKind::SyntaxError,
            WorkbenchError::UnsafeImport(_) => ErrorKind::UnsafeImportError,
            WorkbenchError::UnsafeCall(_) => ErrorKind::UnsafeCallError,
            WorkbenchError::Lint(_) => ErrorKind::LintError,
            WorkbenchError::CodeValidation(_) => ErrorKind::CodeValidationError,
            WorkbenchError::Runtime(_) | WorkbenchError::PythonNotFound => ErrorKind::RuntimeError,
            WorkbenchError::MissingDatasets(_) => ErrorKind::SqlValidationError,
            WorkbenchError::QueryExecution(_) | WorkbenchError::Polars(_) => {
                ErrorKind::QueryExecutionError
            }
            WorkbenchError::NameConflict(_) => ErrorKind::NameConflictError,
            WorkbenchError::NotFound(_) => ErrorKind::NotFoundError,
            WorkbenchError::Validation(_) => ErrorKind::ValidationError,
            WorkbenchError::Timeout => ErrorKind::TimeoutError,
            WorkbenchError::Io(_) | WorkbenchError::Json(_) => ErrorKind::IoError,
        }
    }
}

impl From<polars::prelude::PolarsError> for WorkbenchError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        WorkbenchError::Polars(err.to_string())
    }
}

/// Error tag carried by `ValidationResult` and `ExecutionResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    SyntaxError,
    UnsafeImportError,
    UnsafeCallError,
    LintError,
    CodeValidationError,
    RuntimeError,
    #[serde(rename = "SQLValidationError")]
    SqlValidationError,
    QueryExecutionError,
    NameConflictError,
    NotFoundError,
    ValidationError,
    #[serde(rename = "IOError")]
    IoError,
    TimeoutError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::UnsafeImportError => "UnsafeImportError",
            ErrorKind::UnsafeCallError => "UnsafeCallError",
            ErrorKind::LintError => "LintError",
            ErrorKind::CodeValidationError => "CodeValidationError",
            ErrorKind::RuntimeError => "RuntimeError",
            ErrorKind::SqlValidationError => "SQLValidationError",
            ErrorKind::QueryExecutionError => "QueryExecutionError",
            ErrorKind::NameConflictError => "NameConflictError",
            ErrorKind::NotFoundError => "NotFoundError",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::IoError => "IOError",
            ErrorKind::TimeoutError => "TimeoutError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            WorkbenchError::UnsafeImport("socket".into()).kind(),
            ErrorKind::UnsafeImportError
        );
        assert_eq!(
            WorkbenchError::MissingDatasets(vec!["a".into()]).kind(),
            ErrorKind::SqlValidationError
        );
        let rejected = WorkbenchError::CodeValidation("Syntax error at line 1".into());
        assert_eq!(rejected.kind(), ErrorKind::CodeValidationError);
        assert_eq!(rejected.to_string(), "Syntax error at line 1");
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(WorkbenchError::from(io).kind(), ErrorKind::IoError);
    }

    #[test]
    fn test_missing_datasets_lists_every_name() {
        let err = WorkbenchError::MissingDatasets(vec!["orders".into(), "items".into()]);
        assert_eq!(err.to_string(), "Missing datasets: orders, items");
    }

    #[test]
    fn test_kind_serializes_with_taxonomy_names() {
        let json = serde_json::to_string(&ErrorKind::SqlValidationError).unwrap();
        assert_eq!(json, "\"SQLValidationError\"");
        let json = serde_json::to_string(&ErrorKind::IoError).unwrap();
        assert_eq!(json, "\"IOError\"");
        assert_eq!(ErrorKind::RuntimeError.to_string(), "RuntimeError");
    }
}
