//! Dynamic code management for a data workbench.
//!
//! Submitted Python is checked statically ([`SafetyValidator`]) and then run in
//! a restricted namespace by an external interpreter ([`ExecutionSandbox`]).
//! `@sql` submissions go through [`QueryExecutor`] against parquet datasets,
//! and reusable functions are kept in a single Python artifact managed by
//! [`FunctionRepository`].
//!
//! The restrictions are advisory. Nothing here is an OS-level sandbox.
//!
//! ```rust,ignore
//! let workbench = pyworkbench::create_default_workbench()?;
//! let result = workbench.submit("print(sum(range(10)))").await;
//! assert_eq!(result.output, "45");
//! ```

pub mod analyzer;
pub mod artifact;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod lint;
pub mod native;
pub mod parser;
pub mod policy;
pub mod query;
pub mod repository;
pub mod sandbox_builder;
pub mod sql;
pub mod workbench;

pub use analyzer::{violations, SafetyValidator, ValidationResult, Violation};
pub use artifact::{Artifact, Language, StoredFunction};
pub use catalog::{Dataset, DatasetCatalog, ParquetCatalog};
pub use config::{ImportPolicy, LinterConfig, ResourceLimits, WorkbenchConfig};
pub use engine::{CapturedRun, EngineCapabilities, ExecutionOptions, PythonEngine};
pub use errors::{ErrorKind, Result, WorkbenchError};
pub use executor::{ExecutionResult, ExecutionSandbox, NO_OUTPUT_MESSAGE};
pub use lint::{LintDiagnostic, Linter, RuffLinter};
pub use native::NativePythonEngine;
pub use policy::{ModuleBinding, SandboxPolicy};
pub use query::QueryDirective;
pub use repository::{ArtifactStore, FileArtifactStore, FunctionRepository, SaveFunctionRequest};
pub use sandbox_builder::{create_default_workbench, create_workbench, WorkbenchOptions};
pub use sql::{QueryExecutor, QueryOutcome};
pub use workbench::Workbench;
