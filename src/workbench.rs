use crate::{
    analyzer::{SafetyValidator, ValidationResult},
    artifact::StoredFunction,
    catalog::DatasetCatalog,
    config::WorkbenchConfig,
    engine::{EngineCapabilities, ExecutionOptions, PythonEngine},
    errors::{Result, WorkbenchError},
    executor::{ExecutionResult, ExecutionSandbox},
    lint::LintDiagnostic,
    query::is_query,
    repository::{FunctionRepository, SaveFunctionRequest},
    sql::{QueryExecutor, QueryOutcome},
};
use std::sync::Arc;
use tracing::info;

/// The inbound surface: validation, execution, queries and the function catalog
pub struct Workbench {
    config: WorkbenchConfig,
    sandbox: ExecutionSandbox,
    queries: Arc<QueryExecutor>,
    functions: FunctionRepository,
}

impl Workbench {
    pub fn new(
        config: WorkbenchConfig,
        validator: Arc<SafetyValidator>,
        engine: Arc<dyn PythonEngine>,
        options: ExecutionOptions,
        catalog: Arc<dyn DatasetCatalog>,
        functions: FunctionRepository,
    ) -> Self {
        Self {
            config,
            sandbox: ExecutionSandbox::new(validator, engine, options),
            queries: Arc::new(QueryExecutor::new(catalog)),
            functions,
        }
    }

    pub fn config(&self) -> &WorkbenchConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn DatasetCatalog> {
        self.queries.catalog()
    }

    pub fn engine_capabilities(&self) -> EngineCapabilities {
        self.sandbox.engine_capabilities()
    }

    pub async fn validate(&self, source: &str) -> ValidationResult {
        self.sandbox.validator().validate(source).await
    }

    pub async fn diagnostics(&self, source: &str) -> Vec<LintDiagnostic> {
        self.sandbox.validator().diagnostics(source).await
    }

    pub async fn execute(&self, source: &str) -> ExecutionResult {
        self.sandbox.execute(source).await
    }

    /// Route `@sql` text to the query executor and everything else to the sandbox
    pub async fn submit(&self, code: &str) -> ExecutionResult {
        if !is_query(code) {
            return self.execute(code).await;
        }

        info!("[QUERY] Dispatching submission to the query executor");
        let queries = Arc::clone(&self.queries);
        let text = code.to_string();
        // Parquet reads and the polars plan are blocking work
        let rendered =
            tokio::task::spawn_blocking(move || queries.run(&text).map(|outcome| outcome.render()))
                .await
                .unwrap_or_else(|e| Err(WorkbenchError::QueryExecution(e.to_string())));
        match rendered {
            Ok(output) => ExecutionResult::succeeded(output),
            Err(e) => ExecutionResult::from_error(&e),
        }
    }

    pub fn run_query(&self, text: &str) -> Result<QueryOutcome> {
        self.queries.run(text)
    }

    pub fn save_function(&self, request: SaveFunctionRequest) -> Result<StoredFunction> {
        self.functions.save(request)
    }

    pub fn list_functions(&self) -> Result<Vec<StoredFunction>> {
        self.functions.list()
    }

    pub fn get_function(&self, name: &str) -> Result<StoredFunction> {
        self.functions.get(name)
    }

    pub fn delete_function(&self, name: &str) -> Result<()> {
        self.functions.delete(name)
    }
}
