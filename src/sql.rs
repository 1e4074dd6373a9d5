use crate::{
    catalog::{Dataset, DatasetCatalog},
    errors::{Result, WorkbenchError},
    query::QueryDirective,
};
use polars::prelude::*;
use polars::sql::SQLContext;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a query run
#[derive(Debug)]
pub struct QueryOutcome {
    pub frame: DataFrame,
    pub directive: QueryDirective,
    /// Set when the directive asked for the result to be saved
    pub persisted: Option<Dataset>,
}

impl QueryOutcome {
    /// Table rendering plus a note when the result was saved
    pub fn render(&self) -> String {
        match &self.persisted {
            Some(dataset) => format!("{}\nResults saved as: {}", self.frame, dataset.name),
            None => self.frame.to_string(),
        }
    }
}

/// Runs directive-annotated SQL against catalog datasets
pub struct QueryExecutor {
    catalog: Arc<dyn DatasetCatalog>,
}

impl QueryExecutor {
    pub fn new(catalog: Arc<dyn DatasetCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<dyn DatasetCatalog> {
        &self.catalog
    }

    /// Every referenced dataset must exist; all missing names are reported at once.
    pub fn check_datasets(&self, directive: &QueryDirective) -> Result<()> {
        let missing: Vec<String> = directive
            .referenced_tables
            .iter()
            .filter(|name| !self.catalog.exists(name))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(WorkbenchError::MissingDatasets(missing))
        }
    }

    pub fn run(&self, text: &str) -> Result<QueryOutcome> {
        let directive = QueryDirective::parse(text);
        self.check_datasets(&directive)?;

        let mut ctx = SQLContext::new();
        for name in &directive.referenced_tables {
            let frame = self.catalog.load(name).map_err(query_failure)?;
            debug!("[QUERY] Registered {} (shape {:?})", name, frame.shape());
            ctx.register(name, frame.lazy());
        }

        let mut frame = ctx
            .execute(&directive.query_text)
            .and_then(|plan| plan.collect())
            .map_err(|e| WorkbenchError::QueryExecution(e.to_string()))?;

        let persisted = match &directive.persist_as {
            Some(name) => Some(self.catalog.save(&mut frame, name).map_err(query_failure)?),
            None => None,
        };

        info!(
            "[QUERY] Query over {} table(s) returned {} row(s)",
            directive.referenced_tables.len(),
            frame.height()
        );
        Ok(QueryOutcome {
            frame,
            directive,
            persisted,
        })
    }
}

fn query_failure(err: WorkbenchError) -> WorkbenchError {
    match err {
        WorkbenchError::QueryExecution(_) => err,
        other => WorkbenchError::QueryExecution(other.to_string()),
    }
}
