use anyhow::Context;
use pyworkbench::{
    create_workbench, ExecutionResult, SaveFunctionRequest, Workbench, WorkbenchConfig,
    WorkbenchError, WorkbenchOptions,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, Clone, Default)]
struct WorkerArgs {
    config_file: Option<PathBuf>,
    dataset_dir: Option<PathBuf>,
    functions_path: Option<PathBuf>,
    python_path: Option<PathBuf>,
}

impl WorkerArgs {
    fn parse(args: &[String]) -> Self {
        let mut parsed = Self::default();
        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1).map(PathBuf::from);
            match args[i].as_str() {
                "--config" => parsed.config_file = value,
                "--dataset-dir" => parsed.dataset_dir = value,
                "--functions-path" => parsed.functions_path = value,
                "--python-path" => parsed.python_path = value,
                _ => {
                    i += 1;
                    continue;
                }
            }
            i += 2;
        }
        parsed
    }

    /// File (or defaults), then `PYWORKBENCH_*` variables, then flags
    fn into_config(self) -> anyhow::Result<WorkbenchConfig> {
        let base = match &self.config_file {
            Some(path) => WorkbenchConfig::from_file(path)
                .with_context(|| format!("failed to read config {}", path.display()))?,
            None => WorkbenchConfig::default(),
        };
        let mut config = base.with_env_overrides();
        if let Some(dir) = self.dataset_dir {
            config.dataset_dir = dir;
        }
        if let Some(path) = self.functions_path {
            config.functions_path = path;
        }
        if let Some(python) = self.python_path {
            config.python_path = Some(python);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "pyworkbench_worker=info,pyworkbench=info".to_string()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = WorkerArgs::parse(&args).into_config()?;
    tracing::info!(
        "pyworkbench-worker starting (datasets={:?}, functions={:?})",
        config.dataset_dir,
        config.functions_path
    );
    let workbench = Arc::new(
        create_workbench(WorkbenchOptions::from_config(config))
            .context("failed to create workbench")?,
    );

    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("invalid json-rpc line: {} | err={}", line, e);
                continue;
            }
        };

        let response = handle_message(&workbench, parsed).await;
        if let Some(resp) = response {
            let s = serde_json::to_string(&resp)?;
            stdout.write_all(s.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}

async fn handle_message(workbench: &Arc<Workbench>, msg: Value) -> Option<Value> {
    let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let id = msg.get("id").cloned();
    let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));

    // Notifications have no id: ignore most, but allow "exit" to terminate.
    if id.is_none() {
        if method == "exit" {
            std::process::exit(0);
        }
        return None;
    }

    let result = match method {
        "initialize" => Ok(json!({
            "protocolVersion": "2025-06-18",
            "serverInfo": {
                "name": "pyworkbench worker",
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "tools": { "listChanged": false }
            }
        })),
        "tools/list" => Ok(json!({ "tools": tools_list() })),
        "tools/call" => call_tool(workbench, &params).await,
        "shutdown" => {
            std::process::exit(0);
        }
        _ => Err(json!({
            "code": -32601,
            "message": format!("Method not found: {}", method)
        })),
    };

    Some(match result {
        Ok(v) => json!({ "jsonrpc": "2.0", "result": v, "id": id }),
        Err(err_obj) => json!({ "jsonrpc": "2.0", "error": err_obj, "id": id }),
    })
}

fn code_tool(name: &str, description: &str, field: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": { field: { "type": "string" } },
            "required": [field],
            "additionalProperties": false
        }
    })
}

fn name_tool(name: &str, description: &str) -> Value {
    code_tool(name, description, "name")
}

fn tools_list() -> Vec<Value> {
    vec![
        json!({
            "name": "workbench.ping",
            "description": "Health check for the workbench worker.",
            "inputSchema": { "type": "object", "properties": {}, "additionalProperties": false }
        }),
        code_tool(
            "workbench.validate",
            "Statically check Python code against the import and call policy and the linter.",
            "code",
        ),
        code_tool(
            "workbench.diagnostics",
            "Editor lint findings for Python code.",
            "code",
        ),
        code_tool(
            "workbench.execute",
            "Validate and run Python code in the restricted namespace.",
            "code",
        ),
        code_tool(
            "workbench.submit",
            "Run a submission: `@sql` text goes to the query engine, anything else to the Python sandbox.",
            "code",
        ),
        code_tool(
            "workbench.run_query",
            "Run SQL over stored datasets. A trailing `-- save_as: NAME` comment saves the result.",
            "query",
        ),
        json!({
            "name": "workbench.save_function",
            "description": "Store or update a named function in the function repository.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "code": { "type": "string" },
                    "description": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "language": { "type": "string", "description": "Defaults to python." },
                    "is_update": { "type": "boolean" }
                },
                "required": ["name", "code"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "workbench.list_functions",
            "description": "List stored functions with their metadata and code.",
            "inputSchema": { "type": "object", "properties": {}, "additionalProperties": false }
        }),
        name_tool("workbench.get_function", "Fetch one stored function."),
        name_tool("workbench.delete_function", "Delete a stored function."),
        json!({
            "name": "workbench.list_datasets",
            "description": "List stored datasets.",
            "inputSchema": { "type": "object", "properties": {}, "additionalProperties": false }
        }),
        name_tool("workbench.dataset_schema", "Column names and types of a dataset."),
    ]
}

fn normalize_tool_name(name: &str) -> String {
    name.replace(['.', '/'], "_")
}

fn string_arg<'a>(args: &'a Value, key: &str) -> std::result::Result<&'a str, Value> {
    args.get(key).and_then(|v| v.as_str()).ok_or_else(|| {
        json!({ "code": -32602, "message": format!("Missing required argument: {key}") })
    })
}

fn text_result(text: impl Into<String>, structured: Value, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text.into() }],
        "structuredContent": structured,
        "isError": is_error
    })
}

fn execution_result(result: &ExecutionResult) -> Value {
    text_result(result.output.clone(), json!(result), !result.success)
}

fn error_result(err: &WorkbenchError) -> Value {
    text_result(
        err.to_string(),
        json!({ "error_kind": err.kind(), "error": err.to_string() }),
        true,
    )
}

/// Dataset, query and repository calls do blocking file I/O and polars work
async fn blocking<T, F>(workbench: &Arc<Workbench>, f: F) -> pyworkbench::Result<T>
where
    F: FnOnce(&Workbench) -> pyworkbench::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let workbench = Arc::clone(workbench);
    tokio::task::spawn_blocking(move || f(&workbench))
        .await
        .unwrap_or_else(|e| Err(WorkbenchError::Io(std::io::Error::other(e))))
}

async fn call_tool(workbench: &Arc<Workbench>, params: &Value) -> std::result::Result<Value, Value> {
    let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
    let args = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let value = match normalize_tool_name(name).as_str() {
        "workbench_ping" => text_result(
            "pong",
            json!({
                "ok": true,
                "version": env!("CARGO_PKG_VERSION"),
                "engine": workbench.engine_capabilities(),
            }),
            false,
        ),
        "workbench_validate" => {
            let result = workbench.validate(string_arg(&args, "code")?).await;
            let text = result.reason.clone().unwrap_or_else(|| "ok".to_string());
            text_result(text, json!(result), !result.ok)
        }
        "workbench_diagnostics" => {
            let diagnostics = workbench.diagnostics(string_arg(&args, "code")?).await;
            text_result(
                format!("{} finding(s)", diagnostics.len()),
                json!({ "diagnostics": diagnostics }),
                false,
            )
        }
        "workbench_execute" => {
            execution_result(&workbench.execute(string_arg(&args, "code")?).await)
        }
        "workbench_submit" => execution_result(&workbench.submit(string_arg(&args, "code")?).await),
        "workbench_run_query" => {
            let query = string_arg(&args, "query")?.to_string();
            match blocking(workbench, move |wb| wb.run_query(&query)).await {
                Ok(outcome) => {
                    let columns: Vec<String> = outcome
                        .frame
                        .get_column_names()
                        .iter()
                        .map(|c| c.to_string())
                        .collect();
                    text_result(
                        outcome.render(),
                        json!({
                            "rows": outcome.frame.height(),
                            "columns": columns,
                            "persisted": outcome.persisted,
                            "referenced_tables": outcome.directive.referenced_tables,
                        }),
                        false,
                    )
                }
                Err(e) => error_result(&e),
            }
        }
        "workbench_save_function" => {
            let request: SaveFunctionRequest = serde_json::from_value(args).map_err(|e| {
                json!({ "code": -32602, "message": format!("Invalid arguments: {e}") })
            })?;
            match blocking(workbench, move |wb| wb.save_function(request)).await {
                Ok(unit) => text_result(format!("Saved {}", unit.name), json!(unit), false),
                Err(e) => error_result(&e),
            }
        }
        "workbench_list_functions" => match blocking(workbench, |wb| wb.list_functions()).await {
            Ok(units) => text_result(
                format!("{} function(s)", units.len()),
                json!({ "functions": units }),
                false,
            ),
            Err(e) => error_result(&e),
        },
        "workbench_get_function" => {
            let name = string_arg(&args, "name")?.to_string();
            match blocking(workbench, move |wb| wb.get_function(&name)).await {
                Ok(unit) => text_result(unit.code.clone(), json!(unit), false),
                Err(e) => error_result(&e),
            }
        }
        "workbench_delete_function" => {
            let name = string_arg(&args, "name")?.to_string();
            let target = name.clone();
            match blocking(workbench, move |wb| wb.delete_function(&target)).await {
                Ok(()) => text_result(format!("Deleted {name}"), json!({ "deleted": name }), false),
                Err(e) => error_result(&e),
            }
        }
        "workbench_list_datasets" => match blocking(workbench, |wb| wb.catalog().list()).await {
            Ok(datasets) => text_result(
                datasets
                    .iter()
                    .map(|d| d.name.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
                json!({ "datasets": datasets }),
                false,
            ),
            Err(e) => error_result(&e),
        },
        "workbench_dataset_schema" => {
            let name = string_arg(&args, "name")?.to_string();
            match blocking(workbench, move |wb| wb.catalog().schema(&name)).await {
                Ok(columns) => {
                    let columns: Vec<Value> = columns
                        .into_iter()
                        .map(|(name, dtype)| json!({ "name": name, "type": dtype }))
                        .collect();
                    text_result(
                        format!("{} column(s)", columns.len()),
                        json!({ "columns": columns }),
                        false,
                    )
                }
                Err(e) => error_result(&e),
            }
        }
        other => text_result(format!("Unknown tool: {}", other), json!({}), true),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flags_override_paths() {
        let args = WorkerArgs::parse(&argv(&[
            "pyworkbench-worker",
            "--verbose",
            "--dataset-dir",
            "/srv/data",
            "--python-path",
            "/opt/python/bin/python3",
        ]));
        assert_eq!(args.dataset_dir, Some(PathBuf::from("/srv/data")));
        assert_eq!(args.python_path, Some(PathBuf::from("/opt/python/bin/python3")));
        assert!(args.config_file.is_none());
    }

    #[tokio::test]
    async fn test_repository_tools_run_off_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WorkbenchConfig::default();
        config.dataset_dir = dir.path().join("data");
        config.functions_path = dir.path().join("user_defined.py");
        config.linter.enabled = false;
        let Ok(workbench) = create_workbench(WorkbenchOptions::from_config(config)) else {
            return;
        };
        let workbench = Arc::new(workbench);

        let saved = call_tool(
            &workbench,
            &json!({
                "name": "workbench.save_function",
                "arguments": { "name": "twice", "code": "def twice(x):\n    return 2 * x\n" }
            }),
        )
        .await
        .unwrap();
        assert_eq!(saved["isError"], json!(false));

        let listed = call_tool(&workbench, &json!({ "name": "workbench.list_functions" }))
            .await
            .unwrap();
        assert_eq!(listed["structuredContent"]["functions"][0]["name"], "twice");

        let missing = call_tool(
            &workbench,
            &json!({ "name": "workbench.run_query", "arguments": { "query": "SELECT * FROM ghosts" } }),
        )
        .await
        .unwrap();
        assert_eq!(missing["isError"], json!(true));
    }

    #[test]
    fn test_tool_names_normalize() {
        assert_eq!(normalize_tool_name("workbench.run_query"), "workbench_run_query");
        assert_eq!(normalize_tool_name("workbench/submit"), "workbench_submit");
        assert!(tools_list()
            .iter()
            .all(|tool| tool["name"].as_str().unwrap().starts_with("workbench.")));
    }
}
