use crate::{
    artifact::{Artifact, Language, StoredFunction, FUNCTION_MARKER},
    errors::{Result, WorkbenchError},
    parser::ParsedSource,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError, RwLock};
use tempfile::NamedTempFile;
use tracing::{debug, info};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// One lock per artifact location, shared by every repository in the process
static ARTIFACT_LOCKS: LazyLock<Mutex<HashMap<String, Arc<RwLock<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn lock_for(location: &str) -> Arc<RwLock<()>> {
    let mut locks = ARTIFACT_LOCKS
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    locks.entry(location.to_string()).or_default().clone()
}

/// Where the artifact text lives
pub trait ArtifactStore: Send + Sync {
    /// Current text, empty when nothing has been written yet
    fn read(&self) -> Result<String>;

    /// Replace the text; on failure the previous text must survive
    fn write(&self, text: &str) -> Result<()>;

    /// Stable identity used to serialize writers of the same artifact
    fn location(&self) -> String;
}

/// A single file, replaced by temp-file-then-rename
pub struct FileArtifactStore {
    path: PathBuf,
}

impl FileArtifactStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ArtifactStore for FileArtifactStore {
    fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, text: &str) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Arguments of a save call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveFunctionRequest {
    pub name: String,
    pub code: String,
    pub description: String,
    pub tags: Vec<String>,
    pub language: Language,
    /// Replace an existing unit instead of creating a new one
    pub is_update: bool,
}

/// Named code units persisted inside one artifact.
///
/// Every call re-derives the catalog from the artifact text. Mutations hold
/// the artifact's write lock across read, merge and write so concurrent
/// savers cannot drop each other's units.
pub struct FunctionRepository {
    store: Arc<dyn ArtifactStore>,
    lock: Arc<RwLock<()>>,
}

impl FunctionRepository {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        let lock = lock_for(&store.location());
        Self { store, lock }
    }

    /// Repository backed by a file on disk
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self::new(Arc::new(FileArtifactStore::new(path)))
    }

    fn load(&self) -> Result<Artifact> {
        Artifact::parse(&self.store.read()?)
    }

    pub fn save(&self, request: SaveFunctionRequest) -> Result<StoredFunction> {
        validate_identifier(&request.name)?;
        let tags = validate_tags(&request.tags)?;
        if let Language::Other(language) = &request.language {
            if language.contains(char::is_whitespace) {
                return Err(WorkbenchError::Validation(format!(
                    "Invalid language name '{language}'"
                )));
            }
        }

        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        let mut artifact = self.load()?;

        let exists = artifact.contains(&request.name);
        if exists && !request.is_update {
            return Err(WorkbenchError::NameConflict(request.name));
        }
        if !exists && request.is_update {
            return Err(WorkbenchError::NotFound(request.name));
        }

        let code = if request.language.is_python() {
            let (imports, body) = split_python_unit(&request.code)?;
            artifact.imports.extend(imports);
            body
        } else {
            request.code.trim().to_string()
        };

        if request.is_update {
            artifact.remove(&request.name);
        }
        let unit = StoredFunction {
            name: request.name,
            code,
            description: request
                .description
                .trim()
                .replace("\r\n", "\n")
                .replace('\r', "\n"),
            tags,
            language: request.language,
        };
        artifact.units.push(unit.clone());

        self.store.write(&artifact.render())?;
        info!(
            "[REPOSITORY] {} function {}",
            if request.is_update { "Updated" } else { "Saved" },
            unit.name
        );
        Ok(unit)
    }

    pub fn list(&self) -> Result<Vec<StoredFunction>> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        let artifact = self.load()?;
        debug!("[REPOSITORY] Listed {} function(s)", artifact.units.len());
        Ok(artifact.units)
    }

    pub fn get(&self, name: &str) -> Result<StoredFunction> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        self.load()?
            .get(name)
            .cloned()
            .ok_or_else(|| WorkbenchError::NotFound(name.to_string()))
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        let mut artifact = self.load()?;
        if artifact.remove(name).is_none() {
            return Err(WorkbenchError::NotFound(name.to_string()));
        }
        self.store.write(&artifact.render())?;
        info!("[REPOSITORY] Deleted function {}", name);
        Ok(())
    }
}

fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(WorkbenchError::Validation(
            "Function name cannot be empty".to_string(),
        ));
    }
    if !IDENTIFIER.is_match(name) {
        return Err(WorkbenchError::Validation(format!(
            "Invalid function name '{name}': must start with a letter or underscore and \
             contain only letters, numbers, and underscores"
        )));
    }
    Ok(())
}

fn validate_tags(tags: &[String]) -> Result<BTreeSet<String>> {
    let mut set = BTreeSet::new();
    for tag in tags {
        let tag = tag.trim();
        if tag.contains(',') || tag.contains('\n') {
            return Err(WorkbenchError::Validation(format!(
                "Invalid tag '{tag}': tags cannot contain commas or newlines"
            )));
        }
        if !tag.is_empty() {
            set.insert(tag.to_string());
        }
    }
    Ok(set)
}

/// Separate a Python unit's own top-level import lines from its body
fn split_python_unit(code: &str) -> Result<(Vec<String>, String)> {
    let parsed = ParsedSource::parse(code).map_err(|e| WorkbenchError::Validation(e.to_string()))?;
    if parsed.function_definitions().is_empty() {
        return Err(WorkbenchError::Validation(
            "No function definition found in the code".to_string(),
        ));
    }
    if parsed
        .column_zero_comments()
        .iter()
        .any(|comment| comment.text.starts_with(FUNCTION_MARKER))
    {
        return Err(WorkbenchError::Validation(format!(
            "Code cannot contain '{}' header comments",
            FUNCTION_MARKER.trim_end()
        )));
    }

    let mut imports = Vec::new();
    let mut body = String::with_capacity(code.len());
    let mut cursor = 0;
    for span in parsed.top_level_imports() {
        // Only hoist imports that own their whole line
        let line_end = code[span.range.end..]
            .find('\n')
            .map(|i| span.range.end + i + 1)
            .unwrap_or(code.len());
        if !code[span.range.end..line_end].trim().is_empty() || span.text.contains('\n') {
            continue;
        }
        body.push_str(&code[cursor..span.range.start]);
        cursor = line_end;
        imports.push(span.text);
    }
    body.push_str(&code[cursor..]);

    let body = body
        .lines()
        .skip_while(|line| line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string();
    Ok((imports, body))
}
