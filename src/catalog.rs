use crate::errors::{Result, WorkbenchError};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const EXTENSION: &str = "parquet";

/// A named dataset and where it lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub path: PathBuf,
}

/// Named tabular datasets, one file per name
pub trait DatasetCatalog: Send + Sync {
    fn exists(&self, name: &str) -> bool;

    fn load(&self, name: &str) -> Result<DataFrame>;

    /// Store `frame` under `name`, replacing any previous dataset of that name
    fn save(&self, frame: &mut DataFrame, name: &str) -> Result<Dataset>;

    /// All datasets, sorted by name
    fn list(&self) -> Result<Vec<Dataset>>;

    fn remove(&self, name: &str) -> Result<()>;

    /// `(column, type)` pairs in column order
    fn schema(&self, name: &str) -> Result<Vec<(String, String)>> {
        let frame = self.load(name)?;
        Ok(frame
            .get_columns()
            .iter()
            .map(|column| (column.name().to_string(), column.dtype().to_string()))
            .collect())
    }
}

/// Dataset names double as file stems
pub fn validate_dataset_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(WorkbenchError::Validation(format!(
            "Invalid dataset name '{name}': use letters, digits and underscores"
        )));
    }
    Ok(())
}

/// Parquet files under a single directory
pub struct ParquetCatalog {
    root: PathBuf,
}

impl ParquetCatalog {
    /// Catalog rooted at `root`, created if needed
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dataset_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{EXTENSION}"))
    }
}

impl DatasetCatalog for ParquetCatalog {
    fn exists(&self, name: &str) -> bool {
        validate_dataset_name(name).is_ok() && self.dataset_path(name).is_file()
    }

    fn load(&self, name: &str) -> Result<DataFrame> {
        validate_dataset_name(name)?;
        let path = self.dataset_path(name);
        let file = fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WorkbenchError::NotFound(name.to_string())
            } else {
                WorkbenchError::Io(e)
            }
        })?;
        let frame = ParquetReader::new(file).finish()?;
        debug!("[CATALOG] Loaded {} with shape {:?}", name, frame.shape());
        Ok(frame)
    }

    fn save(&self, frame: &mut DataFrame, name: &str) -> Result<Dataset> {
        validate_dataset_name(name)?;
        let path = self.dataset_path(name);

        // Readers see either the old file or the new one, never a partial write
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        ParquetWriter::new(tmp.as_file_mut()).finish(frame)?;
        tmp.persist(&path).map_err(|e| e.error)?;

        info!("[CATALOG] Saved dataset {} ({} rows)", name, frame.height());
        Ok(Dataset {
            name: name.to_string(),
            path,
        })
    }

    fn list(&self) -> Result<Vec<Dataset>> {
        let mut datasets = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_dataset_name(name).is_ok() {
                datasets.push(Dataset {
                    name: name.to_string(),
                    path: path.clone(),
                });
            }
        }
        datasets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(datasets)
    }

    fn remove(&self, name: &str) -> Result<()> {
        validate_dataset_name(name)?;
        match fs::remove_file(self.dataset_path(name)) {
            Ok(()) => {
                info!("[CATALOG] Removed dataset {}", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(WorkbenchError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_catalog() -> (tempfile::TempDir, ParquetCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ParquetCatalog::new(dir.path().join("datasets")).unwrap();
        (dir, catalog)
    }

    fn orders() -> DataFrame {
        df!(
            "id" => &[1i64, 2, 3],
            "customer" => &["ada", "grace", "ada"],
            "total" => &[9.5f64, 20.0, 3.25]
        )
        .unwrap()
    }

    #[test]
    fn test_save_then_load() {
        let (_dir, catalog) = make_catalog();
        assert!(!catalog.exists("orders"));

        let mut frame = orders();
        let dataset = catalog.save(&mut frame, "orders").unwrap();
        assert_eq!(dataset.name, "orders");
        assert!(dataset.path.ends_with("orders.parquet"));
        assert!(catalog.exists("orders"));

        let loaded = catalog.load("orders").unwrap();
        assert!(loaded.equals(&frame));
    }

    #[test]
    fn test_overwrite_is_last_writer_wins() {
        let (_dir, catalog) = make_catalog();
        catalog.save(&mut orders(), "orders").unwrap();
        let mut smaller = df!("id" => &[7i64]).unwrap();
        catalog.save(&mut smaller, "orders").unwrap();

        let loaded = catalog.load("orders").unwrap();
        assert_eq!(loaded.shape(), (1, 1));
        // No temp files left behind
        assert_eq!(fs::read_dir(catalog.root()).unwrap().count(), 1);
    }

    #[test]
    fn test_list_sorted_and_remove() {
        let (_dir, catalog) = make_catalog();
        catalog.save(&mut orders(), "zeta").unwrap();
        catalog.save(&mut orders(), "alpha").unwrap();
        fs::write(catalog.root().join("notes.txt"), "ignored").unwrap();

        let names: Vec<_> = catalog.list().unwrap().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["alpha", "zeta"]);

        catalog.remove("alpha").unwrap();
        assert!(!catalog.exists("alpha"));
        assert!(matches!(
            catalog.remove("alpha"),
            Err(WorkbenchError::NotFound(name)) if name == "alpha"
        ));
    }

    #[test]
    fn test_schema_lists_columns() {
        let (_dir, catalog) = make_catalog();
        catalog.save(&mut orders(), "orders").unwrap();
        let schema = catalog.schema("orders").unwrap();
        let columns: Vec<_> = schema.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(columns, ["id", "customer", "total"]);
        assert_eq!(schema[0].1, "i64");
    }

    #[test]
    fn test_names_are_validated() {
        let (_dir, catalog) = make_catalog();
        assert!(matches!(
            catalog.save(&mut orders(), "../escape"),
            Err(WorkbenchError::Validation(_))
        ));
        assert!(!catalog.exists("../escape"));
        assert!(matches!(
            catalog.load("missing"),
            Err(WorkbenchError::NotFound(_))
        ));
    }
}
