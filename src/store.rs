//! Feature store boundary.
//!
//! A dataset is a named, versioned table with a fixed column list and a
//! primary key. [`CsvFeatureStore`] keeps each dataset as one CSV file plus a
//! JSON metadata file in a directory.

use crate::error::{AcmError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Schema and key description of a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub description: String,
    /// Column names in storage order
    pub features: Vec<String>,
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub event_time: Option<String>,
}

impl DatasetSpec {
    pub fn new(name: &str, version: u32, features: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            version,
            description: String::new(),
            features: features.iter().map(|f| f.to_string()).collect(),
            primary_key: Vec::new(),
            event_time: None,
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn event_time(mut self, column: &str) -> Self {
        self.event_time = Some(column.to_string());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.primary_key.is_empty() {
            return Err(AcmError::Validation(format!(
                "dataset {} has no primary key",
                self.name
            )));
        }
        if let Some(missing) = self
            .primary_key
            .iter()
            .chain(self.event_time.iter())
            .find(|c| !self.features.contains(*c))
        {
            return Err(AcmError::Validation(format!(
                "dataset {}: column {} is not a feature",
                self.name, missing
            )));
        }
        Ok(())
    }

    fn key_indices(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|k| self.features.iter().position(|f| f == k))
            .collect()
    }
}

/// Named, schema'd, keyed table storage.
pub trait FeatureStore {
    /// Return the stored dataset, creating it from `spec` when absent.
    fn get_or_create_dataset(&self, spec: DatasetSpec) -> Result<DatasetSpec>;

    fn get_dataset(&self, name: &str, version: u32) -> Result<DatasetSpec>;

    /// Write rows. With `overwrite` the dataset's previous content is
    /// replaced; otherwise rows are upserted on the primary key.
    ///
    /// Returns the number of rows in the dataset afterwards.
    fn insert<T: Serialize>(&self, dataset: &DatasetSpec, rows: &[T], overwrite: bool)
        -> Result<usize>;

    fn read<T: DeserializeOwned>(&self, dataset: &DatasetSpec) -> Result<Vec<T>>;
}

/// Directory-backed feature store
#[derive(Debug, Clone)]
pub struct CsvFeatureStore {
    root: PathBuf,
}

impl CsvFeatureStore {
    /// Open (and create if needed) the store directory.
    pub fn connect(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| {
            AcmError::Store(format!("Cannot open feature store at {:?}: {}", root, e))
        })?;
        info!("Connected to feature store at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, name: &str, version: u32) -> PathBuf {
        self.root.join(format!("{}_{}.csv", name, version))
    }

    fn meta_path(&self, name: &str, version: u32) -> PathBuf {
        self.root.join(format!("{}_{}.json", name, version))
    }

    fn read_records(&self, dataset: &DatasetSpec) -> Result<Vec<Vec<String>>> {
        let path = self.data_path(&dataset.name, dataset.version);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers != dataset.features {
            return Err(AcmError::Store(format!(
                "{:?} has columns {:?}, expected {:?}",
                path, headers, dataset.features
            )));
        }

        reader
            .records()
            .map(|r| -> Result<Vec<String>> { Ok(r?.iter().map(str::to_string).collect()) })
            .collect()
    }

    fn write_records(&self, dataset: &DatasetSpec, records: &[Vec<String>]) -> Result<()> {
        let path = self.data_path(&dataset.name, dataset.version);
        let tmp = path.with_extension("csv.tmp");

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(&tmp)?;
        writer.write_record(&dataset.features)?;
        for record in records {
            writer.write_record(record)?;
        }
        writer.flush()?;
        drop(writer);

        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl FeatureStore for CsvFeatureStore {
    fn get_or_create_dataset(&self, spec: DatasetSpec) -> Result<DatasetSpec> {
        spec.validate()?;
        let meta = self.meta_path(&spec.name, spec.version);
        if meta.exists() {
            let existing = self.get_dataset(&spec.name, spec.version)?;
            if existing.features != spec.features || existing.primary_key != spec.primary_key {
                return Err(AcmError::Validation(format!(
                    "dataset {} v{} exists with a different schema",
                    spec.name, spec.version
                )));
            }
            return Ok(existing);
        }

        std::fs::write(&meta, serde_json::to_string_pretty(&spec)?)?;
        info!(dataset = %spec.name, version = spec.version, "Created dataset");
        Ok(spec)
    }

    fn get_dataset(&self, name: &str, version: u32) -> Result<DatasetSpec> {
        let meta = self.meta_path(name, version);
        let content = std::fs::read_to_string(&meta).map_err(|e| {
            AcmError::Store(format!("Dataset {} v{} not found: {}", name, version, e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    fn insert<T: Serialize>(
        &self,
        dataset: &DatasetSpec,
        rows: &[T],
        overwrite: bool,
    ) -> Result<usize> {
        let incoming = rows
            .iter()
            .map(|row| to_record(dataset, row))
            .collect::<Result<Vec<_>>>()?;

        let mut records = if overwrite {
            Vec::new()
        } else {
            self.read_records(dataset)?
        };

        let keys = dataset.key_indices();
        let key_of = |record: &[String]| -> Vec<String> {
            keys.iter().map(|&i| record[i].clone()).collect()
        };
        let mut positions: HashMap<Vec<String>, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (key_of(r), i))
            .collect();

        let mut replaced = 0;
        for record in incoming {
            let key = key_of(&record);
            let existing = positions.get(&key).copied();
            match existing {
                Some(i) => {
                    records[i] = record;
                    replaced += 1;
                }
                None => {
                    positions.insert(key, records.len());
                    records.push(record);
                }
            }
        }

        self.write_records(dataset, &records)?;
        debug!(
            dataset = %dataset.name,
            rows = rows.len(),
            replaced,
            total = records.len(),
            overwrite,
            "Inserted rows"
        );
        Ok(records.len())
    }

    fn read<T: DeserializeOwned>(&self, dataset: &DatasetSpec) -> Result<Vec<T>> {
        let path = self.data_path(&dataset.name, dataset.version);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&path)?;
        reader
            .deserialize()
            .map(|row| row.map_err(AcmError::from))
            .collect()
    }
}

/// Flatten one row into the dataset's column order.
fn to_record<T: Serialize>(dataset: &DatasetSpec, row: &T) -> Result<Vec<String>> {
    let value = serde_json::to_value(row)?;
    let object = value.as_object().ok_or_else(|| {
        AcmError::Validation(format!("rows for {} must be structs", dataset.name))
    })?;

    dataset
        .features
        .iter()
        .map(|column| {
            object
                .get(column)
                .map(cell)
                .ok_or_else(|| {
                    AcmError::Validation(format!(
                        "row for {} is missing column {}",
                        dataset.name, column
                    ))
                })
        })
        .collect()
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: String,
        score: f64,
        note: String,
    }

    fn row(id: &str, score: f64, note: &str) -> Row {
        Row {
            id: id.to_string(),
            score,
            note: note.to_string(),
        }
    }

    fn spec() -> DatasetSpec {
        DatasetSpec::new("rows", 1, &["id", "score", "note"]).primary_key(&["id"])
    }

    #[test]
    fn test_append_upserts_on_primary_key() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CsvFeatureStore::connect(dir.path())?;
        let dataset = store.get_or_create_dataset(spec())?;

        store.insert(&dataset, &[row("a", 1.0, "first"), row("b", 2.0, "x")], false)?;
        let total = store.insert(&dataset, &[row("a", 3.5, "line\nbreak"), row("c", 0.25, "")], false)?;
        assert_eq!(total, 3);

        let rows: Vec<Row> = store.read(&dataset)?;
        assert_eq!(
            rows,
            vec![row("a", 3.5, "line\nbreak"), row("b", 2.0, "x"), row("c", 0.25, "")]
        );
        Ok(())
    }

    #[test]
    fn test_overwrite_is_idempotent() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CsvFeatureStore::connect(dir.path())?;
        let dataset = store.get_or_create_dataset(spec())?;
        store.insert(&dataset, &[row("old", 9.0, "")], false)?;

        let rows = vec![row("a", 1.0, "x"), row("b", 2.0, "y")];
        store.insert(&dataset, &rows, true)?;
        let once: Vec<Row> = store.read(&dataset)?;
        let raw_once = std::fs::read_to_string(dir.path().join("rows_1.csv"))?;

        store.insert(&dataset, &rows, true)?;
        let twice: Vec<Row> = store.read(&dataset)?;
        let raw_twice = std::fs::read_to_string(dir.path().join("rows_1.csv"))?;

        assert_eq!(once, rows);
        assert_eq!(once, twice);
        assert_eq!(raw_once, raw_twice);
        Ok(())
    }

    #[test]
    fn test_schema_mismatch_is_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CsvFeatureStore::connect(dir.path())?;
        store.get_or_create_dataset(spec())?;

        let other = DatasetSpec::new("rows", 1, &["id", "note"]).primary_key(&["id"]);
        assert!(matches!(
            store.get_or_create_dataset(other),
            Err(AcmError::Validation(_))
        ));
        Ok(())
    }

    #[test]
    fn test_missing_column_is_rejected() -> Result<()> {
        #[derive(Serialize)]
        struct Partial {
            id: String,
        }

        let dir = TempDir::new()?;
        let store = CsvFeatureStore::connect(dir.path())?;
        let dataset = store.get_or_create_dataset(spec())?;
        let result = store.insert(&dataset, &[Partial { id: "a".into() }], false);
        assert!(matches!(result, Err(AcmError::Validation(_))));
        Ok(())
    }

    #[test]
    fn test_unknown_dataset() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CsvFeatureStore::connect(dir.path())?;
        assert!(matches!(store.get_dataset("nope", 1), Err(AcmError::Store(_))));
        Ok(())
    }

    #[test]
    fn test_read_empty_dataset() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CsvFeatureStore::connect(dir.path())?;
        let dataset = store.get_or_create_dataset(spec())?;
        let rows: Vec<Row> = store.read(&dataset)?;
        assert!(rows.is_empty());
        Ok(())
    }
}
