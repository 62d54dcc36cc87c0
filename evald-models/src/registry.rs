//! Catalogs of models and datasets.
//!
//! Readers get a cheap `Arc` snapshot of the model catalog. A rescan builds
//! the replacement catalog without holding the lock and swaps it in whole, so
//! a reader never observes a half-built list and a failed scan leaves the
//! previous catalog in place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::dataset::{Dataset, LocalDatasetConfig, builtin_datasets};
use crate::error::{Error, Result};
use crate::model::Model;

/// Outcome of a model directory scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub models: Vec<Model>,
    pub total: usize,
    /// Directories that could not be analysed and were left out.
    pub skipped: Vec<String>,
    pub scanned_at: DateTime<Utc>,
}

/// Catalog of model checkpoints under one directory.
pub struct ModelRegistry {
    models_dir: PathBuf,
    catalog: RwLock<Arc<Vec<Model>>>,
    scan_lock: Mutex<()>,
}

impl ModelRegistry {
    /// Create an empty registry; call [`scan`](Self::scan) to populate it.
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            catalog: RwLock::new(Arc::new(Vec::new())),
            scan_lock: Mutex::new(()),
        }
    }

    /// Create a registry with a fixed catalog (for testing).
    pub fn with_models(models: Vec<Model>) -> Self {
        let registry = Self::new(PathBuf::new());
        registry.replace(models);
        registry
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// The current catalog, sorted by name.
    pub fn list(&self) -> Arc<Vec<Model>> {
        Arc::clone(
            &self
                .catalog
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    /// Look a model up by its path, falling back to its directory name.
    pub fn get(&self, path_or_name: &str) -> Result<Model> {
        let catalog = self.list();
        catalog
            .iter()
            .find(|m| m.path == path_or_name)
            .or_else(|| catalog.iter().find(|m| m.name == path_or_name))
            .cloned()
            .ok_or_else(|| Error::ModelNotFound(path_or_name.to_string()))
    }

    pub fn contains(&self, path_or_name: &str) -> bool {
        self.get(path_or_name).is_ok()
    }

    /// Rebuild the catalog from disk.
    ///
    /// Each immediate sub-directory is one model. The directory itself is
    /// created if missing.
    pub async fn scan(&self) -> Result<ScanReport> {
        let _guard = self.scan_lock.lock().await;
        let dir = self.models_dir.clone();

        let (models, skipped) = tokio::task::spawn_blocking(move || scan_models_dir(&dir))
            .await
            .map_err(|e| Error::ScanAborted(e.to_string()))??;

        self.replace(models.clone());
        info!(
            dir = %self.models_dir.display(),
            models = models.len(),
            skipped = skipped.len(),
            "model scan complete"
        );

        Ok(ScanReport {
            total: models.len(),
            models,
            skipped,
            scanned_at: Utc::now(),
        })
    }

    fn replace(&self, mut models: Vec<Model>) {
        models.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
        let mut catalog = self
            .catalog
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *catalog = Arc::new(models);
    }
}

fn scan_models_dir(dir: &Path) -> Result<(Vec<Model>, Vec<String>)> {
    std::fs::create_dir_all(dir).map_err(|source| Error::Scan {
        path: dir.to_path_buf(),
        source,
    })?;
    let entries = std::fs::read_dir(dir).map_err(|source| Error::Scan {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut models = Vec::new();
    let mut skipped = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| Error::Scan {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match Model::analyze(&path) {
            Ok(model) => models.push(model),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable model directory");
                skipped.push(path.display().to_string());
            }
        }
    }
    Ok((models, skipped))
}

/// Catalog of built-in and local datasets.
pub struct DatasetRegistry {
    datasets_dir: PathBuf,
    datasets: RwLock<BTreeMap<String, Dataset>>,
}

impl DatasetRegistry {
    /// Create a registry holding only the built-in datasets.
    pub fn new(datasets_dir: impl Into<PathBuf>) -> Self {
        let datasets = builtin_datasets()
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        Self {
            datasets_dir: datasets_dir.into(),
            datasets: RwLock::new(datasets),
        }
    }

    pub fn datasets_dir(&self) -> &Path {
        &self.datasets_dir
    }

    pub fn list(&self) -> Vec<Dataset> {
        self.read().values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Result<Dataset> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::DatasetNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Pick up local datasets (directories holding a `dataset_config.json`).
    ///
    /// Validation state of datasets that are still present is preserved;
    /// local datasets whose directory disappeared are dropped.
    pub async fn scan(&self) -> Result<usize> {
        let dir = self.datasets_dir.clone();
        let found = tokio::task::spawn_blocking(move || scan_datasets_dir(&dir))
            .await
            .map_err(|e| Error::ScanAborted(e.to_string()))??;

        let mut datasets = self.write();
        let mut previous = std::mem::take(&mut *datasets);
        let mut added = 0;
        for (name, dataset) in previous.iter().filter(|(_, d)| d.builtin) {
            datasets.insert(name.clone(), dataset.clone());
        }
        for dataset in found {
            if datasets.contains_key(&dataset.name) {
                warn!(name = %dataset.name, "local dataset shadows a built-in; ignoring");
                continue;
            }
            let dataset = match previous.remove(&dataset.name) {
                Some(known) if known.path == dataset.path => known,
                _ => dataset,
            };
            datasets.insert(dataset.name.clone(), dataset);
            added += 1;
        }
        Ok(added)
    }

    /// Validate one dataset and store the new status.
    pub async fn validate(&self, name: &str) -> Result<Dataset> {
        let mut dataset = self.get(name)?;
        let dataset = tokio::task::spawn_blocking(move || {
            dataset.validate();
            dataset
        })
        .await
        .map_err(|e| Error::ScanAborted(e.to_string()))?;

        info!(name, status = dataset.status.as_str(), "dataset validated");
        self.write().insert(dataset.name.clone(), dataset.clone());
        Ok(dataset)
    }

    /// Create an empty local dataset directory and register it.
    pub async fn create(&self, name: &str, task: &str, description: Option<String>) -> Result<Dataset> {
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
            || name.trim() != name
        {
            return Err(Error::InvalidName(name.to_string()));
        }
        if self.contains(name) {
            return Err(Error::DatasetExists(name.to_string()));
        }

        let dir = self.datasets_dir.join(name);
        if tokio::fs::try_exists(&dir).await? {
            return Err(Error::DatasetExists(name.to_string()));
        }
        tokio::fs::create_dir_all(&dir).await?;

        let config = LocalDatasetConfig {
            name: Some(name.to_string()),
            task: Some(task.to_string()),
            description,
            samples: None,
            created_at: Some(Utc::now().to_rfc3339()),
        };
        let json = serde_json::to_string_pretty(&config)?;
        tokio::fs::write(dir.join(crate::dataset::DATASET_CONFIG_FILE), json).await?;

        let dataset = tokio::task::spawn_blocking(move || Dataset::load_local(&dir))
            .await
            .map_err(|e| Error::ScanAborted(e.to_string()))??;
        self.write().insert(dataset.name.clone(), dataset.clone());
        info!(name, task, "local dataset created");
        Ok(dataset)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Dataset>> {
        self.datasets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Dataset>> {
        self.datasets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn scan_datasets_dir(dir: &Path) -> Result<Vec<Dataset>> {
    std::fs::create_dir_all(dir).map_err(|source| Error::Scan {
        path: dir.to_path_buf(),
        source,
    })?;
    let entries = std::fs::read_dir(dir).map_err(|source| Error::Scan {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.join(crate::dataset::DATASET_CONFIG_FILE).is_file() {
            continue;
        }
        match Dataset::load_local(&path) {
            Ok(dataset) => found.push(dataset),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping local dataset"),
        }
    }
    Ok(found)
}

/// Models and datasets together; what submissions are validated against.
pub struct Registry {
    pub models: ModelRegistry,
    pub datasets: DatasetRegistry,
}

impl Registry {
    pub fn new(models_dir: impl Into<PathBuf>, datasets_dir: impl Into<PathBuf>) -> Self {
        Self {
            models: ModelRegistry::new(models_dir),
            datasets: DatasetRegistry::new(datasets_dir),
        }
    }

    /// Scan both directories. A dataset scan failure is logged, not fatal.
    pub async fn scan_all(&self) -> Result<ScanReport> {
        if let Err(e) = self.datasets.scan().await {
            warn!(error = %e, "dataset scan failed");
        }
        self.models.scan().await
    }
}
