//! Dataset entries: the built-in catalog and local dataset directories.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// File that marks a directory as a local dataset.
pub const DATASET_CONFIG_FILE: &str = "dataset_config.json";

/// Validation state of a dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetStatus {
    #[default]
    Pending,
    Validated,
    Error,
}

impl DatasetStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Error => "error",
        }
    }
}

/// An evaluation dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Lookup key used in evaluation requests.
    pub name: String,
    pub display_name: String,
    pub description: String,
    /// Task family, e.g. `text_generation`, `classification`, `qa`.
    pub task: String,
    pub builtin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub samples: Option<u64>,
    pub status: DatasetStatus,
    pub last_validated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Dataset {
    fn builtin(name: &str, display_name: &str, description: &str, task: &str, hub: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            description: description.to_string(),
            task: task.to_string(),
            builtin: true,
            hub_path: Some(hub.to_string()),
            path: None,
            samples: None,
            status: DatasetStatus::Pending,
            last_validated: None,
            error: None,
        }
    }

    /// Load a local dataset from its directory.
    pub fn load_local(dir: &Path) -> Result<Self> {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let config = LocalDatasetConfig::read(dir)?;
        Ok(Self {
            display_name: config.name.clone().unwrap_or_else(|| name.clone()),
            description: config
                .description
                .unwrap_or_else(|| format!("local dataset {name}")),
            task: config.task.unwrap_or_else(|| "text_generation".to_string()),
            name,
            builtin: false,
            hub_path: None,
            path: Some(dir.to_path_buf()),
            samples: config.samples,
            status: DatasetStatus::Pending,
            last_validated: None,
            error: None,
        })
    }

    /// Re-check the dataset and move it to `validated` or `error`.
    ///
    /// Built-ins always validate. Local datasets must still exist on disk;
    /// their sample count comes from the config file or the line count of
    /// their `*.jsonl` files.
    pub fn validate(&mut self) {
        self.last_validated = Some(Utc::now());
        let Some(dir) = self.path.clone() else {
            self.status = DatasetStatus::Validated;
            self.error = None;
            return;
        };

        match count_samples(&dir) {
            Ok(samples) => {
                self.samples = samples.or(self.samples);
                self.status = DatasetStatus::Validated;
                self.error = None;
            }
            Err(e) => {
                self.status = DatasetStatus::Error;
                self.error = Some(e.to_string());
            }
        }
    }
}

/// Contents of `dataset_config.json`. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalDatasetConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", alias = "task", skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<u64>,
    /// Kept verbatim; older tools wrote timestamps without an offset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl LocalDatasetConfig {
    pub fn read(dir: &Path) -> Result<Self> {
        let contents = fs::read_to_string(dir.join(DATASET_CONFIG_FILE))?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(DATASET_CONFIG_FILE), json)?;
        Ok(())
    }
}

fn count_samples(dir: &Path) -> Result<Option<u64>> {
    let config = LocalDatasetConfig::read(dir)?;
    if config.samples.is_some() {
        return Ok(config.samples);
    }

    let mut total = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "jsonl") {
            let reader = BufReader::new(fs::File::open(&path)?);
            let mut lines = 0u64;
            for line in reader.lines() {
                if !line?.trim().is_empty() {
                    lines += 1;
                }
            }
            *total.get_or_insert(0) += lines;
        }
    }
    Ok(total)
}

/// The datasets every installation knows about.
pub fn builtin_datasets() -> Vec<Dataset> {
    vec![
        Dataset::builtin(
            "wikitext",
            "WikiText",
            "Wikipedia article text",
            "text_generation",
            "wikitext",
        ),
        Dataset::builtin(
            "c4",
            "C4",
            "Colossal Clean Crawled Corpus",
            "text_generation",
            "c4",
        ),
        Dataset::builtin(
            "pile",
            "The Pile",
            "Multi-source text corpus",
            "text_generation",
            "EleutherAI/pile",
        ),
        Dataset::builtin(
            "openwebtext",
            "OpenWebText",
            "Open web text",
            "text_generation",
            "openwebtext",
        ),
        Dataset::builtin(
            "bookcorpus",
            "BookCorpus",
            "Book corpus",
            "text_generation",
            "bookcorpus",
        ),
        Dataset::builtin(
            "glue",
            "GLUE",
            "General Language Understanding Evaluation benchmark",
            "classification",
            "glue",
        ),
        Dataset::builtin(
            "squad",
            "SQuAD",
            "Stanford Question Answering Dataset",
            "qa",
            "squad",
        ),
    ]
}
