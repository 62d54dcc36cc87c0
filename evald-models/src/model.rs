//! Model entries and on-disk checkpoint analysis.

use std::fmt;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Weight file extensions, in the order they are preferred as the reported format.
pub const WEIGHT_EXTENSIONS: &[&str] = &["safetensors", "bin", "pt", "pth", "onnx"];

const CONFIG_FILES: &[&str] = &["config.json", "generation_config.json"];
const TOKENIZER_FILES: &[&str] = &["tokenizer.json", "tokenizer_config.json", "vocab.txt"];

/// Bytes per parameter assumed when a checkpoint does not declare its size.
const BYTES_PER_PARAMETER: u64 = 2;

/// Broad architecture family of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    CausalLm,
    Seq2seq,
    Embedding,
    Classifier,
    Unknown,
}

impl ModelType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CausalLm => "causal_lm",
            Self::Seq2seq => "seq2seq",
            Self::Embedding => "embedding",
            Self::Classifier => "classifier",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "causal_lm" => Some(Self::CausalLm),
            "seq2seq" => Some(Self::Seq2seq),
            "embedding" => Some(Self::Embedding),
            "classifier" => Some(Self::Classifier),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Classify from a Hugging Face style `config.json`.
    #[must_use]
    pub fn from_config(config: &Value) -> Self {
        let architecture = config
            .get("architectures")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .unwrap_or_default();
        let family = config
            .get("model_type")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if architecture.ends_with("ForCausalLM") || architecture.ends_with("LMHeadModel") {
            Self::CausalLm
        } else if architecture.ends_with("ForConditionalGeneration")
            || matches!(family, "t5" | "mt5" | "bart" | "mbart" | "pegasus" | "marian")
        {
            Self::Seq2seq
        } else if architecture.contains("Classification") {
            Self::Classifier
        } else if architecture.ends_with("Model")
            || matches!(family, "bert" | "roberta" | "xlm-roberta" | "mpnet")
        {
            Self::Embedding
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered model checkpoint. Immutable once in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Directory of the checkpoint; the model's identity.
    pub path: String,
    pub name: String,
    pub model_type: ModelType,
    /// Declared in `config.json`, otherwise estimated from weight bytes.
    pub parameters: Option<u64>,
    pub format: Option<String>,
    pub size_bytes: u64,
    pub file_count: usize,
    pub has_config: bool,
    pub has_tokenizer: bool,
    pub modified_at: Option<DateTime<Utc>>,
}

impl Model {
    /// Inspect a checkpoint directory.
    ///
    /// Files are collected recursively. A missing or unparseable `config.json`
    /// leaves the model `Unknown` rather than failing.
    pub fn analyze(dir: &Path) -> Result<Self> {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());

        let mut stats = DirStats::default();
        stats.walk(dir)?;

        let config = read_config(dir);
        let model_type = config
            .as_ref()
            .map_or(ModelType::Unknown, ModelType::from_config);
        let declared = config
            .as_ref()
            .and_then(|c| c.get("num_parameters"))
            .and_then(Value::as_u64);
        let parameters = declared.or_else(|| {
            (stats.weight_bytes > 0).then_some(stats.weight_bytes / BYTES_PER_PARAMETER)
        });

        if !stats.has_config {
            tracing::warn!(model = %name, "model directory has no config file");
        }

        let modified_at = fs::metadata(dir)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        Ok(Self {
            path: dir.display().to_string(),
            name,
            model_type,
            parameters,
            format: stats.format,
            size_bytes: stats.total_bytes,
            file_count: stats.file_count,
            has_config: stats.has_config,
            has_tokenizer: stats.has_tokenizer,
            modified_at,
        })
    }
}

#[derive(Default)]
struct DirStats {
    total_bytes: u64,
    weight_bytes: u64,
    file_count: usize,
    has_config: bool,
    has_tokenizer: bool,
    format: Option<String>,
}

impl DirStats {
    fn walk(&mut self, dir: &Path) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                self.walk(&path)?;
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let size = entry.metadata()?.len();
            self.total_bytes += size;
            self.file_count += 1;

            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if CONFIG_FILES.contains(&file_name.as_ref()) {
                self.has_config = true;
            }
            if TOKENIZER_FILES.contains(&file_name.as_ref()) {
                self.has_tokenizer = true;
            }

            let extension = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase());
            if let Some(rank) = extension
                .as_deref()
                .and_then(|ext| WEIGHT_EXTENSIONS.iter().position(|w| *w == ext))
            {
                self.weight_bytes += size;
                let current = self
                    .format
                    .as_deref()
                    .and_then(|f| WEIGHT_EXTENSIONS.iter().position(|w| *w == f));
                if current.is_none_or(|c| rank < c) {
                    self.format = Some(WEIGHT_EXTENSIONS[rank].to_string());
                }
            }
        }
        Ok(())
    }
}

fn read_config(dir: &Path) -> Option<Value> {
    let contents = fs::read_to_string(dir.join("config.json")).ok()?;
    serde_json::from_str(&contents).ok()
}
