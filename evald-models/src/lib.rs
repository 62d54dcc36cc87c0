//! Model and dataset registry for evald.
//!
//! This crate provides:
//! - [`ModelRegistry`]: checkpoints discovered under a models directory
//! - [`DatasetRegistry`]: the built-in dataset catalog plus local datasets
//! - [`Registry`]: both together, used to validate evaluation requests
//!
//! # Layout on disk
//!
//! ```text
//! models/
//! ├── llama-7b/            one model per sub-directory
//! │   ├── config.json
//! │   └── model.safetensors
//! datasets/
//! └── reviews/
//!     ├── dataset_config.json
//!     └── train.jsonl
//! ```

mod error;

pub mod dataset;
pub mod model;
pub mod registry;

pub use dataset::{Dataset, DatasetStatus, LocalDatasetConfig, builtin_datasets};
pub use error::{Error, Result};
pub use model::{Model, ModelType};
pub use registry::{DatasetRegistry, ModelRegistry, Registry, ScanReport};
