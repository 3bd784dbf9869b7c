//! # mri_finetune
//!
//! Fine-tunes an ImageNet-pretrained ResNet-18 on the brain-tumour MRI
//! classification dataset (`sartajbhuvaji/brain-tumor-classification-mri`)
//! with the Burn framework, tracks the run in an MLflow-compatible store and
//! keeps the weights of the best Testing epoch.
//!
//! ## Modules
//!
//! - `dataset`: dataset resolution, folder scanning, transforms and loaders
//! - `model`: ResNet-18, pretrained weight loading and head replacement
//! - `training`: the epoch loop, optimizers and learning-rate schedules
//! - `tracking`: experiment tracker trait with file and in-memory stores
//! - `pipeline`: one complete run, from dataset to logged model
//! - `config`: TOML run configuration
//! - `utils`: error type, logging and formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mri_finetune::backend::{default_device, TrainingBackend};
//! use mri_finetune::{FileTracker, RunConfig};
//!
//! let config = RunConfig::default();
//! let mut tracker = FileTracker::new(&config.tracking.tracking_dir, &config.tracking.experiment_name);
//! let outcome = mri_finetune::pipeline::run::<TrainingBackend, _>(&config, &default_device(), &mut tracker)?;
//! println!("best accuracy {:.4}", outcome.report.best_accuracy);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod model;
pub mod pipeline;
pub mod tracking;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{RunConfig, TrainingConfig};
pub use dataset::{ImageFolder, Partition, PartitionLoaders};
pub use model::{ImageClassifier, ResNet, ResNetConfig};
pub use pipeline::RunOutcome;
pub use tracking::{ExperimentTracker, FileTracker, InMemoryTracker};
pub use training::{train_model, TrainingReport};
pub use utils::error::{Error, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
