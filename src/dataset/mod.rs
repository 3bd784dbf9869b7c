//! Dataset module: resolution, discovery, transforms and batch loading
//!
//! - `provider`: find the dataset root (local directory or kagglehub cache)
//! - `folder`: scan `Training/` and `Testing/` class folders
//! - `transform`: per-partition image transforms
//! - `burn_dataset`: Burn `Dataset` and `Batcher` implementations
//! - `loader`: per-partition Burn data loaders

pub mod burn_dataset;
pub mod folder;
pub mod loader;
pub mod provider;
pub mod transform;

pub use burn_dataset::{ClassificationBatch, ClassificationBatcher, ImageItem, PartitionDataset};
pub use folder::{ClassSet, ImageFolder, ImageSample, Partition, PartitionSamples, PartitionStats};
pub use loader::{build_loader, ClassificationLoader, LoaderOptions, PartitionLoaders};
pub use provider::{provider_for, DatasetProvider, KaggleHubCache, LocalDirectory};
pub use transform::{ImageTransform, TransformStep, IMAGENET_MEAN, IMAGENET_STD};
