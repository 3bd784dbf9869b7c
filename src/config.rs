//! Run configuration
//!
//! Every knob of a fine-tuning run lives in [`RunConfig`]. The defaults
//! reproduce the reference run (10 epochs, batch size 4, SGD with momentum,
//! step decay every 7 epochs), so the binary needs no flags. A TOML file may
//! override any subset of fields.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::error::{Error, Result};

/// Kaggle handle of the brain-tumour MRI dataset
pub const DEFAULT_DATASET: &str = "sartajbhuvaji/brain-tumor-classification-mri";

/// File name of the torchvision ImageNet ResNet-18 checkpoint
pub const DEFAULT_PRETRAINED_WEIGHTS: &str = "weights/resnet18-f37072fd.pth";

/// Complete configuration of one fine-tuning run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Directory for the model summary and the best weights
    pub output_dir: PathBuf,
    /// Seed for shuffling and transform randomness
    pub seed: u64,
    pub dataset: DatasetConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub tracking: TrackingConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            seed: 42,
            dataset: DatasetConfig::default(),
            model: ModelConfig::default(),
            training: TrainingConfig::default(),
            tracking: TrackingConfig::default(),
        }
    }
}

/// Where the images come from and how they are batched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatasetConfig {
    /// Remote dataset identifier (`owner/slug`)
    pub handle: String,
    /// Local directory holding the partitions; skips cache lookup when set
    pub root: Option<PathBuf>,
    pub train_partition: String,
    pub test_partition: String,
    /// Side of the square crop fed to the network
    pub image_size: u32,
    /// Shorter-side resize applied before the Testing centre crop
    pub resize_size: u32,
    pub batch_size: usize,
    /// Worker threads used by the data loaders
    pub num_workers: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            handle: DEFAULT_DATASET.to_string(),
            root: None,
            train_partition: "Training".to_string(),
            test_partition: "Testing".to_string(),
            image_size: 224,
            resize_size: 256,
            batch_size: 4,
            num_workers: 4,
        }
    }
}

/// Pretrained backbone settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Architecture label recorded with the run
    pub architecture: String,
    /// `.pth`/`.pt` (PyTorch) or `.mpk` (Burn) weights; `None` trains from scratch
    pub pretrained_weights: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            architecture: "resnet18".to_string(),
            pretrained_weights: Some(PathBuf::from(DEFAULT_PRETRAINED_WEIGHTS)),
        }
    }
}

/// Optimisation hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub optimizer: OptimizerType,
    /// Momentum for SGD
    pub momentum: f64,
    /// L2 penalty, disabled when zero
    pub weight_decay: f64,
    /// Draw progress bars for each partition pass
    pub show_progress: bool,
    pub lr_schedule: LrScheduleConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            learning_rate: 0.001,
            optimizer: OptimizerType::Sgd,
            momentum: 0.9,
            weight_decay: 0.0,
            show_progress: true,
            lr_schedule: LrScheduleConfig::default(),
        }
    }
}

/// Optimizer type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerType {
    /// SGD with momentum
    Sgd,
    /// Adam
    Adam,
}

impl std::fmt::Display for OptimizerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizerType::Sgd => write!(f, "SGD"),
            OptimizerType::Adam => write!(f, "Adam"),
        }
    }
}

/// Learning-rate schedule, advanced once per Training pass
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LrScheduleConfig {
    Constant,
    /// Multiply by `gamma` every `step_size` epochs
    Step { step_size: usize, gamma: f64 },
    /// Multiply by `gamma` every epoch
    Exponential { gamma: f64 },
}

impl Default for LrScheduleConfig {
    fn default() -> Self {
        LrScheduleConfig::Step {
            step_size: 7,
            gamma: 0.1,
        }
    }
}

/// Experiment tracker settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackingConfig {
    /// Root of the MLflow-compatible file store
    pub tracking_dir: PathBuf,
    pub experiment_name: String,
    /// Optional human-readable run name
    pub run_name: Option<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tracking_dir: PathBuf::from("mlruns"),
            experiment_name: "Default".to_string(),
            run_name: None,
        }
    }
}

impl RunConfig {
    /// Load a TOML file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: RunConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject configurations the run cannot execute
    pub fn validate(&self) -> Result<()> {
        let d = &self.dataset;
        let t = &self.training;

        if d.batch_size == 0 {
            return Err(Error::Config("batch_size must be > 0".into()));
        }
        if d.image_size == 0 || d.resize_size == 0 {
            return Err(Error::Config("image sizes must be > 0".into()));
        }
        if d.image_size > d.resize_size {
            return Err(Error::Config(format!(
                "image_size ({}) must not exceed resize_size ({})",
                d.image_size, d.resize_size
            )));
        }
        if d.train_partition == d.test_partition {
            return Err(Error::Config(
                "Training and Testing partitions must differ".into(),
            ));
        }
        if t.epochs == 0 {
            return Err(Error::Config("epochs must be > 0".into()));
        }
        if !(t.learning_rate > 0.0) {
            return Err(Error::Config("learning_rate must be > 0".into()));
        }
        if !(0.0..1.0).contains(&t.momentum) {
            return Err(Error::Config("momentum must be in [0, 1)".into()));
        }
        if t.weight_decay < 0.0 {
            return Err(Error::Config("weight_decay must be >= 0".into()));
        }
        match t.lr_schedule {
            LrScheduleConfig::Constant => {}
            LrScheduleConfig::Step { step_size, gamma } => {
                if step_size == 0 {
                    return Err(Error::Config("lr_schedule.step_size must be > 0".into()));
                }
                if !(gamma > 0.0) {
                    return Err(Error::Config("lr_schedule.gamma must be > 0".into()));
                }
            }
            LrScheduleConfig::Exponential { gamma } => {
                if !(gamma > 0.0) {
                    return Err(Error::Config("lr_schedule.gamma must be > 0".into()));
                }
            }
        }
        Ok(())
    }

    /// Flatten into tracker parameters
    pub fn params(&self) -> Vec<(String, String)> {
        let d = &self.dataset;
        let t = &self.training;
        let mut params = vec![
            ("epochs".to_string(), t.epochs.to_string()),
            ("Optimizer".to_string(), t.optimizer.to_string()),
            ("learning_rate".to_string(), t.learning_rate.to_string()),
            ("batch_size".to_string(), d.batch_size.to_string()),
            ("num_workers".to_string(), d.num_workers.to_string()),
            ("image_size".to_string(), d.image_size.to_string()),
            ("dataset".to_string(), d.handle.clone()),
            ("architecture".to_string(), self.model.architecture.clone()),
            ("seed".to_string(), self.seed.to_string()),
        ];
        if t.optimizer == OptimizerType::Sgd {
            params.push(("momentum".to_string(), t.momentum.to_string()));
        }
        if t.weight_decay > 0.0 {
            params.push(("weight_decay".to_string(), t.weight_decay.to_string()));
        }
        match t.lr_schedule {
            LrScheduleConfig::Constant => {
                params.push(("lr_schedule".to_string(), "constant".to_string()));
            }
            LrScheduleConfig::Step { step_size, gamma } => {
                params.push(("lr_schedule".to_string(), "step".to_string()));
                params.push(("lr_step_size".to_string(), step_size.to_string()));
                params.push(("lr_gamma".to_string(), gamma.to_string()));
            }
            LrScheduleConfig::Exponential { gamma } => {
                params.push(("lr_schedule".to_string(), "exponential".to_string()));
                params.push(("lr_gamma".to_string(), gamma.to_string()));
            }
        }
        params.push((
            "pretrained".to_string(),
            self.model.pretrained_weights.is_some().to_string(),
        ));
        params
    }
}
