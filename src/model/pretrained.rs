//! Pretrained weights
//!
//! ImageNet weights come either from the torchvision checkpoint
//! (`resnet18-f37072fd.pth`, read with burn-import) or from a Burn record
//! saved earlier with `CompactRecorder`. After loading, the ImageNet head is
//! replaced by one sized for the dataset's classes.

use std::path::Path;

use burn::module::Module;
use burn::record::{CompactRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use tracing::{info, warn};

use super::resnet::{ResNet, ResNetConfig, IMAGENET_CLASSES};
use crate::config::ModelConfig;
use crate::utils::error::{Error, Result};

/// On-disk format of a weights file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightsFormat {
    /// PyTorch pickle (`.pth`, `.pt`)
    PyTorch,
    /// Burn named MessagePack (`.mpk`)
    Burn,
}

impl WeightsFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pth" | "pt" => Ok(WeightsFormat::PyTorch),
            "mpk" => Ok(WeightsFormat::Burn),
            other => Err(Error::Model(format!(
                "unsupported weights file extension '{}' for {} (expected .pth, .pt or .mpk)",
                other,
                path.display()
            ))),
        }
    }
}

/// Load an ImageNet ResNet-18 (1000-class head)
pub fn load_pretrained<B: Backend>(path: &Path, device: &B::Device) -> Result<ResNet<B>> {
    if !path.is_file() {
        return Err(Error::Model(format!(
            "pretrained weights not found at {}.\n\
             Download the torchvision checkpoint:\n  \
             curl -L -o {} https://download.pytorch.org/models/resnet18-f37072fd.pth",
            path.display(),
            path.display()
        )));
    }

    let model = ResNetConfig::new()
        .with_num_classes(IMAGENET_CLASSES)
        .init::<B>(device);

    let model = match WeightsFormat::from_path(path)? {
        WeightsFormat::PyTorch => {
            let args = LoadArgs::new(path.to_path_buf())
                .with_key_remap("downsample\\.0", "downsample.conv")
                .with_key_remap("downsample\\.1", "downsample.bn");
            let record = PyTorchFileRecorder::<FullPrecisionSettings>::default()
                .load(args, device)?;
            model.load_record(record)
        }
        WeightsFormat::Burn => model.load_file(path.to_path_buf(), &CompactRecorder::new(), device)?,
    };

    info!("Loaded pretrained weights from {}", path.display());
    Ok(model)
}

/// Build the model for a run: pretrained backbone (when configured) with a
/// head sized for `num_classes`
pub fn build_model<B: Backend>(
    config: &ModelConfig,
    num_classes: usize,
    device: &B::Device,
) -> Result<ResNet<B>> {
    if num_classes == 0 {
        return Err(Error::Model("cannot build a classifier with zero classes".into()));
    }

    let backbone = match &config.pretrained_weights {
        Some(path) => load_pretrained::<B>(path, device)?,
        None => {
            warn!("No pretrained weights configured; training ResNet-18 from random initialisation");
            ResNetConfig::new().init::<B>(device)
        }
    };

    let model = backbone.with_num_classes(num_classes, device);
    info!(
        "Replaced classifier head: {} features -> {} classes",
        super::resnet::FEATURE_DIM,
        num_classes
    );
    Ok(model)
}
