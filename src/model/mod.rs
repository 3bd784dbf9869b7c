//! Model module
//!
//! - `resnet`: ResNet-18 backbone in the torchvision layout
//! - `pretrained`: ImageNet weight loading and head replacement
//! - `summary`: plain-text model summary logged with each run

pub mod pretrained;
pub mod resnet;
pub mod summary;

use burn::prelude::*;

pub use pretrained::{build_model, load_pretrained, WeightsFormat};
pub use resnet::{ResNet, ResNetConfig};
pub use summary::ModelSummary;

/// A network mapping an image batch to class logits
///
/// The optimisation loop only relies on this seam, so any Burn module that
/// produces `[batch, num_classes]` logits can be fine-tuned.
pub trait ImageClassifier<B: Backend> {
    /// `[batch, 3, H, W]` images to `[batch, num_classes]` logits
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    fn num_classes(&self) -> usize;
}
