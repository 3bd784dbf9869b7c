//! ResNet-18 in the torchvision parameter layout
//!
//! Field names mirror torchvision (`conv1`, `bn1`, `layer1`..`layer4`, `fc`)
//! so ImageNet checkpoints map onto the module tree with only the
//! `downsample.{0,1}` keys renamed.
//!
//! Architecture:
//! - Input: 3×224×224
//! - Stem: 7×7 conv stride 2, BN, ReLU, 3×3 max-pool stride 2
//! - 4 stages of 2 basic blocks (64, 128, 256, 512 channels)
//! - Global average pooling
//! - Linear head

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, Linear, LinearConfig, PaddingConfig2d, Relu};
use burn::prelude::*;

use super::ImageClassifier;

/// Width of the pooled feature vector fed to the head
pub const FEATURE_DIM: usize = 512;

/// Number of ImageNet classes the pretrained head predicts
pub const IMAGENET_CLASSES: usize = 1000;

const STAGE_CHANNELS: [usize; 4] = [64, 128, 256, 512];
const BLOCKS_PER_STAGE: usize = 2;

/// Configuration for [`ResNet`]
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Number of output classes
    #[config(default = "1000")]
    pub num_classes: usize,
}

fn conv_init() -> Initializer {
    Initializer::KaimingNormal {
        gain: 2.0f64.sqrt(),
        fan_out_only: true,
    }
}

fn conv3x3<B: Backend>(channels: [usize; 2], stride: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new(channels, [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .with_initializer(conv_init())
        .init(device)
}

/// Dotted parameter name and its tensor shape
pub type ParamShape = (String, Vec<usize>);

fn push_conv<B: Backend>(name: &str, conv: &Conv2d<B>, shapes: &mut Vec<ParamShape>) {
    shapes.push((format!("{name}.weight"), conv.weight.dims().to_vec()));
    if let Some(bias) = &conv.bias {
        shapes.push((format!("{name}.bias"), bias.dims().to_vec()));
    }
}

// BatchNorm gamma/beta under torchvision's weight/bias names; running stats are not parameters
fn push_batch_norm<B: Backend>(name: &str, bn: &BatchNorm<B, 2>, shapes: &mut Vec<ParamShape>) {
    shapes.push((format!("{name}.weight"), bn.gamma.dims().to_vec()));
    shapes.push((format!("{name}.bias"), bn.beta.dims().to_vec()));
}

/// 1×1 projection + BN on the shortcut when shape changes
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    fn new(channels: [usize; 2], stride: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new(channels, [1, 1])
            .with_stride([stride, stride])
            .with_bias(false)
            .with_initializer(conv_init())
            .init(device);
        let bn = BatchNormConfig::new(channels[1]).init(device);
        Self { conv, bn }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }

    fn push_shapes(&self, prefix: &str, shapes: &mut Vec<ParamShape>) {
        push_conv(&format!("{prefix}.conv"), &self.conv, shapes);
        push_batch_norm(&format!("{prefix}.bn"), &self.bn, shapes);
    }
}

/// Two 3×3 convolutions with a residual connection
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new([in_channels, out_channels], stride, device));

        Self {
            conv1: conv3x3([in_channels, out_channels], stride, device),
            bn1: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            conv2: conv3x3([out_channels, out_channels], 1, device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            downsample,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let out = self.bn2.forward(self.conv2.forward(out));
        self.relu.forward(out + identity)
    }

    fn push_shapes(&self, prefix: &str, shapes: &mut Vec<ParamShape>) {
        push_conv(&format!("{prefix}.conv1"), &self.conv1, shapes);
        push_batch_norm(&format!("{prefix}.bn1"), &self.bn1, shapes);
        push_conv(&format!("{prefix}.conv2"), &self.conv2, shapes);
        push_batch_norm(&format!("{prefix}.bn2"), &self.bn2, shapes);
        if let Some(downsample) = &self.downsample {
            downsample.push_shapes(&format!("{prefix}.downsample"), shapes);
        }
    }
}

/// ResNet-18 image classifier
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    maxpool: MaxPool2d,
    layer1: Vec<BasicBlock<B>>,
    layer2: Vec<BasicBlock<B>>,
    layer3: Vec<BasicBlock<B>>,
    layer4: Vec<BasicBlock<B>>,
    avgpool: AdaptiveAvgPool2d,
    fc: Linear<B>,
}

fn stage<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    device: &B::Device,
) -> Vec<BasicBlock<B>> {
    (0..BLOCKS_PER_STAGE)
        .map(|i| {
            if i == 0 {
                BasicBlock::new(in_channels, out_channels, stride, device)
            } else {
                BasicBlock::new(out_channels, out_channels, 1, device)
            }
        })
        .collect()
}

impl ResNetConfig {
    /// Initialize a randomly weighted ResNet-18
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let [c1, c2, c3, c4] = STAGE_CHANNELS;

        ResNet {
            conv1: Conv2dConfig::new([3, c1], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_bias(false)
                .with_initializer(conv_init())
                .init(device),
            bn1: BatchNormConfig::new(c1).init(device),
            relu: Relu::new(),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layer1: stage(c1, c1, 1, device),
            layer2: stage(c1, c2, 2, device),
            layer3: stage(c2, c3, 2, device),
            layer4: stage(c3, c4, 2, device),
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(FEATURE_DIM, self.num_classes).init(device),
        }
    }
}

impl<B: Backend> ResNet<B> {
    /// Pooled `[batch, 512]` features before the head
    pub fn features(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(input);
        let x = self.relu.forward(self.bn1.forward(x));
        let mut x = self.maxpool.forward(x);

        for block in self
            .layer1
            .iter()
            .chain(&self.layer2)
            .chain(&self.layer3)
            .chain(&self.layer4)
        {
            x = block.forward(x);
        }

        let x = self.avgpool.forward(x);
        let [batch, channels, _, _] = x.dims();
        x.reshape([batch, channels])
    }

    /// Logits of shape `[batch, num_classes]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        self.fc.forward(self.features(input))
    }

    /// Swap the final linear layer for a freshly initialised one with
    /// `num_classes` outputs. Every other parameter is kept and stays trainable.
    pub fn with_num_classes(mut self, num_classes: usize, device: &B::Device) -> Self {
        self.fc = LinearConfig::new(FEATURE_DIM, num_classes).init(device);
        self
    }

    /// Output width of the head
    pub fn num_classes(&self) -> usize {
        self.fc.weight.dims()[1]
    }

    /// Every trainable parameter in forward order, e.g.
    /// `layer2.0.downsample.conv.weight`. The head weight is `[512, classes]`.
    pub fn parameter_shapes(&self) -> Vec<ParamShape> {
        let mut shapes = Vec::new();
        push_conv("conv1", &self.conv1, &mut shapes);
        push_batch_norm("bn1", &self.bn1, &mut shapes);

        let stages = [&self.layer1, &self.layer2, &self.layer3, &self.layer4];
        for (stage_idx, blocks) in stages.into_iter().enumerate() {
            for (block_idx, block) in blocks.iter().enumerate() {
                block.push_shapes(&format!("layer{}.{}", stage_idx + 1, block_idx), &mut shapes);
            }
        }

        shapes.push(("fc.weight".to_string(), self.fc.weight.dims().to_vec()));
        if let Some(bias) = &self.fc.bias {
            shapes.push(("fc.bias".to_string(), bias.dims().to_vec()));
        }
        shapes
    }
}

impl<B: Backend> ImageClassifier<B> for ResNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        ResNet::forward(self, images)
    }

    fn num_classes(&self) -> usize {
        ResNet::num_classes(self)
    }
}
