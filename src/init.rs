//! Weight initialization by layer kind.
//!
//! Every convolution and linear layer picks its initializer here when it is
//! constructed. Batch-norm layers keep burn's own defaults (gamma = 1,
//! beta = 0), so they have no entry.

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Initializer, PaddingConfig2d};
use burn::prelude::*;

/// Kind of parameterized layer being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// 2D convolution; fan is taken over the kernel and the output channels.
    Conv {
        kernel: [usize; 2],
        out_channels: usize,
    },
    /// Fully connected layer.
    Linear,
}

/// Initializer for a layer of the given kind.
///
/// Convolutions draw from `N(0, sqrt(2 / (kh * kw * out)))`. Linear layers use
/// burn's Kaiming-uniform default, which matches PyTorch's `nn.Linear`.
pub fn initializer(kind: LayerKind) -> Initializer {
    match kind {
        LayerKind::Conv {
            kernel,
            out_channels,
        } => {
            let fan = (kernel[0] * kernel[1] * out_channels).max(1) as f64;
            Initializer::Normal {
                mean: 0.0,
                std: (2.0 / fan).sqrt(),
            }
        }
        LayerKind::Linear => Initializer::KaimingUniform {
            gain: 1.0 / 3.0f64.sqrt(),
            fan_out_only: false,
        },
    }
}

/// 3x3 convolution with padding 1 and no bias.
pub fn conv3x3<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .with_initializer(initializer(LayerKind::Conv {
            kernel: [3, 3],
            out_channels,
        }))
        .init(device)
}

/// 1x1 convolution with no padding and no bias (projection shortcuts).
pub fn conv1x1<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [1, 1])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Valid)
        .with_bias(false)
        .with_initializer(initializer(LayerKind::Conv {
            kernel: [1, 1],
            out_channels,
        }))
        .init(device)
}
