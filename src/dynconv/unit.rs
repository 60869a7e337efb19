//! Masking unit: decides which output positions of a block are computed.
//!
//! ```text
//! x ──► squeeze (3x3 conv + pooled linear) ──► scores [N, 1, H', W']
//!                                                   │
//!                              threshold / gumbel ◄─┘
//!                                      │
//!                          std mask ◄──┴──► expand (3x3) ──► dilated mask
//! ```
//!
//! Inference thresholds scores at zero. Under an autodiff backend the hard
//! decision is a straight-through Gumbel-sigmoid so the scorer receives
//! gradients.

use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use burn::tensor::module::max_pool2d;
use burn::tensor::Distribution;
use tracing::trace;

use super::context::SparsityContext;
use super::mask::{Mask, MaskPair};
use crate::error::ConfigError;
use crate::init::{initializer, LayerKind};

const GUMBEL_EPS: f64 = 1e-8;

/// Masking unit configuration.
#[derive(Config, Debug)]
pub struct MaskUnitConfig {
    /// Channels of the feature map the unit scores.
    pub channels: usize,
    /// Spatial stride of the block; masks are produced at output resolution.
    #[config(default = 1)]
    pub stride: usize,
    /// Upsampling factor applied before dilation.
    #[config(default = 1)]
    pub dilate_stride: usize,
    /// Skip scoring and mark every position active.
    #[config(default = false)]
    pub all_active: bool,
}

/// Scores every output position from local and global context.
#[derive(Module, Debug)]
pub struct Squeeze<B: Backend> {
    pool: AdaptiveAvgPool2d,
    fc: Linear<B>,
    conv: Conv2d<B>,
}

impl<B: Backend> Squeeze<B> {
    fn new(channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(channels, 1)
                .with_initializer(initializer(LayerKind::Linear))
                .init(device),
            conv: Conv2dConfig::new([channels, 1], [3, 3])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_initializer(initializer(LayerKind::Conv {
                    kernel: [3, 3],
                    out_channels: 1,
                }))
                .init(device),
        }
    }

    /// `[N, C, H, W]` → `[N, 1, H', W']` raw scores.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [n, c, _, _] = x.dims();
        let global = self.pool.forward(x.clone()).reshape([n, c]);
        let global = self.fc.forward(global).reshape([n, 1, 1, 1]);
        let local = self.conv.forward(x);
        let [_, _, h, w] = local.dims();
        local + global.expand([n, 1, h, w])
    }
}

/// Per-block mask generator.
#[derive(Module, Debug)]
pub struct MaskUnit<B: Backend> {
    /// `None` for an all-active unit.
    squeeze: Option<Squeeze<B>>,
    stride: usize,
    dilate_stride: usize,
}

impl MaskUnitConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<MaskUnit<B>, ConfigError> {
        if self.stride == 0 {
            return Err(ConfigError::MaskStride { field: "stride" });
        }
        if self.dilate_stride == 0 {
            return Err(ConfigError::MaskStride {
                field: "dilate_stride",
            });
        }
        let squeeze = if self.all_active {
            None
        } else {
            Some(Squeeze::new(self.channels, self.stride, device))
        };
        Ok(MaskUnit {
            squeeze,
            stride: self.stride,
            dilate_stride: self.dilate_stride,
        })
    }
}

impl<B: Backend> MaskUnit<B> {
    pub fn is_all_active(&self) -> bool {
        self.squeeze.is_none()
    }

    /// Produce the dilated and standard masks for the block consuming `x`.
    ///
    /// The unit only reads the Gumbel settings from `ctx` and returns it as
    /// received; the block records the pair after executing under it.
    pub fn produce_masks(
        &self,
        x: Tensor<B, 4>,
        ctx: SparsityContext<B>,
    ) -> (MaskPair<B>, SparsityContext<B>) {
        let std = match &self.squeeze {
            Some(squeeze) => {
                let scores = squeeze.forward(x);
                let hard = threshold(scores.clone(), &ctx);
                Mask::new(hard).with_soft(scores)
            }
            None => {
                let [n, _, h, w] = x.dims();
                let out = |len: usize| len.div_ceil(self.stride);
                Mask::ones(n, out(h), out(w), &x.device())
            }
        };
        let dilate = Mask::new(expand_mask(std.hard().clone(), self.dilate_stride));
        trace!(std_mask = ?std.dims(), dilated_mask = ?dilate.dims(), "produced block masks");
        (MaskPair { dilate, std }, ctx)
    }
}

/// Hard {0, 1} decision from raw scores.
fn threshold<B: Backend>(scores: Tensor<B, 4>, ctx: &SparsityContext<B>) -> Tensor<B, 4> {
    if !B::ad_enabled() {
        return scores.greater_equal_elem(0.0).float();
    }
    let scores = if ctx.gumbel_noise() {
        let shape = scores.shape();
        let device = scores.device();
        let g1 = gumbel_noise::<B>(shape.clone(), &device);
        let g2 = gumbel_noise::<B>(shape, &device);
        scores + g1 - g2
    } else {
        scores
    };
    let soft = sigmoid(scores / ctx.gumbel_temp());
    let hard = soft.clone().greater_equal_elem(0.5).float();
    // straight-through: forward value is `hard`, gradient is the sigmoid's
    hard - soft.clone().detach() + soft
}

/// Standard Gumbel samples `-ln(-ln(u))`.
fn gumbel_noise<B: Backend>(shape: Shape, device: &B::Device) -> Tensor<B, 4> {
    let u = Tensor::<B, 4>::random(shape, Distribution::Uniform(0.0, 1.0), device);
    ((u + GUMBEL_EPS).log().neg() + GUMBEL_EPS).log().neg()
}

/// Grow a mask by one 3x3 neighbourhood, after zero-insertion upsampling
/// when `stride > 1`.
pub fn expand_mask<B: Backend>(mask: Tensor<B, 4>, stride: usize) -> Tensor<B, 4> {
    let mask = if stride > 1 {
        zero_insert(mask, stride)
    } else {
        mask
    };
    max_pool2d(mask, [3, 3], [1, 1], [1, 1], [1, 1], false)
        .greater_elem(0.5)
        .float()
}

/// Place each value at the top-left of a `stride x stride` cell of zeros.
fn zero_insert<B: Backend>(x: Tensor<B, 4>, stride: usize) -> Tensor<B, 4> {
    let [n, c, h, w] = x.dims();
    let device = x.device();
    let x: Tensor<B, 5> = x.reshape([n * c, h, 1, w, 1]);
    let rows = Tensor::zeros([n * c, h, stride - 1, w, 1], &device);
    let x = Tensor::cat(vec![x, rows], 2);
    let cols = Tensor::zeros([n * c, h, stride, w, stride - 1], &device);
    let x = Tensor::cat(vec![x, cols], 4);
    x.reshape([n, c, h * stride, w * stride])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynconv::context::SparsityConfig;
    use burn::backend::{Autodiff, NdArray};

    type B = NdArray;

    fn values(t: Tensor<B, 4>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    fn ctx() -> SparsityContext<B> {
        SparsityConfig::new().init().unwrap()
    }

    #[test]
    fn masks_are_binary_at_output_resolution() {
        let device = Default::default();
        let unit = MaskUnitConfig::new(16)
            .with_stride(2)
            .init::<B>(&device)
            .unwrap();
        let x = Tensor::<B, 4>::random([2, 16, 8, 8], Distribution::Default, &device);
        let (pair, _) = unit.produce_masks(x, ctx());

        assert_eq!(pair.std.dims(), [2, 1, 4, 4]);
        assert_eq!(pair.dilate.dims(), [2, 1, 4, 4]);
        assert!(pair.std.soft().is_some());
        for v in values(pair.std.hard().clone()) {
            assert!(v == 0.0 || v == 1.0, "non-binary mask value {}", v);
        }
    }

    #[test]
    fn dilated_mask_contains_standard_mask() {
        let device = Default::default();
        let unit = MaskUnitConfig::new(8).init::<B>(&device).unwrap();
        let x = Tensor::<B, 4>::random([1, 8, 6, 6], Distribution::Default, &device);
        let (pair, _) = unit.produce_masks(x, ctx());
        let std = values(pair.std.hard().clone());
        let dilate = values(pair.dilate.hard().clone());
        for (s, d) in std.iter().zip(&dilate) {
            assert!(d >= s);
        }
    }

    #[test]
    fn expand_grows_single_point_to_neighbourhood() {
        let device = Default::default();
        let mut point = [[0.0f32; 5]; 5];
        point[2][2] = 1.0;
        let mask = Tensor::<B, 4>::from_floats([[point]], &device);
        let grown = values(expand_mask(mask, 1));
        let active: f32 = grown.iter().sum();
        assert_eq!(active, 9.0);
        assert_eq!(grown[0], 0.0);
        assert_eq!(grown[6], 1.0);
    }

    #[test]
    fn zero_insert_spreads_values() {
        let device = Default::default();
        let mask = Tensor::<B, 4>::from_floats([[[[1.0, 0.0], [0.0, 1.0]]]], &device);
        let up = zero_insert(mask, 2);
        assert_eq!(up.dims(), [1, 1, 4, 4]);
        let v = values(up);
        let expected = [
            1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 0.0,
        ];
        assert_eq!(v, expected);
    }

    #[test]
    fn all_active_unit_returns_ones() {
        let device = Default::default();
        let unit = MaskUnitConfig::new(4)
            .with_stride(2)
            .with_all_active(true)
            .init::<B>(&device)
            .unwrap();
        assert!(unit.is_all_active());
        let x = Tensor::<B, 4>::zeros([3, 4, 7, 7], &device);
        let (pair, _) = unit.produce_masks(x, ctx());
        assert_eq!(pair.std.dims(), [3, 1, 4, 4]);
        assert_eq!(pair.std.active_ratio(), 1.0);
        assert_eq!(pair.dilate.active_ratio(), 1.0);
    }

    #[test]
    fn zero_stride_is_rejected() {
        let device = Default::default();
        let err = MaskUnitConfig::new(4)
            .with_dilate_stride(0)
            .init::<B>(&device)
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::MaskStride {
                field: "dilate_stride"
            }
        );
    }

    #[test]
    fn straight_through_masks_pass_gradients_to_scorer() {
        type AB = Autodiff<NdArray>;
        let device = Default::default();
        let unit = MaskUnitConfig::new(4).init::<AB>(&device).unwrap();
        let ctx = SparsityConfig::new()
            .with_gumbel_noise(false)
            .init::<AB>()
            .unwrap();
        let x = Tensor::<AB, 4>::random([1, 4, 4, 4], Distribution::Default, &device);
        let (pair, _) = unit.produce_masks(x, ctx);

        for v in pair.std.hard().clone().into_data().to_vec::<f32>().unwrap() {
            assert!((v - 0.0).abs() < 1e-6 || (v - 1.0).abs() < 1e-6);
        }

        let grads = pair.std.hard().clone().sum().backward();
        let squeeze = unit.squeeze.as_ref().unwrap();
        assert!(squeeze.conv.weight.val().grad(&grads).is_some());
    }
}
