//! Residual basic block with an optional dynamic-sparse execution path.
//!
//! Dense:  relu(bn2(conv2(relu(bn1(conv1(x))))) + shortcut(x))
//!
//! Sparse: conv1/bn1/relu are accounted under the dilated mask, conv2/bn2 under the
//! standard mask, and only standard-mask positions add to the shortcut.

use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::Conv2d;
use burn::nn::{BatchNorm, BatchNormConfig, Relu};
use burn::prelude::*;

use crate::dynconv::{
    apply_mask, masked_bn_act, masked_conv3x3, MaskUnit, MaskUnitConfig, Metadata,
};
use crate::error::{ConfigError, ForwardError};
use crate::init::{conv1x1, conv3x3};

// ─── Configuration ────────────────────────────────────────────────

/// Basic block configuration.
#[derive(Config, Debug)]
pub struct BasicBlockConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    /// Stride of the first convolution (and of the projection shortcut).
    #[config(default = 1)]
    pub stride: usize,
    /// Use a 1x1 conv + batch-norm projection as the shortcut.
    #[config(default = false)]
    pub downsample: bool,
    /// Execute through a masking unit.
    #[config(default = false)]
    pub sparse: bool,
    /// Build the masking unit so that it marks every position active.
    #[config(default = false)]
    pub all_active_masks: bool,
}

/// Whether a block with this shape change needs a projection shortcut.
pub fn needs_projection(in_channels: usize, out_channels: usize, stride: usize) -> bool {
    stride != 1 || in_channels != out_channels
}

// ─── Shortcut ─────────────────────────────────────────────────────

/// Projection shortcut: 1x1 conv (strided) + batch-norm.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> Downsample<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Kind of shortcut a block adds its residual to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    Identity,
    Projection,
}

/// How a block executes its convolutions.
pub enum Execution<'a, B: Backend> {
    Dense,
    Sparse(&'a MaskUnit<B>),
}

// ─── Block ────────────────────────────────────────────────────────

/// Two 3x3 convolutions with batch-norm and ReLU around a shortcut.
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    relu: Relu,
    downsample: Option<Downsample<B>>,
    masker: Option<MaskUnit<B>>,
}

impl BasicBlockConfig {
    /// Initialize a basic block.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<BasicBlock<B>, ConfigError> {
        let downsample = self.downsample.then(|| Downsample {
            conv: conv1x1(self.in_channels, self.out_channels, self.stride, device),
            bn: BatchNormConfig::new(self.out_channels).init(device),
        });

        // conv1 already applies the block stride, so masks are dilated at stride 1
        let masker = if self.sparse {
            Some(
                MaskUnitConfig::new(self.in_channels)
                    .with_stride(self.stride)
                    .with_dilate_stride(1)
                    .with_all_active(self.all_active_masks)
                    .init(device)?,
            )
        } else {
            None
        };

        Ok(BasicBlock {
            conv1: conv3x3(self.in_channels, self.out_channels, self.stride, device),
            bn1: BatchNormConfig::new(self.out_channels).init(device),
            conv2: conv3x3(self.out_channels, self.out_channels, 1, device),
            bn2: BatchNormConfig::new(self.out_channels).init(device),
            relu: Relu::new(),
            downsample,
            masker,
        })
    }
}

impl<B: Backend> BasicBlock<B> {
    pub fn execution(&self) -> Execution<'_, B> {
        match &self.masker {
            Some(masker) => Execution::Sparse(masker),
            None => Execution::Dense,
        }
    }

    pub fn shortcut(&self) -> Shortcut {
        match self.downsample {
            Some(_) => Shortcut::Projection,
            None => Shortcut::Identity,
        }
    }

    /// `[in_channels, out_channels]` of the first convolution.
    pub fn channels(&self) -> [usize; 2] {
        let [out, inp, _, _] = self.conv1.weight.dims();
        [inp, out]
    }

    /// Drop the masking unit, keeping all weights.
    pub fn into_dense(self) -> Self {
        Self {
            masker: None,
            ..self
        }
    }

    /// Run the block, threading `meta` through.
    ///
    /// A dense block passes `meta` through untouched. A sparse block needs a
    /// context and returns it with this block's masks recorded.
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        meta: Metadata<B>,
    ) -> Result<(Tensor<B, 4>, Metadata<B>), ForwardError> {
        match self.execution() {
            Execution::Dense => Ok((self.forward_dense(x), meta)),
            Execution::Sparse(masker) => {
                let ctx = meta.ok_or(ForwardError::MissingSparsityContext)?;
                let identity = self.identity(x.clone());

                let (mut masks, mut ctx) = masker.produce_masks(x.clone(), ctx);
                let out = masked_conv3x3(&self.conv1, x, None, &mut masks.dilate);
                let out = masked_bn_act(&self.bn1, Some(&self.relu), out, &masks.dilate);
                let out = masked_conv3x3(&self.conv2, out, Some(&masks.dilate), &mut masks.std);
                let out = masked_bn_act(&self.bn2, None, out, &masks.std);
                let out = identity + apply_mask(out, &masks.std);

                ctx.record(masks);
                Ok((self.relu.forward(out), Some(ctx)))
            }
        }
    }

    fn forward_dense(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = self.identity(x.clone());
        let out = self.conv1.forward(x);
        let out = self.bn1.forward(out);
        let out = self.relu.forward(out);
        let out = self.conv2.forward(out);
        let out = self.bn2.forward(out);
        self.relu.forward(out + identity)
    }

    fn identity(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match &self.downsample {
            Some(downsample) => downsample.forward(x),
            None => x,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
