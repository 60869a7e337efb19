//! Spatial execution masks.
//!
//! A mask is a `[batch, 1, height, width]` tensor of zeros and ones. It is
//! broadcast over the channel dimension of whatever feature map it gates.

use burn::prelude::*;
use burn::tensor::ElementConversion;

/// Binary spatial mask with its soft scores and FLOP bookkeeping.
#[derive(Debug, Clone)]
pub struct Mask<B: Backend> {
    hard: Tensor<B, 4>,
    soft: Option<Tensor<B, 4>>,
    flops_per_position: usize,
}

impl<B: Backend> Mask<B> {
    /// Wrap a `[N, 1, H, W]` tensor of zeros and ones.
    pub fn new(hard: Tensor<B, 4>) -> Self {
        debug_assert_eq!(hard.dims()[1], 1, "masks have a single channel");
        Self {
            hard,
            soft: None,
            flops_per_position: 0,
        }
    }

    /// Mask with every position active.
    pub fn ones(batch: usize, height: usize, width: usize, device: &B::Device) -> Self {
        Self::new(Tensor::ones([batch, 1, height, width], device))
    }

    /// Attach the pre-threshold scores the hard mask was derived from.
    pub fn with_soft(mut self, soft: Tensor<B, 4>) -> Self {
        self.soft = Some(soft);
        self
    }

    pub fn hard(&self) -> &Tensor<B, 4> {
        &self.hard
    }

    pub fn soft(&self) -> Option<&Tensor<B, 4>> {
        self.soft.as_ref()
    }

    /// `[N, 1, H, W]`
    pub fn dims(&self) -> [usize; 4] {
        self.hard.dims()
    }

    /// Hard mask broadcast to `[N, channels, H, W]`.
    pub fn expand_to(&self, channels: usize) -> Tensor<B, 4> {
        let [n, _, h, w] = self.dims();
        self.hard.clone().expand([n, channels, h, w])
    }

    /// Number of active positions summed over the batch.
    pub fn active_positions(&self) -> f64 {
        self.hard.clone().sum().into_scalar().elem::<f64>()
    }

    /// `N * H * W`
    pub fn total_positions(&self) -> usize {
        let [n, _, h, w] = self.dims();
        n * h * w
    }

    /// Fraction of positions that are active, in `[0, 1]`.
    pub fn active_ratio(&self) -> f64 {
        let total = self.total_positions();
        if total == 0 {
            return 0.0;
        }
        self.active_positions() / total as f64
    }

    pub fn flops_per_position(&self) -> usize {
        self.flops_per_position
    }

    /// Account for an operation executed at every active position.
    pub fn add_flops(&mut self, per_position: usize) {
        self.flops_per_position += per_position;
    }

    /// Multiply-accumulates spent on active positions.
    pub fn flops(&self) -> f64 {
        self.active_positions() * self.flops_per_position as f64
    }

    /// Multiply-accumulates the same operations would cost without masking.
    pub fn dense_flops(&self) -> f64 {
        (self.total_positions() * self.flops_per_position) as f64
    }
}

/// The two masks one residual block executes under.
#[derive(Debug, Clone)]
pub struct MaskPair<B: Backend> {
    /// Standard mask grown by one 3x3 neighbourhood; gates the first conv.
    pub dilate: Mask<B>,
    /// Output positions kept; gates the second conv and the residual add.
    pub std: Mask<B>,
}

impl<B: Backend> MaskPair<B> {
    pub fn flops(&self) -> f64 {
        self.dilate.flops() + self.std.flops()
    }

    pub fn dense_flops(&self) -> f64 {
        self.dilate.dense_flops() + self.std.dense_flops()
    }
}
