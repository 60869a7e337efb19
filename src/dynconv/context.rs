//! Sparsity context: the metadata threaded through a sparse forward pass.
//!
//! Dense mode carries no context at all (`None`). A sparse pass starts from
//! [`SparsityConfig::init`] and every sparse block appends its mask pair.

use std::fmt;

use burn::config::Config;
use burn::prelude::*;
use serde::Serialize;
use tracing::trace;

use super::mask::MaskPair;
use crate::error::ConfigError;

/// Metadata slot of every forward signature. `None` means dense mode.
pub type Metadata<B> = Option<SparsityContext<B>>;

/// Settings for a fresh sparsity context.
#[derive(Config, Debug)]
pub struct SparsityConfig {
    /// Temperature of the Gumbel-sigmoid used while training.
    #[config(default = 1.0)]
    pub gumbel_temp: f64,
    /// Add Gumbel noise to mask scores while training.
    #[config(default = true)]
    pub gumbel_noise: bool,
}

impl SparsityConfig {
    /// Create an empty context for one forward pass.
    pub fn init<B: Backend>(&self) -> Result<SparsityContext<B>, ConfigError> {
        if !(self.gumbel_temp.is_finite() && self.gumbel_temp > 0.0) {
            return Err(ConfigError::GumbelTemperature(self.gumbel_temp));
        }
        Ok(SparsityContext {
            masks: Vec::new(),
            gumbel_temp: self.gumbel_temp,
            gumbel_noise: self.gumbel_noise,
        })
    }
}

/// Masks and mask-unit settings accumulated over one forward pass.
#[derive(Debug, Clone)]
pub struct SparsityContext<B: Backend> {
    masks: Vec<MaskPair<B>>,
    gumbel_temp: f64,
    gumbel_noise: bool,
}

impl<B: Backend> SparsityContext<B> {
    pub fn gumbel_temp(&self) -> f64 {
        self.gumbel_temp
    }

    pub fn gumbel_noise(&self) -> bool {
        self.gumbel_noise
    }

    /// Mask pairs in block execution order.
    pub fn masks(&self) -> &[MaskPair<B>] {
        &self.masks
    }

    pub fn num_blocks(&self) -> usize {
        self.masks.len()
    }

    /// Append the masks one block executed under.
    pub fn record(&mut self, masks: MaskPair<B>) {
        trace!(block = self.masks.len(), "recorded block masks");
        self.masks.push(masks);
    }

    /// Per-block mask ratios and FLOP accounting.
    ///
    /// Reads every mask back from the device, so call it after the pass.
    pub fn report(&self) -> SparsityReport {
        let blocks: Vec<BlockSparsity> = self
            .masks
            .iter()
            .enumerate()
            .map(|(index, pair)| BlockSparsity {
                index,
                active_ratio: pair.std.active_ratio(),
                dilated_ratio: pair.dilate.active_ratio(),
                flops: pair.flops(),
                dense_flops: pair.dense_flops(),
            })
            .collect();
        let flops = blocks.iter().map(|b| b.flops).sum();
        let dense_flops = blocks.iter().map(|b| b.dense_flops).sum();
        SparsityReport {
            blocks,
            flops,
            dense_flops,
        }
    }
}

/// Mask statistics of a single block.
#[derive(Debug, Clone, Serialize)]
pub struct BlockSparsity {
    /// Position of the block in execution order.
    pub index: usize,
    /// Active fraction of the standard mask.
    pub active_ratio: f64,
    /// Active fraction of the dilated mask.
    pub dilated_ratio: f64,
    /// Multiply-accumulates of the masked convolutions.
    pub flops: f64,
    /// Multiply-accumulates of the same convolutions run densely.
    pub dense_flops: f64,
}

/// Summary of a sparse forward pass.
#[derive(Debug, Clone, Serialize)]
pub struct SparsityReport {
    pub blocks: Vec<BlockSparsity>,
    pub flops: f64,
    pub dense_flops: f64,
}

impl SparsityReport {
    /// Fraction of the masked convolutions' dense cost that was skipped.
    pub fn saving(&self) -> f64 {
        if self.dense_flops <= 0.0 {
            return 0.0;
        }
        1.0 - self.flops / self.dense_flops
    }
}

impl fmt::Display for SparsityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "block  active  dilated       MFLOPs")?;
        for b in &self.blocks {
            writeln!(
                f,
                "{:>5}  {:>5.1}%  {:>6.1}%  {:>11.3}",
                b.index,
                b.active_ratio * 100.0,
                b.dilated_ratio * 100.0,
                b.flops / 1e6,
            )?;
        }
        write!(
            f,
            "total: {:.3} / {:.3} MFLOPs ({:.1}% skipped)",
            self.flops / 1e6,
            self.dense_flops / 1e6,
            self.saving() * 100.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynconv::mask::Mask;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn fresh_context_is_empty() {
        let ctx = SparsityConfig::new().init::<B>().unwrap();
        assert_eq!(ctx.num_blocks(), 0);
        assert_eq!(ctx.gumbel_temp(), 1.0);
        assert!(ctx.gumbel_noise());
        assert!(ctx.report().blocks.is_empty());
    }

    #[test]
    fn rejects_non_positive_temperature() {
        let err = SparsityConfig::new()
            .with_gumbel_temp(0.0)
            .init::<B>()
            .unwrap_err();
        assert_eq!(err, ConfigError::GumbelTemperature(0.0));
    }

    #[test]
    fn report_sums_blocks() {
        let device = Default::default();
        let mut ctx = SparsityConfig::new().init::<B>().unwrap();

        let mut dilate = Mask::<B>::ones(1, 2, 2, &device);
        dilate.add_flops(100);
        let half = Tensor::<B, 4>::from_floats([[[[1.0, 1.0], [0.0, 0.0]]]], &device);
        let mut std = Mask::new(half);
        std.add_flops(100);
        ctx.record(MaskPair { dilate, std });

        let report = ctx.report();
        assert_eq!(report.blocks.len(), 1);
        assert_eq!(report.blocks[0].active_ratio, 0.5);
        assert_eq!(report.blocks[0].dilated_ratio, 1.0);
        assert_eq!(report.flops, 600.0);
        assert_eq!(report.dense_flops, 800.0);
        assert!((report.saving() - 0.25).abs() < 1e-12);
        assert!(report.to_string().contains("25.0% skipped"));
    }
}
