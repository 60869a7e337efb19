//! ResNet backbone for 32x32 images (CIFAR).
//!
//! stem (3→16) → stage1 (16, s1) → stage2 (32, s2) → stage3 (64, s2)
//! → global average pool → linear classifier.
//!
//! With `sparse` set, every residual block owns a masking unit and the
//! forward pass needs a [`SparsityContext`](crate::dynconv::SparsityContext).

use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::Conv2d;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, Relu};
use burn::prelude::*;
use tracing::debug;

use super::block::{needs_projection, BasicBlock, BasicBlockConfig, Shortcut};
use crate::dynconv::Metadata;
use crate::error::{ConfigError, ForwardError};
use crate::init::{conv3x3, initializer, LayerKind};

/// Channel width of the stem and the first stage.
pub const BASE_WIDTH: usize = 16;

/// `(channels, stride)` of the three stages.
const STAGES: [(usize, usize); 3] = [(BASE_WIDTH, 1), (BASE_WIDTH * 2, 2), (BASE_WIDTH * 4, 2)];

// ─── Configuration ────────────────────────────────────────────────

/// ResNet configuration.
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Number of residual blocks in each of the three stages.
    pub layers: Vec<usize>,
    /// Number of output classes.
    #[config(default = 10)]
    pub num_classes: usize,
    /// Execute every block through a masking unit.
    #[config(default = false)]
    pub sparse: bool,
    /// Masking units mark every position active (sparse path, no skipping).
    #[config(default = false)]
    pub all_active_masks: bool,
    /// Load pretrained weights. Not available for this family.
    #[config(default = false)]
    pub pretrained: bool,
}

impl ResNetConfig {
    /// ResNet-8: one block per stage.
    pub fn resnet8(sparse: bool) -> Self {
        Self::new(vec![1, 1, 1]).with_sparse(sparse)
    }

    pub fn resnet14(sparse: bool) -> Self {
        Self::new(vec![2, 2, 2]).with_sparse(sparse)
    }

    pub fn resnet20(sparse: bool) -> Self {
        Self::new(vec![3, 3, 3]).with_sparse(sparse)
    }

    pub fn resnet26(sparse: bool) -> Self {
        Self::new(vec![4, 4, 4]).with_sparse(sparse)
    }

    pub fn resnet32(sparse: bool) -> Self {
        Self::new(vec![5, 5, 5]).with_sparse(sparse)
    }

    /// Preset by total depth (`6n + 2`).
    pub fn preset(depth: usize, sparse: bool) -> Result<Self, ConfigError> {
        match depth {
            8 => Ok(Self::resnet8(sparse)),
            14 => Ok(Self::resnet14(sparse)),
            20 => Ok(Self::resnet20(sparse)),
            26 => Ok(Self::resnet26(sparse)),
            32 => Ok(Self::resnet32(sparse)),
            other => Err(ConfigError::UnknownDepth(other)),
        }
    }

    /// Check the configuration without allocating any weights.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pretrained {
            return Err(ConfigError::PretrainedUnsupported);
        }
        if self.layers.len() != STAGES.len() {
            return Err(ConfigError::StageCount(self.layers.len()));
        }
        if let Some(stage) = self.layers.iter().position(|&n| n == 0) {
            return Err(ConfigError::EmptyStage { stage: stage + 1 });
        }
        if self.num_classes == 0 {
            return Err(ConfigError::NoClasses);
        }
        Ok(())
    }

    /// Total number of layers with weights: two per block, stem and head.
    pub fn depth(&self) -> usize {
        2 * self.layers.iter().sum::<usize>() + 2
    }

    /// Initialize the network.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ResNet<B>, ConfigError> {
        self.validate()?;

        let mut in_channels = BASE_WIDTH;
        let mut stages = Vec::with_capacity(STAGES.len());
        for (&(channels, stride), &blocks) in STAGES.iter().zip(&self.layers) {
            stages.push(self.init_stage(in_channels, channels, stride, blocks, device)?);
            in_channels = channels;
        }
        let [layer1, layer2, layer3]: [Stage<B>; 3] = match stages.try_into() {
            Ok(stages) => stages,
            Err(stages) => return Err(ConfigError::StageCount(stages.len())),
        };

        let model = ResNet {
            conv1: conv3x3(3, BASE_WIDTH, 1, device),
            bn1: BatchNormConfig::new(BASE_WIDTH).init(device),
            relu: Relu::new(),
            layer1,
            layer2,
            layer3,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(in_channels, self.num_classes)
                .with_initializer(initializer(LayerKind::Linear))
                .init(device),
            sparse: self.sparse,
        };
        debug!(
            depth = self.depth(),
            sparse = self.sparse,
            params = model.num_params(),
            "initialized resnet"
        );
        Ok(model)
    }

    /// A stage of `blocks` residual blocks. Only the first block may change
    /// width or stride, and gets a projection shortcut when it does.
    fn init_stage<B: Backend>(
        &self,
        in_channels: usize,
        channels: usize,
        stride: usize,
        blocks: usize,
        device: &B::Device,
    ) -> Result<Stage<B>, ConfigError> {
        let block = |in_channels: usize, stride: usize| {
            BasicBlockConfig::new(in_channels, channels)
                .with_stride(stride)
                .with_downsample(needs_projection(in_channels, channels, stride))
                .with_sparse(self.sparse)
                .with_all_active_masks(self.all_active_masks)
                .init(device)
        };

        let mut stage = Vec::with_capacity(blocks);
        stage.push(block(in_channels, stride)?);
        for _ in 1..blocks {
            stage.push(block(channels, 1)?);
        }
        Ok(Stage { blocks: stage })
    }
}

// ─── Stage ────────────────────────────────────────────────────────

/// Run of residual blocks sharing an output width.
#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    blocks: Vec<BasicBlock<B>>,
}

impl<B: Backend> Stage<B> {
    pub fn blocks(&self) -> &[BasicBlock<B>] {
        &self.blocks
    }

    pub fn shortcuts(&self) -> Vec<Shortcut> {
        self.blocks.iter().map(BasicBlock::shortcut).collect()
    }

    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        meta: Metadata<B>,
    ) -> Result<(Tensor<B, 4>, Metadata<B>), ForwardError> {
        self.blocks
            .iter()
            .try_fold((x, meta), |(x, meta), block| block.forward(x, meta))
    }

    fn into_dense(self) -> Self {
        Self {
            blocks: self.blocks.into_iter().map(BasicBlock::into_dense).collect(),
        }
    }
}

// ─── Network ──────────────────────────────────────────────────────

/// ResNet for 32x32 inputs.
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    relu: Relu,
    layer1: Stage<B>,
    layer2: Stage<B>,
    layer3: Stage<B>,
    avgpool: AdaptiveAvgPool2d,
    fc: Linear<B>,
    sparse: bool,
}

impl<B: Backend> ResNet<B> {
    pub fn sparse(&self) -> bool {
        self.sparse
    }

    pub fn stages(&self) -> [&Stage<B>; 3] {
        [&self.layer1, &self.layer2, &self.layer3]
    }

    /// Total number of residual blocks.
    pub fn num_blocks(&self) -> usize {
        self.stages().iter().map(|s| s.blocks.len()).sum()
    }

    /// The same network with every masking unit removed.
    pub fn into_dense(self) -> Self {
        Self {
            layer1: self.layer1.into_dense(),
            layer2: self.layer2.into_dense(),
            layer3: self.layer3.into_dense(),
            sparse: false,
            ..self
        }
    }

    /// Classify a batch of `[N, 3, 32, 32]` images.
    ///
    /// Returns `[N, num_classes]` logits and the metadata after the last
    /// block. A sparse network needs `Some` context.
    pub fn forward(
        &self,
        images: Tensor<B, 4>,
        meta: Metadata<B>,
    ) -> Result<(Tensor<B, 2>, Metadata<B>), ForwardError> {
        let x = self.conv1.forward(images);
        let x = self.bn1.forward(x);
        let x = self.relu.forward(x);

        let (x, meta) = self.layer1.forward(x, meta)?;
        let (x, meta) = self.layer2.forward(x, meta)?;
        let (x, meta) = self.layer3.forward(x, meta)?;

        let x = self.avgpool.forward(x);
        let [n, c, _, _] = x.dims();
        let logits = self.fc.forward(x.reshape([n, c]));

        if let Some(ctx) = &meta {
            debug!(blocks = ctx.num_blocks(), "sparse forward complete");
        }
        Ok((logits, meta))
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynconv::SparsityConfig;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray;

    fn images(batch: usize, device: &<B as Backend>::Device) -> Tensor<B, 4> {
        Tensor::<B, 4>::random([batch, 3, 32, 32], Distribution::Normal(0.0, 1.0), device)
    }

    #[test]
    fn rejects_wrong_stage_count() {
        let device = Default::default();
        let err = ResNetConfig::new(vec![1, 1]).init::<B>(&device).unwrap_err();
        assert_eq!(err, ConfigError::StageCount(2));
        let err = ResNetConfig::new(vec![1, 1, 1, 1]).validate().unwrap_err();
        assert_eq!(err, ConfigError::StageCount(4));
    }

    #[test]
    fn rejects_pretrained_and_empty_stages() {
        let err = ResNetConfig::resnet8(false)
            .with_pretrained(true)
            .validate()
            .unwrap_err();
        assert_eq!(err, ConfigError::PretrainedUnsupported);

        let err = ResNetConfig::new(vec![1, 0, 1]).validate().unwrap_err();
        assert_eq!(err, ConfigError::EmptyStage { stage: 2 });

        let err = ResNetConfig::resnet8(false)
            .with_num_classes(0)
            .validate()
            .unwrap_err();
        assert_eq!(err, ConfigError::NoClasses);
    }

    #[test]
    fn presets_by_depth() {
        for depth in [8, 14, 20, 26, 32] {
            let config = ResNetConfig::preset(depth, false).unwrap();
            assert_eq!(config.depth(), depth);
        }
        assert_eq!(
            ResNetConfig::preset(18, false).unwrap_err(),
            ConfigError::UnknownDepth(18)
        );
    }

    #[test]
    fn stage_shortcut_layout() {
        let device = Default::default();
        let model = ResNetConfig::resnet20(false).init::<B>(&device).unwrap();
        let [s1, s2, s3] = model.stages();

        assert_eq!(s1.shortcuts(), vec![Shortcut::Identity; 3]);
        assert_eq!(
            s2.shortcuts(),
            vec![Shortcut::Projection, Shortcut::Identity, Shortcut::Identity]
        );
        assert_eq!(s2.blocks()[0].channels(), [16, 32]);
        assert_eq!(s2.blocks()[1].channels(), [32, 32]);
        assert_eq!(s3.blocks()[0].channels(), [32, 64]);
        assert_eq!(s3.shortcuts()[0], Shortcut::Projection);
        assert_eq!(model.num_blocks(), 9);
    }

    #[test]
    fn dense_forward_shape_and_determinism() {
        let device = Default::default();
        let model = ResNetConfig::resnet8(false)
            .with_num_classes(7)
            .init::<B>(&device)
            .unwrap();
        let x = images(2, &device);

        let (a, meta) = model.forward(x.clone(), None).unwrap();
        let (b, _) = model.forward(x, None).unwrap();
        assert_eq!(a.dims(), [2, 7]);
        assert!(meta.is_none());
        assert_eq!(
            a.into_data().to_vec::<f32>().unwrap(),
            b.into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn sparse_network_needs_context() {
        let device = Default::default();
        let model = ResNetConfig::resnet8(true).init::<B>(&device).unwrap();
        assert!(model.sparse());
        let err = model.forward(images(1, &device), None).unwrap_err();
        assert_eq!(err, ForwardError::MissingSparsityContext);
    }

    #[test]
    fn sparse_forward_records_every_block() {
        let device = Default::default();
        let model = ResNetConfig::resnet14(true).init::<B>(&device).unwrap();
        let ctx = SparsityConfig::new().init::<B>().unwrap();

        let (logits, meta) = model.forward(images(2, &device), Some(ctx)).unwrap();
        assert_eq!(logits.dims(), [2, 10]);

        let ctx = meta.unwrap();
        assert_eq!(ctx.num_blocks(), 6);
        let sizes: Vec<usize> = ctx.masks().iter().map(|m| m.std.dims()[2]).collect();
        assert_eq!(sizes, vec![32, 32, 16, 16, 8, 8]);
    }

    #[test]
    fn all_active_sparse_network_matches_dense() {
        let device = Default::default();
        let sparse = ResNetConfig::resnet8(true)
            .with_all_active_masks(true)
            .init::<B>(&device)
            .unwrap();
        let dense = sparse.clone().into_dense();
        assert!(!dense.sparse());

        let x = images(2, &device);
        let ctx = SparsityConfig::new().init::<B>().unwrap();
        let (s, meta) = sparse.forward(x.clone(), Some(ctx)).unwrap();
        let (d, _) = dense.forward(x, None).unwrap();

        let report = meta.unwrap().report();
        assert_eq!(report.saving(), 0.0);

        let s = s.into_data().to_vec::<f32>().unwrap();
        let d = d.into_data().to_vec::<f32>().unwrap();
        for (a, b) in s.iter().zip(&d) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }
}
