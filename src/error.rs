//! Error types for network construction and forward execution.
//!
//! ```text
//! Error
//! ├── ConfigError   (rejected at construction time)
//! └── ForwardError  (rejected while running a forward pass)
//! ```
//!
//! Tensor shape mismatches are not represented here. The backend panics on
//! them, and a validated config cannot produce one.

use thiserror::Error;

/// Convenient `Result` alias for callers mixing construction and forward.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error, convertible from both phase-specific errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("forward error: {0}")]
    Forward(#[from] ForwardError),
}

/// Invalid network or masking configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The backbone has exactly three stages.
    #[error("expected 3 stage block counts, got {0}")]
    StageCount(usize),

    #[error("stage {stage} has no blocks")]
    EmptyStage { stage: usize },

    #[error("number of classes must be at least 1")]
    NoClasses,

    #[error("no pretrained weights are available for 32x32 ResNets")]
    PretrainedUnsupported,

    /// Depth passed to a preset lookup is not one of 8, 14, 20, 26, 32.
    #[error("no ResNet preset with depth {0} (expected 8, 14, 20, 26 or 32)")]
    UnknownDepth(usize),

    #[error("mask unit {field} must be at least 1")]
    MaskStride { field: &'static str },

    #[error("gumbel temperature must be positive and finite, got {0}")]
    GumbelTemperature(f64),
}

/// Failure while executing a forward pass.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForwardError {
    /// A sparse block was reached with dense-mode (absent) metadata.
    #[error("sparse block executed without a sparsity context")]
    MissingSparsityContext,
}
