//! Dynamic sparse convolution: spatial masks, the unit that produces them,
//! and the primitives that execute convolution, batch-norm and activation
//! under a mask.

pub mod context;
pub mod mask;
pub mod ops;
pub mod unit;

pub use context::{BlockSparsity, Metadata, SparsityConfig, SparsityContext, SparsityReport};
pub use mask::{Mask, MaskPair};
pub use ops::{apply_mask, masked_bn_act, masked_conv1x1, masked_conv3x3};
pub use unit::{MaskUnit, MaskUnitConfig};
