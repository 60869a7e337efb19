//! CIFAR-style ResNets with dynamic sparse convolution, built on burn.
//!
//! Every residual block can run densely or through a masking unit that
//! decides, per spatial position, whether the block's convolutions are
//! evaluated there. Mask state travels next to the feature map as
//! [`Metadata`](dynconv::Metadata): `None` in dense mode, a
//! [`SparsityContext`](dynconv::SparsityContext) in sparse mode.
//!
//! ```ignore
//! use burn::backend::NdArray;
//! use dynres::{ResNetConfig, SparsityConfig};
//!
//! let device = Default::default();
//! let model = ResNetConfig::resnet20(true).init::<NdArray>(&device)?;
//! let ctx = SparsityConfig::new().init()?;
//! let (logits, meta) = model.forward(images, Some(ctx))?;
//! println!("{}", meta.unwrap().report());
//! ```

pub mod dynconv;
pub mod error;
pub mod init;
pub mod model;

pub use dynconv::{Metadata, SparsityConfig, SparsityContext, SparsityReport};
pub use error::{ConfigError, Error, ForwardError, Result};
pub use model::{ResNet, ResNetConfig};
