//! Residual blocks and the CIFAR ResNet backbone.

pub mod block;
pub mod resnet;

pub use block::{BasicBlock, BasicBlockConfig, Downsample, Execution, Shortcut};
pub use resnet::{ResNet, ResNetConfig, Stage};
