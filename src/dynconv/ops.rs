//! Masked execution primitives.
//!
//! Convolutions and normalization are evaluated by the dense burn modules;
//! the masks only carry the accounting. Values at masked-out positions are
//! computed but meaningless until [`apply_mask`] zeroes them before the
//! residual add, so BatchNorm always sees the same tensor as the dense path.

use burn::nn::conv::Conv2d;
use burn::nn::{BatchNorm, Relu};
use burn::prelude::*;

use super::mask::Mask;

/// Multiply-accumulates per output position of a convolution.
pub(crate) fn conv_flops_per_position<B: Backend>(conv: &Conv2d<B>) -> usize {
    conv.weight.dims().iter().product()
}

fn check_mask<B: Backend>(x: &Tensor<B, 4>, mask: &Mask<B>) {
    let [n, c, h, w] = x.dims();
    debug_assert_eq!(
        mask.dims(),
        [n, 1, h, w],
        "mask does not match feature map {:?}",
        [n, c, h, w]
    );
}

/// Zero every position of `x` where `mask` is inactive.
pub fn apply_mask<B: Backend>(x: Tensor<B, 4>, mask: &Mask<B>) -> Tensor<B, 4> {
    check_mask(&x, mask);
    let c = x.dims()[1];
    x * mask.expand_to(c)
}

/// 3x3 convolution accounted on the active positions of `output_mask`.
///
/// `input_mask` marks which input positions hold valid values; `None` means
/// the whole input is valid.
pub fn masked_conv3x3<B: Backend>(
    conv: &Conv2d<B>,
    x: Tensor<B, 4>,
    input_mask: Option<&Mask<B>>,
    output_mask: &mut Mask<B>,
) -> Tensor<B, 4> {
    if let Some(mask) = input_mask {
        check_mask(&x, mask);
    }
    output_mask.add_flops(conv_flops_per_position(conv));
    let out = conv.forward(x);
    check_mask(&out, output_mask);
    out
}

/// 1x1 convolution accounted on the active positions of `output_mask`.
pub fn masked_conv1x1<B: Backend>(
    conv: &Conv2d<B>,
    x: Tensor<B, 4>,
    output_mask: &mut Mask<B>,
) -> Tensor<B, 4> {
    output_mask.add_flops(conv_flops_per_position(conv));
    let out = conv.forward(x);
    check_mask(&out, output_mask);
    out
}

/// Batch-norm then optional ReLU for the positions `mask` keeps.
///
/// Statistics come from the full tensor, exactly as on the dense path.
pub fn masked_bn_act<B: Backend>(
    bn: &BatchNorm<B>,
    activation: Option<&Relu>,
    x: Tensor<B, 4>,
    mask: &Mask<B>,
) -> Tensor<B, 4> {
    check_mask(&x, mask);
    let x = bn.forward(x);
    match activation {
        Some(relu) => relu.forward(x),
        None => x,
    }
}
