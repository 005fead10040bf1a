#![cfg_attr(
    feature = "nightly",
    feature(avx512_target_feature, stdarch_x86_avx512)
)]
#![warn(rust_2018_idioms)]

//! Quantized kernels on `u8` activations.
//!
//! [`linear`] converts between `f32` and linearly quantized `u8` and adds
//! quantized tensors; [`merged`] runs a quantized 1x1, depthwise, 1x1
//! convolution chain in one pass.

pub mod linear;
pub mod merged;

pub use linear::{
    dequantize_linear, dequantize_linear_with, quantize_linear, quantize_linear_with,
    quantized_add, quantized_add_with,
};
pub use merged::{AlgParam, SynetQuantizedMergedConvolution};
