#![cfg_attr(
    feature = "nightly",
    feature(avx512_target_feature, stdarch_x86_avx512)
)]
#![warn(rust_2018_idioms)]

pub mod convolution;
pub mod gemm;
pub mod transform;

pub use convolution::{select_variant, WinogradConvolution};
pub use gemm::{gemm, gemm_req, gemm_req_with, gemm_with};
pub use transform::{
    input_stride, output_stride, set_filter, set_filter_with, set_input, set_input_with, set_output,
    set_output_with, WinogradVariant,
};
