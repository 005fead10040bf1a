#![cfg_attr(
    feature = "nightly",
    feature(avx512_target_feature, stdarch_x86_avx512)
)]
#![warn(rust_2018_idioms)]

pub mod lab;

pub use lab::{bgr_to_lab, bgr_to_lab_with, bgra_to_lab, bgra_to_lab_with};
