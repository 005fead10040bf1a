#![warn(rust_2018_idioms)]

//! Multi-ISA SIMD kernels for image and neural network inference.
//!
//! Every kernel family picks its implementation once from [`ISA`], the most
//! capable instruction set of the running cpu (capped by the `SIMDLIB_ISA`
//! environment variable). The `*_with` forms run a given tier instead.

pub use simdlib_color as color;
pub use simdlib_common as common;
pub use simdlib_quant as quant;
pub use simdlib_winograd as winograd;

pub use dyn_stack;

pub use simdlib_color::{bgr_to_lab, bgr_to_lab_with, bgra_to_lab, bgra_to_lab_with};
pub use simdlib_common::{
    Activation, ConvParam, Error, Isa, MergConvKind, MergConvParam, Parallelism, Result, ISA,
};
pub use simdlib_quant::{
    dequantize_linear, dequantize_linear_with, quantize_linear, quantize_linear_with,
    quantized_add, quantized_add_with, AlgParam, SynetQuantizedMergedConvolution,
};
pub use simdlib_winograd::{WinogradConvolution, WinogradVariant};

use core::fmt;

/// Instruction set and cache sizes the kernels were tuned for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchReport {
    pub isa: Isa,
    pub kernel_tier: Isa,
    pub available: Vec<Isa>,
    /// L1, L2 and L3 in bytes.
    pub cache_sizes: [usize; 3],
}

impl fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let available: Vec<&str> = self.available.iter().map(|isa| isa.name()).collect();
        let [l1, l2, l3] = self.cache_sizes;
        write!(
            f,
            "isa: {} (kernels: {}), available: [{}], cache: L1 {} KiB, L2 {} KiB, L3 {} KiB",
            self.isa,
            self.kernel_tier,
            available.join(", "),
            l1 / 1024,
            l2 / 1024,
            l3 / 1024,
        )
    }
}

pub fn dispatch_report() -> DispatchReport {
    let isa = *ISA;
    DispatchReport {
        isa,
        kernel_tier: isa.kernel_tier(),
        available: Isa::available(),
        cache_sizes: simdlib_common::cache::cache_sizes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use dyn_stack::{DynStack, GlobalMemBuffer};

    #[test]
    fn test_dispatch_report() {
        let report = dispatch_report();
        dbg!(&report);
        assert!(report.available.contains(&report.isa));
        assert!(report.available.contains(&Isa::Base));
        assert!(report.isa.kernel_tier() == report.kernel_tier);
        assert!(report.to_string().starts_with(&format!("isa: {}", report.isa.name())));
    }

    #[test]
    fn test_lab_then_dequantize() {
        // white and black, L scaled back to 0..=100
        let bgr = [255u8, 255, 255, 0, 0, 0];
        let mut lab = [0u8; 6];
        bgr_to_lab(&bgr, 6, 2, 1, &mut lab, 6).unwrap();
        let mut l = [0.0f32; 2];
        dequantize_linear(&[lab[0], lab[3]], 0, 100.0 / 255.0, &mut l).unwrap();
        assert_approx_eq!(l[0], 100.0, 1e-4);
        assert_approx_eq!(l[1], 0.0, 1e-4);
    }

    #[test]
    fn test_quantize_round_trip() {
        let scale = 2.0 / 255.0;
        let src: Vec<f32> = (0..1000).map(|_| rand::random::<f32>() * 2.0 - 1.0).collect();
        let mut q = vec![0u8; src.len()];
        let mut back = vec![0.0f32; src.len()];
        quantize_linear(&src, 1.0 / scale, 128, &mut q).unwrap();
        dequantize_linear(&q, -128, scale, &mut back).unwrap();
        for (x, y) in src.iter().zip(&back) {
            assert!((x - y).abs() <= scale * 0.5 + 1e-5);
        }
    }

    /// Winograd against an im2col product through the packed gemm.
    #[test]
    fn test_winograd_matches_im2col() {
        let batch = 2;
        let p = ConvParam::new(6, 9, 7, 5, 3, 3).with_pad([1; 4]);
        let src: Vec<f32> = (0..batch * p.src_size()).map(|_| rand::random::<f32>() - 0.5).collect();
        let weight: Vec<f32> = (0..p.weight_size()).map(|_| rand::random::<f32>() - 0.5).collect();

        let mut conv = WinogradConvolution::new(batch, p).unwrap();
        conv.set_params(&weight, None).unwrap();
        let mut dst = vec![0.0; batch * p.dst_size()];
        conv.forward_internal(&src, &mut dst, Parallelism::Rayon(0)).unwrap();

        let (m, k, n) = (p.dst_h * p.dst_w, p.kernel_y * p.kernel_x * p.src_c, p.dst_c);
        for b in 0..batch {
            let image = &src[b * p.src_size()..];
            let mut cols = vec![0.0f32; m * k];
            for y in 0..p.dst_h {
                for x in 0..p.dst_w {
                    for ky in 0..p.kernel_y {
                        for kx in 0..p.kernel_x {
                            let sy = (y + ky) as isize - p.pad_y as isize;
                            let sx = (x + kx) as isize - p.pad_x as isize;
                            if sy < 0 || sx < 0 || sy as usize >= p.src_h || sx as usize >= p.src_w {
                                continue;
                            }
                            let row = (y * p.dst_w + x) * k + (ky * p.kernel_x + kx) * p.src_c;
                            let pixel = (sy as usize * p.src_w + sx as usize) * p.src_c;
                            cols[row..row + p.src_c].copy_from_slice(&image[pixel..pixel + p.src_c]);
                        }
                    }
                }
            }
            let mut expected = vec![0.0f32; m * n];
            let mut mem = GlobalMemBuffer::new(winograd::gemm_req(m, n, k).unwrap());
            winograd::gemm(m, n, k, &mut expected, n, &cols, k, &weight, n, DynStack::new(&mut mem)).unwrap();
            for (x, y) in dst[b * p.dst_size()..(b + 1) * p.dst_size()].iter().zip(&expected) {
                assert_approx_eq!(x, y, 1e-3);
            }
        }
    }
}
