//! Linear (affine) quantization between `f32` and `u8`.
//!
//! `q = clamp(round(x / scale) + zero, 0, 255)` and `x = (q - zero) * scale`,
//! with rounding to nearest, ties to even. Kernels take `norm = 1 / scale`
//! when quantizing and `bias = -zero`, `norm = scale` when dequantizing.

use simdlib_common::{check_len, Isa, Result, ISA};

#[derive(Copy, Clone)]
pub(crate) struct LinearKernels {
    pub quantize: unsafe fn(*const f32, usize, f32, i32, *mut u8),
    pub dequantize: unsafe fn(*const u8, usize, i32, f32, *mut f32),
    /// `dst` may alias `a` or `b`.
    pub add: unsafe fn(*const u8, *const u8, usize, &AddParams, *mut u8),
}

/// Dequantize both operands, add, requantize.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct AddParams {
    pub a_bias: i32,
    pub a_norm: f32,
    pub b_bias: i32,
    pub b_norm: f32,
    pub d_norm: f32,
    pub d_zero: i32,
}

macro_rules! linear_kernels {
    ($([$target: tt])?) => {
        #[inline]
        $(#[target_feature(enable = $target)])?
        pub unsafe fn quantize(src: *const f32, len: usize, norm: f32, zero: i32, dst: *mut u8) {
            let norm = splat_f32(norm);
            let lo = splat_f32(-zero as f32);
            let hi = splat_f32((255 - zero) as f32);
            let zero = splat_i32(zero);
            let quantize = |value: F32s| {
                let value = min_f32(max_f32(mul_f32(value, norm), lo), hi);
                add_i32(round_i32(value), zero)
            };

            let mut i = 0;
            while i + N <= len {
                store_u8(dst.add(i), quantize(load_f32(src.add(i))));
                i += N;
            }
            if i < len {
                let tail = len - i;
                store_u8_tail(dst.add(i), tail, quantize(load_f32_tail(src.add(i), tail)));
            }
        }

        #[inline]
        $(#[target_feature(enable = $target)])?
        pub unsafe fn dequantize(src: *const u8, len: usize, bias: i32, norm: f32, dst: *mut f32) {
            let bias = splat_i32(bias);
            let norm = splat_f32(norm);

            let mut i = 0;
            while i + N <= len {
                let value = mul_f32(to_f32(add_i32(load_u8(src.add(i)), bias)), norm);
                store_f32(dst.add(i), value);
                i += N;
            }
            if i < len {
                let tail = len - i;
                let value = mul_f32(to_f32(add_i32(load_u8_tail(src.add(i), tail), bias)), norm);
                store_f32_tail(dst.add(i), tail, value);
            }
        }

        #[inline]
        $(#[target_feature(enable = $target)])?
        pub unsafe fn add(a: *const u8, b: *const u8, len: usize, params: &AddParams, dst: *mut u8) {
            let a_bias = splat_i32(params.a_bias);
            let a_norm = splat_f32(params.a_norm);
            let b_bias = splat_i32(params.b_bias);
            let b_norm = splat_f32(params.b_norm);
            let d_norm = splat_f32(params.d_norm);
            let lo = splat_f32(-params.d_zero as f32);
            let hi = splat_f32((255 - params.d_zero) as f32);
            let d_zero = splat_i32(params.d_zero);
            let add = |a: I32s, b: I32s| {
                let a = mul_f32(to_f32(add_i32(a, a_bias)), a_norm);
                let b = mul_f32(to_f32(add_i32(b, b_bias)), b_norm);
                let value = min_f32(max_f32(mul_f32(add_f32(a, b), d_norm), lo), hi);
                add_i32(round_i32(value), d_zero)
            };

            let mut i = 0;
            while i + N <= len {
                let value = add(load_u8(a.add(i)), load_u8(b.add(i)));
                store_u8(dst.add(i), value);
                i += N;
            }
            if i < len {
                let tail = len - i;
                let value = add(load_u8_tail(a.add(i), tail), load_u8_tail(b.add(i), tail));
                store_u8_tail(dst.add(i), tail, value);
            }
        }

        pub const KERNELS: LinearKernels = LinearKernels {
            quantize,
            dequantize,
            add,
        };
    };
}

simdlib_common::isa_modules!(linear_kernels);

pub(crate) fn kernels(isa: Isa) -> LinearKernels {
    simdlib_common::select_kernels!(isa)
}

lazy_static::lazy_static! {
    static ref KERNELS: LinearKernels = kernels(*ISA);
}

/// Quantizes `src` into `dst[..src.len()]`.
pub fn quantize_linear(src: &[f32], norm: f32, zero: i32, dst: &mut [u8]) -> Result<()> {
    quantize_linear_impl(&KERNELS, src, norm, zero, dst)
}

pub fn quantize_linear_with(isa: Isa, src: &[f32], norm: f32, zero: i32, dst: &mut [u8]) -> Result<()> {
    quantize_linear_impl(&kernels(isa.check_available()?), src, norm, zero, dst)
}

fn quantize_linear_impl(
    kernels: &LinearKernels,
    src: &[f32],
    norm: f32,
    zero: i32,
    dst: &mut [u8],
) -> Result<()> {
    check_len("dst", dst, src.len())?;
    unsafe { (kernels.quantize)(src.as_ptr(), src.len(), norm, zero, dst.as_mut_ptr()) };
    Ok(())
}

/// Dequantizes `src` into `dst[..src.len()]`.
pub fn dequantize_linear(src: &[u8], bias: i32, norm: f32, dst: &mut [f32]) -> Result<()> {
    dequantize_linear_impl(&KERNELS, src, bias, norm, dst)
}

pub fn dequantize_linear_with(isa: Isa, src: &[u8], bias: i32, norm: f32, dst: &mut [f32]) -> Result<()> {
    dequantize_linear_impl(&kernels(isa.check_available()?), src, bias, norm, dst)
}

fn dequantize_linear_impl(
    kernels: &LinearKernels,
    src: &[u8],
    bias: i32,
    norm: f32,
    dst: &mut [f32],
) -> Result<()> {
    check_len("dst", dst, src.len())?;
    unsafe { (kernels.dequantize)(src.as_ptr(), src.len(), bias, norm, dst.as_mut_ptr()) };
    Ok(())
}

/// `dst = quantize(dequantize(a) + dequantize(b))` over `a.len()` elements.
#[allow(clippy::too_many_arguments)]
pub fn quantized_add(
    a: &[u8],
    a_bias: i32,
    a_norm: f32,
    b: &[u8],
    b_bias: i32,
    b_norm: f32,
    d_norm: f32,
    d_zero: i32,
    dst: &mut [u8],
) -> Result<()> {
    let params = AddParams {
        a_bias,
        a_norm,
        b_bias,
        b_norm,
        d_norm,
        d_zero,
    };
    quantized_add_impl(&KERNELS, a, b, &params, dst)
}

#[allow(clippy::too_many_arguments)]
pub fn quantized_add_with(
    isa: Isa,
    a: &[u8],
    a_bias: i32,
    a_norm: f32,
    b: &[u8],
    b_bias: i32,
    b_norm: f32,
    d_norm: f32,
    d_zero: i32,
    dst: &mut [u8],
) -> Result<()> {
    let params = AddParams {
        a_bias,
        a_norm,
        b_bias,
        b_norm,
        d_norm,
        d_zero,
    };
    quantized_add_impl(&kernels(isa.check_available()?), a, b, &params, dst)
}

fn quantized_add_impl(
    kernels: &LinearKernels,
    a: &[u8],
    b: &[u8],
    params: &AddParams,
    dst: &mut [u8],
) -> Result<()> {
    let len = a.len();
    check_len("b", b, len)?;
    check_len("dst", dst, len)?;
    unsafe { (kernels.add)(a.as_ptr(), b.as_ptr(), len, params, dst.as_mut_ptr()) };
    Ok(())
}
