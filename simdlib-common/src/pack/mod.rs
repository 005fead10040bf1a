//! Register-width vector primitives, one module per instruction set.
//!
//! Every module exposes the same names: a lane count `N`, the `I32s` and
//! `F32s` pack types, the `Arch` marker and `#[inline(always)]` operations on
//! them. Kernel crates write a kernel body once inside a macro and instantiate
//! it in each module's scope, adding the matching `#[target_feature]`.
//!
//! Rounding (`round_i32`) is to nearest, ties to even, in every module. Float
//! `min`/`max` return the second operand when the first is NaN. `store_u8`
//! saturates to `0..=255`; `scatter_u8` keeps the low byte.

macro_rules! tail_helpers {
    () => {
        #[inline(always)]
        pub unsafe fn load_u8_tail(ptr: *const u8, len: usize) -> I32s {
            debug_assert!(len <= N);
            let mut tmp = [0u8; N];
            core::ptr::copy_nonoverlapping(ptr, tmp.as_mut_ptr(), len);
            load_u8(tmp.as_ptr())
        }

        #[inline(always)]
        pub unsafe fn load_i8_tail(ptr: *const i8, len: usize) -> I32s {
            debug_assert!(len <= N);
            let mut tmp = [0i8; N];
            core::ptr::copy_nonoverlapping(ptr, tmp.as_mut_ptr(), len);
            load_i8(tmp.as_ptr())
        }

        #[inline(always)]
        pub unsafe fn store_u8_tail(ptr: *mut u8, len: usize, value: I32s) {
            debug_assert!(len <= N);
            let mut tmp = [0u8; N];
            store_u8(tmp.as_mut_ptr(), value);
            core::ptr::copy_nonoverlapping(tmp.as_ptr(), ptr, len);
        }

        #[inline(always)]
        pub unsafe fn load_i32_tail(ptr: *const i32, len: usize) -> I32s {
            debug_assert!(len <= N);
            let mut tmp = [0i32; N];
            core::ptr::copy_nonoverlapping(ptr, tmp.as_mut_ptr(), len);
            load_i32(tmp.as_ptr())
        }

        #[inline(always)]
        pub unsafe fn store_i32_tail(ptr: *mut i32, len: usize, value: I32s) {
            debug_assert!(len <= N);
            let mut tmp = [0i32; N];
            store_i32(tmp.as_mut_ptr(), value);
            core::ptr::copy_nonoverlapping(tmp.as_ptr(), ptr, len);
        }

        #[inline(always)]
        pub unsafe fn load_f32_tail(ptr: *const f32, len: usize) -> F32s {
            debug_assert!(len <= N);
            let mut tmp = [0.0f32; N];
            core::ptr::copy_nonoverlapping(ptr, tmp.as_mut_ptr(), len);
            load_f32(tmp.as_ptr())
        }

        #[inline(always)]
        pub unsafe fn store_f32_tail(ptr: *mut f32, len: usize, value: F32s) {
            debug_assert!(len <= N);
            let mut tmp = [0.0f32; N];
            store_f32(tmp.as_mut_ptr(), value);
            core::ptr::copy_nonoverlapping(tmp.as_ptr(), ptr, len);
        }

        /// Saturates to `0..=255`.
        #[inline(always)]
        pub unsafe fn clamp_u8(value: I32s) -> I32s {
            min_i32(max_i32(value, splat_i32(0)), splat_i32(255))
        }

        /// `clamp(round((sum + bias) * norm) + zero, lo, hi)` with the clamp done
        /// on the float value, so out of range sums saturate instead of wrapping.
        #[inline(always)]
        pub unsafe fn quantize(sum: I32s, bias: I32s, norm: F32s, zero: I32s, lo: F32s, hi: F32s) -> I32s {
            let value = mul_f32(to_f32(add_i32(sum, bias)), norm);
            add_i32(round_i32(min_f32(max_f32(value, lo), hi)), zero)
        }
    };
}

/// Instantiates `$kernels!` once per instruction set, each in a module named
/// after it (`scalar`, `sse41`, `avx2`, `avx512bw`, `neon`) with that module's
/// primitives in scope. `$kernels!` receives the target feature string.
#[macro_export]
macro_rules! isa_modules {
    ($kernels: ident) => {
        #[allow(dead_code)]
        mod scalar {
            use super::*;
            use $crate::pack::scalar::*;
            $kernels!();
        }

        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        #[allow(dead_code)]
        mod sse41 {
            use super::*;
            use $crate::pack::sse41::*;
            $kernels!(["sse2,sse3,ssse3,sse4.1"]);
        }

        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        #[allow(dead_code)]
        mod avx2 {
            use super::*;
            use $crate::pack::avx2::*;
            $kernels!(["avx2,fma"]);
        }

        #[cfg(all(feature = "nightly", any(target_arch = "x86", target_arch = "x86_64")))]
        #[allow(dead_code)]
        mod avx512bw {
            use super::*;
            use $crate::pack::avx512bw::*;
            $kernels!(["avx512f,avx512bw"]);
        }

        #[cfg(target_arch = "aarch64")]
        #[allow(dead_code)]
        mod neon {
            use super::*;
            use $crate::pack::neon::*;
            $kernels!(["neon"]);
        }
    };
}

/// The `KERNELS` table of the module generated by [`isa_modules!`] that runs
/// on `$isa`.
#[macro_export]
macro_rules! select_kernels {
    ($isa: expr) => {
        match $crate::Isa::kernel_tier($isa) {
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            $crate::Isa::Sse41 => sse41::KERNELS,
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            $crate::Isa::Avx2 => avx2::KERNELS,
            #[cfg(all(feature = "nightly", any(target_arch = "x86", target_arch = "x86_64")))]
            $crate::Isa::Avx512bw => avx512bw::KERNELS,
            #[cfg(target_arch = "aarch64")]
            $crate::Isa::Neon => neon::KERNELS,
            _ => scalar::KERNELS,
        }
    };
}

pub mod scalar;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod sse41;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod avx2;

#[cfg(all(feature = "nightly", any(target_arch = "x86", target_arch = "x86_64")))]
pub mod avx512bw;

#[cfg(target_arch = "aarch64")]
pub mod neon;
