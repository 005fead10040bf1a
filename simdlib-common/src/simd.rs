//! Marker types that run a closure with a set of target features enabled.
//!
//! Kernels written once as `#[inline(always)]` generic code are compiled once
//! per marker, which lets the compiler vectorize them for that instruction set.

pub trait Simd: Copy + Send + Sync {
    unsafe fn vectorize(f: impl FnOnce());
}

#[derive(Copy, Clone, Debug)]
pub struct Scalar;

impl Simd for Scalar {
    #[inline(always)]
    unsafe fn vectorize(f: impl FnOnce()) {
        f()
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod x86 {
    use super::*;

    #[derive(Copy, Clone, Debug)]
    pub struct Sse41;
    #[derive(Copy, Clone, Debug)]
    pub struct Avx2;

    #[cfg(feature = "nightly")]
    #[derive(Copy, Clone, Debug)]
    pub struct Avx512bw;

    impl Simd for Sse41 {
        #[inline]
        #[target_feature(enable = "sse2,sse3,ssse3,sse4.1")]
        unsafe fn vectorize(f: impl FnOnce()) {
            f()
        }
    }

    impl Simd for Avx2 {
        #[inline]
        #[target_feature(enable = "avx2,fma")]
        unsafe fn vectorize(f: impl FnOnce()) {
            f()
        }
    }

    #[cfg(feature = "nightly")]
    impl Simd for Avx512bw {
        #[inline]
        #[target_feature(enable = "avx512f,avx512bw")]
        unsafe fn vectorize(f: impl FnOnce()) {
            f()
        }
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use x86::*;

#[cfg(target_arch = "aarch64")]
mod aarch64 {
    use super::*;

    #[derive(Copy, Clone, Debug)]
    pub struct Neon;

    impl Simd for Neon {
        #[inline]
        #[target_feature(enable = "neon")]
        unsafe fn vectorize(f: impl FnOnce()) {
            f()
        }
    }
}

#[cfg(target_arch = "aarch64")]
pub use aarch64::*;
