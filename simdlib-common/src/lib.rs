#![cfg_attr(
    feature = "nightly",
    feature(avx512_target_feature, stdarch_x86_avx512)
)]
#![warn(rust_2018_idioms)]

pub mod cache;
pub mod conv;
pub mod error;
pub mod isa;
pub mod pack;
pub mod simd;

pub use conv::{Activation, ConvParam, MergConvKind, MergConvParam};
pub use error::{Error, Result};
pub use isa::{Isa, ISA};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Parallelism {
    None,
    /// Runs on the global rayon pool. `0` means as many threads as rayon has.
    Rayon(usize),
}

impl Parallelism {
    #[inline]
    pub fn n_threads(self) -> usize {
        match self {
            Parallelism::None => 1,
            Parallelism::Rayon(0) => rayon::current_num_threads(),
            Parallelism::Rayon(n) => n,
        }
    }
}

/// Runs `func(job)` for every job in `0..n_jobs`, on the rayon pool when
/// more than one thread is requested.
pub fn for_each(parallelism: Parallelism, n_jobs: usize, func: impl Fn(usize) + Send + Sync) {
    if parallelism.n_threads() <= 1 || n_jobs <= 1 {
        (0..n_jobs).for_each(func);
    } else {
        use rayon::prelude::*;
        (0..n_jobs).into_par_iter().for_each(func);
    }
}

pub struct Ptr<T>(pub *mut T);

impl<T> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Ptr<T> {}

unsafe impl<T> Send for Ptr<T> {}
unsafe impl<T> Sync for Ptr<T> {}

impl<T> Ptr<T> {
    #[inline(always)]
    pub fn wrapping_offset(self, offset: isize) -> Self {
        Ptr::<T>(self.0.wrapping_offset(offset))
    }
    #[inline(always)]
    pub fn wrapping_add(self, offset: usize) -> Self {
        Ptr::<T>(self.0.wrapping_add(offset))
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[macro_export]
macro_rules! feature_detected {
    ($tt: tt) => {
        ::std::arch::is_x86_feature_detected!($tt)
    };
}
#[cfg(target_arch = "aarch64")]
#[macro_export]
macro_rules! feature_detected {
    ($tt: tt) => {
        ::std::arch::is_aarch64_feature_detected!($tt)
    };
}
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
#[macro_export]
macro_rules! feature_detected {
    ($tt: tt) => {
        cfg!(target_feature = $tt)
    };
}

/// Checks that `slice` holds at least `required` elements.
#[inline]
pub fn check_len<T>(name: &'static str, slice: &[T], required: usize) -> Result<()> {
    if slice.len() < required {
        Err(Error::BufferTooSmall {
            name,
            required,
            actual: slice.len(),
        })
    } else {
        Ok(())
    }
}
