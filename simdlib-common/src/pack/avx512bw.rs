#[cfg(target_arch = "x86")]
use core::arch::x86::*;
#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::*;
use core::mem::transmute;
use core::mem::MaybeUninit;

pub const N: usize = 16;
pub type I32s = [i32; N];
pub type F32s = [f32; N];
/// Runs closures with this module's target features.
pub type Arch = crate::simd::Avx512bw;

#[inline(always)]
pub unsafe fn splat_i32(value: i32) -> I32s {
    transmute(_mm512_set1_epi32(value))
}

#[inline(always)]
pub unsafe fn load_i32(ptr: *const i32) -> I32s {
    transmute(_mm512_loadu_si512(ptr as *const _))
}

#[inline(always)]
pub unsafe fn store_i32(ptr: *mut i32, value: I32s) {
    _mm512_storeu_si512(ptr as *mut _, transmute(value))
}

#[inline(always)]
pub unsafe fn add_i32(lhs: I32s, rhs: I32s) -> I32s {
    transmute(_mm512_add_epi32(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn sub_i32(lhs: I32s, rhs: I32s) -> I32s {
    transmute(_mm512_sub_epi32(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn mullo_i32(lhs: I32s, rhs: I32s) -> I32s {
    transmute(_mm512_mullo_epi32(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn min_i32(lhs: I32s, rhs: I32s) -> I32s {
    transmute(_mm512_min_epi32(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn max_i32(lhs: I32s, rhs: I32s) -> I32s {
    transmute(_mm512_max_epi32(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn sra_i32(value: I32s, shift: i32) -> I32s {
    transmute(_mm512_sra_epi32(transmute(value), _mm_cvtsi32_si128(shift)))
}

#[inline(always)]
pub unsafe fn load_u8(ptr: *const u8) -> I32s {
    transmute(_mm512_cvtepu8_epi32(_mm_loadu_si128(ptr as *const __m128i)))
}

#[inline(always)]
pub unsafe fn load_i8(ptr: *const i8) -> I32s {
    transmute(_mm512_cvtepi8_epi32(_mm_loadu_si128(ptr as *const __m128i)))
}

#[inline(always)]
pub unsafe fn store_u8(ptr: *mut u8, value: I32s) {
    let value = _mm512_max_epi32(transmute(value), _mm512_setzero_si512());
    _mm_storeu_si128(ptr as *mut __m128i, _mm512_cvtusepi32_epi8(value))
}

#[inline(always)]
pub unsafe fn gather_u8(base: *const u8, stride: isize) -> I32s {
    let mut p = MaybeUninit::<I32s>::uninit();
    let ptr = p.as_mut_ptr() as *mut i32;
    seq_macro::seq!(ITER in 0..16 {
        *ptr.add(ITER) = *base.offset(ITER * stride) as i32;
    });
    p.assume_init()
}

#[inline(always)]
pub unsafe fn scatter_u8(base: *mut u8, stride: isize, value: I32s) {
    seq_macro::seq!(ITER in 0..16 {
        *base.offset(ITER * stride) = value[ITER] as u8;
    });
}

#[inline(always)]
pub unsafe fn lookup(table: *const i32, index: I32s) -> I32s {
    let mut p = MaybeUninit::<I32s>::uninit();
    let ptr = p.as_mut_ptr() as *mut i32;
    seq_macro::seq!(ITER in 0..16 {
        *ptr.add(ITER) = *table.add(index[ITER] as usize);
    });
    p.assume_init()
}

#[inline(always)]
pub unsafe fn splat_f32(value: f32) -> F32s {
    transmute(_mm512_set1_ps(value))
}

#[inline(always)]
pub unsafe fn load_f32(ptr: *const f32) -> F32s {
    transmute(_mm512_loadu_ps(ptr))
}

#[inline(always)]
pub unsafe fn store_f32(ptr: *mut f32, value: F32s) {
    _mm512_storeu_ps(ptr, transmute(value))
}

#[inline(always)]
pub unsafe fn add_f32(lhs: F32s, rhs: F32s) -> F32s {
    transmute(_mm512_add_ps(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn sub_f32(lhs: F32s, rhs: F32s) -> F32s {
    transmute(_mm512_sub_ps(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn mul_f32(lhs: F32s, rhs: F32s) -> F32s {
    transmute(_mm512_mul_ps(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn mul_add_f32(a: F32s, b: F32s, c: F32s) -> F32s {
    transmute(_mm512_fmadd_ps(transmute(a), transmute(b), transmute(c)))
}

#[inline(always)]
pub unsafe fn min_f32(lhs: F32s, rhs: F32s) -> F32s {
    transmute(_mm512_min_ps(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn max_f32(lhs: F32s, rhs: F32s) -> F32s {
    transmute(_mm512_max_ps(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn to_f32(value: I32s) -> F32s {
    transmute(_mm512_cvtepi32_ps(transmute(value)))
}

#[inline(always)]
pub unsafe fn round_i32(value: F32s) -> I32s {
    transmute(_mm512_cvtps_epi32(transmute(value)))
}

tail_helpers!();
