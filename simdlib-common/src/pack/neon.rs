use core::arch::aarch64::*;
use core::mem::transmute;
use core::mem::MaybeUninit;

pub const N: usize = 4;
pub type I32s = [i32; N];
pub type F32s = [f32; N];
/// Runs closures with this module's target features.
pub type Arch = crate::simd::Neon;

#[inline(always)]
pub unsafe fn splat_i32(value: i32) -> I32s {
    transmute(vdupq_n_s32(value))
}

#[inline(always)]
pub unsafe fn load_i32(ptr: *const i32) -> I32s {
    transmute(vld1q_s32(ptr))
}

#[inline(always)]
pub unsafe fn store_i32(ptr: *mut i32, value: I32s) {
    vst1q_s32(ptr, transmute(value))
}

#[inline(always)]
pub unsafe fn add_i32(lhs: I32s, rhs: I32s) -> I32s {
    transmute(vaddq_s32(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn sub_i32(lhs: I32s, rhs: I32s) -> I32s {
    transmute(vsubq_s32(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn mullo_i32(lhs: I32s, rhs: I32s) -> I32s {
    transmute(vmulq_s32(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn min_i32(lhs: I32s, rhs: I32s) -> I32s {
    transmute(vminq_s32(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn max_i32(lhs: I32s, rhs: I32s) -> I32s {
    transmute(vmaxq_s32(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn sra_i32(value: I32s, shift: i32) -> I32s {
    // a negative left shift is an arithmetic right shift
    transmute(vshlq_s32(transmute(value), vdupq_n_s32(-shift)))
}

#[inline(always)]
pub unsafe fn load_u8(ptr: *const u8) -> I32s {
    let bytes = vreinterpret_u8_u32(vdup_n_u32((ptr as *const u32).read_unaligned()));
    let words = vmovl_u8(bytes);
    transmute(vreinterpretq_s32_u32(vmovl_u16(vget_low_u16(words))))
}

#[inline(always)]
pub unsafe fn load_i8(ptr: *const i8) -> I32s {
    let bytes = vreinterpret_s8_u32(vdup_n_u32((ptr as *const u32).read_unaligned()));
    let words = vmovl_s8(bytes);
    transmute(vmovl_s16(vget_low_s16(words)))
}

#[inline(always)]
pub unsafe fn store_u8(ptr: *mut u8, value: I32s) {
    let words = vqmovn_s32(transmute(value));
    let bytes = vqmovun_s16(vcombine_s16(words, words));
    (ptr as *mut u32).write_unaligned(vget_lane_u32::<0>(vreinterpret_u32_u8(bytes)));
}

#[inline(always)]
pub unsafe fn gather_u8(base: *const u8, stride: isize) -> I32s {
    let mut p = MaybeUninit::<I32s>::uninit();
    let ptr = p.as_mut_ptr() as *mut i32;
    seq_macro::seq!(ITER in 0..4 {
        *ptr.add(ITER) = *base.offset(ITER * stride) as i32;
    });
    p.assume_init()
}

#[inline(always)]
pub unsafe fn scatter_u8(base: *mut u8, stride: isize, value: I32s) {
    seq_macro::seq!(ITER in 0..4 {
        *base.offset(ITER * stride) = value[ITER] as u8;
    });
}

#[inline(always)]
pub unsafe fn lookup(table: *const i32, index: I32s) -> I32s {
    let mut p = MaybeUninit::<I32s>::uninit();
    let ptr = p.as_mut_ptr() as *mut i32;
    seq_macro::seq!(ITER in 0..4 {
        *ptr.add(ITER) = *table.add(index[ITER] as usize);
    });
    p.assume_init()
}

#[inline(always)]
pub unsafe fn splat_f32(value: f32) -> F32s {
    transmute(vdupq_n_f32(value))
}

#[inline(always)]
pub unsafe fn load_f32(ptr: *const f32) -> F32s {
    transmute(vld1q_f32(ptr))
}

#[inline(always)]
pub unsafe fn store_f32(ptr: *mut f32, value: F32s) {
    vst1q_f32(ptr, transmute(value))
}

#[inline(always)]
pub unsafe fn add_f32(lhs: F32s, rhs: F32s) -> F32s {
    transmute(vaddq_f32(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn sub_f32(lhs: F32s, rhs: F32s) -> F32s {
    transmute(vsubq_f32(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn mul_f32(lhs: F32s, rhs: F32s) -> F32s {
    transmute(vmulq_f32(transmute(lhs), transmute(rhs)))
}

#[inline(always)]
pub unsafe fn mul_add_f32(a: F32s, b: F32s, c: F32s) -> F32s {
    transmute(vfmaq_f32(transmute(c), transmute(a), transmute(b)))
}

#[inline(always)]
pub unsafe fn min_f32(lhs: F32s, rhs: F32s) -> F32s {
    let lhs: float32x4_t = transmute(lhs);
    let rhs: float32x4_t = transmute(rhs);
    transmute(vbslq_f32(vcltq_f32(lhs, rhs), lhs, rhs))
}

#[inline(always)]
pub unsafe fn max_f32(lhs: F32s, rhs: F32s) -> F32s {
    let lhs: float32x4_t = transmute(lhs);
    let rhs: float32x4_t = transmute(rhs);
    transmute(vbslq_f32(vcgtq_f32(lhs, rhs), lhs, rhs))
}

#[inline(always)]
pub unsafe fn to_f32(value: I32s) -> F32s {
    transmute(vcvtq_f32_s32(transmute(value)))
}

#[inline(always)]
pub unsafe fn round_i32(value: F32s) -> I32s {
    transmute(vcvtnq_s32_f32(transmute(value)))
}

tail_helpers!();
