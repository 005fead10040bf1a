pub const N: usize = 1;
pub type I32s = [i32; N];
pub type F32s = [f32; N];
/// Runs closures with this module's target features.
pub type Arch = crate::simd::Scalar;

#[inline(always)]
pub unsafe fn splat_i32(value: i32) -> I32s {
    [value]
}

#[inline(always)]
pub unsafe fn load_i32(ptr: *const i32) -> I32s {
    [*ptr]
}

#[inline(always)]
pub unsafe fn store_i32(ptr: *mut i32, value: I32s) {
    *ptr = value[0];
}

#[inline(always)]
pub unsafe fn add_i32(lhs: I32s, rhs: I32s) -> I32s {
    [lhs[0].wrapping_add(rhs[0])]
}

#[inline(always)]
pub unsafe fn sub_i32(lhs: I32s, rhs: I32s) -> I32s {
    [lhs[0].wrapping_sub(rhs[0])]
}

#[inline(always)]
pub unsafe fn mullo_i32(lhs: I32s, rhs: I32s) -> I32s {
    [lhs[0].wrapping_mul(rhs[0])]
}

#[inline(always)]
pub unsafe fn min_i32(lhs: I32s, rhs: I32s) -> I32s {
    [lhs[0].min(rhs[0])]
}

#[inline(always)]
pub unsafe fn max_i32(lhs: I32s, rhs: I32s) -> I32s {
    [lhs[0].max(rhs[0])]
}

#[inline(always)]
pub unsafe fn sra_i32(value: I32s, shift: i32) -> I32s {
    [value[0] >> shift]
}

#[inline(always)]
pub unsafe fn load_u8(ptr: *const u8) -> I32s {
    [*ptr as i32]
}

#[inline(always)]
pub unsafe fn load_i8(ptr: *const i8) -> I32s {
    [*ptr as i32]
}

#[inline(always)]
pub unsafe fn store_u8(ptr: *mut u8, value: I32s) {
    *ptr = value[0].clamp(0, u8::MAX as i32) as u8;
}

#[inline(always)]
pub unsafe fn gather_u8(base: *const u8, _stride: isize) -> I32s {
    [*base as i32]
}

#[inline(always)]
pub unsafe fn scatter_u8(base: *mut u8, _stride: isize, value: I32s) {
    *base = value[0] as u8;
}

#[inline(always)]
pub unsafe fn lookup(table: *const i32, index: I32s) -> I32s {
    [*table.add(index[0] as usize)]
}

#[inline(always)]
pub unsafe fn splat_f32(value: f32) -> F32s {
    [value]
}

#[inline(always)]
pub unsafe fn load_f32(ptr: *const f32) -> F32s {
    [*ptr]
}

#[inline(always)]
pub unsafe fn store_f32(ptr: *mut f32, value: F32s) {
    *ptr = value[0];
}

#[inline(always)]
pub unsafe fn add_f32(lhs: F32s, rhs: F32s) -> F32s {
    [lhs[0] + rhs[0]]
}

#[inline(always)]
pub unsafe fn sub_f32(lhs: F32s, rhs: F32s) -> F32s {
    [lhs[0] - rhs[0]]
}

#[inline(always)]
pub unsafe fn mul_f32(lhs: F32s, rhs: F32s) -> F32s {
    [lhs[0] * rhs[0]]
}

#[inline(always)]
pub unsafe fn mul_add_f32(a: F32s, b: F32s, c: F32s) -> F32s {
    add_f32(mul_f32(a, b), c)
}

#[inline(always)]
pub unsafe fn min_f32(lhs: F32s, rhs: F32s) -> F32s {
    [if lhs[0] < rhs[0] { lhs[0] } else { rhs[0] }]
}

#[inline(always)]
pub unsafe fn max_f32(lhs: F32s, rhs: F32s) -> F32s {
    [if lhs[0] > rhs[0] { lhs[0] } else { rhs[0] }]
}

#[inline(always)]
pub unsafe fn to_f32(value: I32s) -> F32s {
    [value[0] as f32]
}

#[inline(always)]
pub unsafe fn round_i32(value: F32s) -> I32s {
    [value[0].round_ties_even() as i32]
}

tail_helpers!();
