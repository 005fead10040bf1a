//! Row-major `f32` matrix product, `dst = lhs * rhs`.
//!
//! The rhs is packed into zero-padded panels of `nr = 2 * N` columns per
//! depth block; microkernels keep an `mr x nr` block of dst in registers and
//! broadcast lhs elements straight from memory.

use dyn_stack::{DynStack, SizeOverflow, StackReq};
use simdlib_common::cache::{kernel_params, DivCeil};
use simdlib_common::{check_len, Error, Isa, Result, ISA};

pub(crate) const MR: usize = 4;
const ALIGN: usize = 64;

/// `(k, lhs, lhs_rs, packed_rhs, dst, dst_rs, n, overwrite)`
pub(crate) type MicroKernelFn = unsafe fn(usize, *const f32, usize, *const f32, *mut f32, usize, usize, bool);

#[derive(Copy, Clone)]
pub(crate) struct GemmKernels {
    pub nr: usize,
    /// Indexed by `mr - 1`.
    pub ukr: [MicroKernelFn; MR],
}

macro_rules! gemm_kernels {
    ($([$target: tt])?) => {
        #[inline]
        $(#[target_feature(enable = $target)])?
        pub unsafe fn microkernel<const M: usize>(
            k: usize,
            lhs: *const f32,
            lhs_rs: usize,
            packed_rhs: *const f32,
            dst: *mut f32,
            dst_rs: usize,
            n: usize,
            overwrite: bool,
        ) {
            let mut accum = [[splat_f32(0.0); 2]; M];
            let mut rhs = packed_rhs;
            for depth in 0..k {
                let b = [load_f32(rhs), load_f32(rhs.add(N))];
                for (row, accum) in accum.iter_mut().enumerate() {
                    let a = splat_f32(*lhs.add(row * lhs_rs + depth));
                    seq_macro::seq!(J in 0..2 {
                        accum[J] = mul_add_f32(a, b[J], accum[J]);
                    });
                }
                rhs = rhs.add(2 * N);
            }

            for (row, accum) in accum.iter().enumerate() {
                let dst = dst.add(row * dst_rs);
                if n == 2 * N {
                    seq_macro::seq!(J in 0..2 {
                        let ptr = dst.add(J * N);
                        let value = if overwrite {
                            accum[J]
                        } else {
                            add_f32(load_f32(ptr), accum[J])
                        };
                        store_f32(ptr, value);
                    });
                } else {
                    let mut tmp = [0.0f32; 2 * N];
                    store_f32(tmp.as_mut_ptr(), accum[0]);
                    store_f32(tmp.as_mut_ptr().add(N), accum[1]);
                    for (j, value) in tmp[..n].iter().enumerate() {
                        let ptr = dst.add(j);
                        *ptr = if overwrite { *value } else { *ptr + *value };
                    }
                }
            }
        }

        pub const KERNELS: GemmKernels = GemmKernels {
            nr: 2 * N,
            ukr: [
                microkernel::<1>,
                microkernel::<2>,
                microkernel::<3>,
                microkernel::<4>,
            ],
        };
    };
}

simdlib_common::isa_modules!(gemm_kernels);

pub(crate) fn kernels(isa: Isa) -> GemmKernels {
    simdlib_common::select_kernels!(isa)
}

lazy_static::lazy_static! {
    static ref KERNELS: GemmKernels = kernels(*ISA);
}

impl GemmKernels {
    /// `(kc, nc)` for an `m x k` by `k x n` product.
    fn blocking(&self, m: usize, n: usize, k: usize) -> (usize, usize) {
        let params = kernel_params(m, n, k, MR, self.nr, core::mem::size_of::<f32>());
        (params.kc.max(1), params.nc.max(self.nr))
    }

    /// Elements of the rhs packing buffer.
    pub(crate) fn packed_len(&self, m: usize, n: usize, k: usize) -> usize {
        let (kc, nc) = self.blocking(m, n, k);
        kc * nc.min(n.msrv_next_multiple_of(self.nr))
    }

    pub(crate) fn req(&self, m: usize, n: usize, k: usize) -> Result<StackReq, SizeOverflow> {
        StackReq::try_new_aligned::<f32>(self.packed_len(m, n, k), ALIGN)
    }

    /// # Safety
    ///
    /// `lhs`, `rhs` and `dst` must cover the `m x k`, `k x n` and `m x n`
    /// matrices with their row strides, `packed` must hold
    /// [`packed_len`](Self::packed_len) elements and `dst` must not overlap
    /// the inputs.
    #[allow(clippy::too_many_arguments)]
    pub(crate) unsafe fn run(
        &self,
        m: usize,
        n: usize,
        k: usize,
        dst: *mut f32,
        dst_rs: usize,
        lhs: *const f32,
        lhs_rs: usize,
        rhs: *const f32,
        rhs_rs: usize,
        packed: *mut f32,
    ) {
        if m == 0 || n == 0 {
            return;
        }
        if k == 0 {
            for row in 0..m {
                core::ptr::write_bytes(dst.add(row * dst_rs), 0, n);
            }
            return;
        }

        let nr = self.nr;
        let (kc, nc) = self.blocking(m, n, k);

        let mut col = 0;
        while col < n {
            let n_chunk = nc.min(n - col);
            let panels = n_chunk.msrv_div_ceil(nr);

            let mut depth = 0;
            while depth < k {
                let k_chunk = kc.min(k - depth);

                for panel in 0..panels {
                    let packed = packed.add(panel * k_chunk * nr);
                    let first = col + panel * nr;
                    let cols = nr.min(n - first);
                    for kk in 0..k_chunk {
                        let src = rhs.add((depth + kk) * rhs_rs + first);
                        let dst = packed.add(kk * nr);
                        core::ptr::copy_nonoverlapping(src, dst, cols);
                        core::ptr::write_bytes(dst.add(cols), 0, nr - cols);
                    }
                }

                let mut row = 0;
                while row < m {
                    let mr = MR.min(m - row);
                    let ukr = self.ukr[mr - 1];
                    for panel in 0..panels {
                        let first = col + panel * nr;
                        ukr(
                            k_chunk,
                            lhs.add(row * lhs_rs + depth),
                            lhs_rs,
                            packed.add(panel * k_chunk * nr),
                            dst.add(row * dst_rs + first),
                            dst_rs,
                            nr.min(n - first),
                            depth == 0,
                        );
                    }
                    row += mr;
                }

                depth += k_chunk;
            }
            col += n_chunk;
        }
    }
}

/// Scratch memory needed by [`gemm`].
pub fn gemm_req(m: usize, n: usize, k: usize) -> Result<StackReq, SizeOverflow> {
    KERNELS.req(m, n, k)
}

/// Like [`gemm_req`], failing for instruction sets this cpu lacks.
pub fn gemm_req_with(isa: Isa, m: usize, n: usize, k: usize) -> Result<StackReq> {
    Ok(kernels(isa.check_available()?).req(m, n, k)?)
}

/// `dst = lhs * rhs` for row-major `m x k` and `k x n` matrices with row
/// strides `lhs_rs`, `rhs_rs` and `dst_rs`.
///
/// # Panics
///
/// Panics if `stack` cannot hold [`gemm_req`].
#[allow(clippy::too_many_arguments)]
pub fn gemm(
    m: usize,
    n: usize,
    k: usize,
    dst: &mut [f32],
    dst_rs: usize,
    lhs: &[f32],
    lhs_rs: usize,
    rhs: &[f32],
    rhs_rs: usize,
    stack: DynStack<'_>,
) -> Result<()> {
    gemm_impl(&KERNELS, m, n, k, dst, dst_rs, lhs, lhs_rs, rhs, rhs_rs, stack)
}

#[allow(clippy::too_many_arguments)]
pub fn gemm_with(
    isa: Isa,
    m: usize,
    n: usize,
    k: usize,
    dst: &mut [f32],
    dst_rs: usize,
    lhs: &[f32],
    lhs_rs: usize,
    rhs: &[f32],
    rhs_rs: usize,
    stack: DynStack<'_>,
) -> Result<()> {
    let kernels = kernels(isa.check_available()?);
    gemm_impl(&kernels, m, n, k, dst, dst_rs, lhs, lhs_rs, rhs, rhs_rs, stack)
}

fn matrix_len(rows: usize, cols: usize, rs: usize) -> usize {
    match rows {
        0 => 0,
        _ => (rows - 1) * rs + cols,
    }
}

#[allow(clippy::too_many_arguments)]
fn gemm_impl(
    kernels: &GemmKernels,
    m: usize,
    n: usize,
    k: usize,
    dst: &mut [f32],
    dst_rs: usize,
    lhs: &[f32],
    lhs_rs: usize,
    rhs: &[f32],
    rhs_rs: usize,
    stack: DynStack<'_>,
) -> Result<()> {
    if (m > 1 && dst_rs < n) || (m > 1 && lhs_rs < k) || (k > 1 && rhs_rs < n) {
        return Err(Error::InvalidParam("row stride shorter than a row"));
    }
    check_len("dst", dst, matrix_len(m, n, dst_rs))?;
    check_len("lhs", lhs, matrix_len(m, k, lhs_rs))?;
    check_len("rhs", rhs, matrix_len(k, n, rhs_rs))?;

    let (mut packed, _) = stack.make_aligned_uninit::<f32>(kernels.packed_len(m, n, k), ALIGN);
    unsafe {
        kernels.run(
            m,
            n,
            k,
            dst.as_mut_ptr(),
            dst_rs,
            lhs.as_ptr(),
            lhs_rs,
            rhs.as_ptr(),
            rhs_rs,
            packed.as_mut_ptr() as *mut f32,
        )
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use dyn_stack::GlobalMemBuffer;

    #[test]
    fn test_gemm() {
        for isa in Isa::available() {
            for (m, n, k) in [(1, 1, 1), (3, 5, 7), (4, 16, 9), (13, 33, 65), (64, 20, 600), (5, 0, 3), (6, 7, 0)] {
                let (lhs_rs, rhs_rs, dst_rs) = (k + 3, n + 1, n + 2);
                let lhs: Vec<f32> = (0..m * lhs_rs).map(|_| rand::random::<f32>() - 0.5).collect();
                let rhs: Vec<f32> = (0..k * rhs_rs).map(|_| rand::random::<f32>() - 0.5).collect();
                let mut dst = vec![f32::NAN; m * dst_rs];

                let mut mem = GlobalMemBuffer::new(gemm_req_with(isa, m, n, k).unwrap());
                gemm_with(
                    isa,
                    m,
                    n,
                    k,
                    &mut dst,
                    dst_rs,
                    &lhs,
                    lhs_rs,
                    &rhs,
                    rhs_rs,
                    DynStack::new(&mut mem),
                )
                .unwrap();

                for i in 0..m {
                    for j in 0..n {
                        let expected: f32 = (0..k).map(|p| lhs[i * lhs_rs + p] * rhs[p * rhs_rs + j]).sum();
                        assert_approx_eq!(dst[i * dst_rs + j], expected, 1e-4);
                    }
                    // padding columns are untouched
                    assert!(dst[i * dst_rs + n..(i + 1) * dst_rs].iter().all(|x| x.is_nan()));
                }
            }
        }
    }

    #[test]
    fn test_bad_strides() {
        let a = [0.0f32; 6];
        let mut dst = [0.0f32; 4];
        let mut mem = GlobalMemBuffer::new(gemm_req(2, 2, 3).unwrap());
        assert!(gemm(2, 2, 3, &mut dst, 2, &a, 2, &a, 2, DynStack::new(&mut mem)).is_err());
        let mut mem = GlobalMemBuffer::new(gemm_req(2, 2, 3).unwrap());
        assert!(gemm(2, 2, 3, &mut dst, 2, &a, 3, &a, 2, DynStack::new(&mut mem)).is_ok());
    }

    #[test]
    fn test_unavailable_isa() {
        for isa in Isa::ALL.into_iter().filter(|isa| !isa.is_available()) {
            assert!(gemm_req_with(isa, 4, 4, 4).is_err());
            let mut mem = GlobalMemBuffer::new(gemm_req(4, 4, 4).unwrap());
            let mut dst = [0.0f32; 16];
            let a = [1.0f32; 16];
            assert!(gemm_with(isa, 4, 4, 4, &mut dst, 4, &a, 4, &a, 4, DynStack::new(&mut mem)).is_err());
        }
        for isa in Isa::available() {
            assert!(gemm_req_with(isa, 4, 4, 4).is_ok());
        }
    }
}
