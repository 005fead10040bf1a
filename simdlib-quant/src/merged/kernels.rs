use simdlib_common::Isa;

/// Requantization of one stage. `bias` and `norm` point at the first channel
/// the kernel writes; `lo`/`hi` bound the result relative to `zero`.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Term {
    pub bias: *const i32,
    pub norm: *const f32,
    pub zero: i32,
    pub lo: f32,
    pub hi: f32,
}

/// A 1x1 convolution over one row of pixels.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Pointwise {
    /// Elements between consecutive source pixels.
    pub src_stride: usize,
    pub src_c: usize,
    /// `[src_c][..]` rows, `weight_stride` apart.
    pub weight: *const i8,
    pub weight_stride: usize,
    pub dst_c: usize,
    /// Elements between consecutive destination (and accumulator) pixels.
    pub dst_stride: usize,
    pub term: Term,
}

/// A depthwise convolution reading a circular buffer of padded rows.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Depthwise {
    pub src: *const u8,
    pub row_stride: usize,
    pub row_mask: usize,
    pub pixel_stride: usize,
    pub channels: usize,
    pub kernel_y: usize,
    pub kernel_x: usize,
    pub stride_y: usize,
    pub stride_x: usize,
    pub dst_w: usize,
    /// `[kernel_y][kernel_x][..]` taps, `weight_stride` apart.
    pub weight: *const i8,
    pub weight_stride: usize,
    pub dst_stride: usize,
    pub term: Term,
}

#[derive(Copy, Clone)]
pub(crate) struct MergedKernels {
    /// `(conv, src_row, width, dst_row)`
    pub input: unsafe fn(&Pointwise, *const u8, usize, *mut u8),
    /// `(conv, dst_y, dst_row)`
    pub depthwise: unsafe fn(&Depthwise, usize, *mut u8),
    pub depthwise_3x3: unsafe fn(&Depthwise, usize, *mut u8),
    /// `(conv, src_row, width, update, last, sum_row, dst_row)`: adds to the
    /// sums in `sum_row` when `update`, quantizes into `dst_row` when `last`
    /// and stores the sums otherwise.
    pub output: unsafe fn(&Pointwise, *const u8, usize, bool, bool, *mut i32, *mut u8),
}

macro_rules! merged_kernels {
    ($([$target: tt])?) => {
        #[inline(always)]
        unsafe fn load_weight(ptr: *const i8, len: usize) -> I32s {
            if len == N {
                load_i8(ptr)
            } else {
                load_i8_tail(ptr, len)
            }
        }

        #[inline(always)]
        unsafe fn load_src(ptr: *const u8, len: usize) -> I32s {
            if len == N {
                load_u8(ptr)
            } else {
                load_u8_tail(ptr, len)
            }
        }

        #[inline(always)]
        unsafe fn save(dst: *mut u8, len: usize, sum: I32s, term: &Term, dc: usize) {
            let (bias, norm) = if len == N {
                (load_i32(term.bias.add(dc)), load_f32(term.norm.add(dc)))
            } else {
                (load_i32_tail(term.bias.add(dc), len), load_f32_tail(term.norm.add(dc), len))
            };
            let value = quantize(
                sum,
                bias,
                norm,
                splat_i32(term.zero),
                splat_f32(term.lo),
                splat_f32(term.hi),
            );
            if len == N {
                store_u8(dst, value)
            } else {
                store_u8_tail(dst, len, value)
            }
        }

        #[inline(always)]
        unsafe fn pointwise<const M: usize>(
            conv: &Pointwise,
            src: *const u8,
            update: bool,
            last: bool,
            sum: *mut i32,
            dst: *mut u8,
        ) {
            let mut dc = 0;
            while dc < conv.dst_c {
                let len = (conv.dst_c - dc).min(N);
                let mut acc = [splat_i32(0); M];
                if update {
                    for (m, acc) in acc.iter_mut().enumerate() {
                        let ptr = sum.add(m * conv.dst_stride + dc);
                        *acc = if len == N { load_i32(ptr) } else { load_i32_tail(ptr, len) };
                    }
                }
                let mut weight = conv.weight.add(dc);
                for ic in 0..conv.src_c {
                    let w = load_weight(weight, len);
                    for (m, acc) in acc.iter_mut().enumerate() {
                        let s = splat_i32(*src.add(m * conv.src_stride + ic) as i32);
                        *acc = add_i32(*acc, mullo_i32(s, w));
                    }
                    weight = weight.add(conv.weight_stride);
                }
                for (m, acc) in acc.iter().enumerate() {
                    if last {
                        save(dst.add(m * conv.dst_stride + dc), len, *acc, &conv.term, dc);
                    } else {
                        let ptr = sum.add(m * conv.dst_stride + dc);
                        if len == N {
                            store_i32(ptr, *acc)
                        } else {
                            store_i32_tail(ptr, len, *acc)
                        }
                    }
                }
                dc += N;
            }
        }

        #[inline(always)]
        unsafe fn pointwise_row(
            conv: &Pointwise,
            src: *const u8,
            width: usize,
            update: bool,
            last: bool,
            sum: *mut i32,
            dst: *mut u8,
        ) {
            const M: usize = 4;
            let mut x = 0;
            while x + M <= width {
                pointwise::<M>(
                    conv,
                    src.add(x * conv.src_stride),
                    update,
                    last,
                    sum.wrapping_add(x * conv.dst_stride),
                    dst.wrapping_add(x * conv.dst_stride),
                );
                x += M;
            }
            while x < width {
                pointwise::<1>(
                    conv,
                    src.add(x * conv.src_stride),
                    update,
                    last,
                    sum.wrapping_add(x * conv.dst_stride),
                    dst.wrapping_add(x * conv.dst_stride),
                );
                x += 1;
            }
        }

        #[inline]
        $(#[target_feature(enable = $target)])?
        pub unsafe fn input(conv: &Pointwise, src: *const u8, width: usize, dst: *mut u8) {
            pointwise_row(conv, src, width, false, true, core::ptr::null_mut(), dst)
        }

        #[inline]
        $(#[target_feature(enable = $target)])?
        pub unsafe fn output(
            conv: &Pointwise,
            src: *const u8,
            width: usize,
            update: bool,
            last: bool,
            sum: *mut i32,
            dst: *mut u8,
        ) {
            pointwise_row(conv, src, width, update, last, sum, dst)
        }

        #[inline]
        $(#[target_feature(enable = $target)])?
        pub unsafe fn depthwise(conv: &Depthwise, dy: usize, dst: *mut u8) {
            let mut dc = 0;
            while dc < conv.channels {
                let len = (conv.channels - dc).min(N);
                for dx in 0..conv.dst_w {
                    let mut acc = splat_i32(0);
                    for ky in 0..conv.kernel_y {
                        let row = (dy * conv.stride_y + ky) & conv.row_mask;
                        let src = conv.src.add(row * conv.row_stride + dx * conv.stride_x * conv.pixel_stride + dc);
                        let weight = conv.weight.add(ky * conv.kernel_x * conv.weight_stride + dc);
                        for kx in 0..conv.kernel_x {
                            let s = load_src(src.add(kx * conv.pixel_stride), len);
                            let w = load_weight(weight.add(kx * conv.weight_stride), len);
                            acc = add_i32(acc, mullo_i32(s, w));
                        }
                    }
                    save(dst.add(dx * conv.dst_stride + dc), len, acc, &conv.term, dc);
                }
                dc += N;
            }
        }

        #[inline]
        $(#[target_feature(enable = $target)])?
        pub unsafe fn depthwise_3x3(conv: &Depthwise, dy: usize, dst: *mut u8) {
            debug_assert!(conv.kernel_y == 3 && conv.kernel_x == 3);
            let rows: [*const u8; 3] = core::array::from_fn(|ky| {
                let row = (dy * conv.stride_y + ky) & conv.row_mask;
                conv.src.add(row * conv.row_stride)
            });
            let step = conv.stride_x * conv.pixel_stride;
            let ps = conv.pixel_stride;

            let mut dc = 0;
            while dc < conv.channels {
                let len = (conv.channels - dc).min(N);
                let mut w = [splat_i32(0); 9];
                for (k, w) in w.iter_mut().enumerate() {
                    *w = load_weight(conv.weight.add(k * conv.weight_stride + dc), len);
                }
                let [s0, s1, s2] = rows.map(|row| row.add(dc));
                for dx in 0..conv.dst_w {
                    let offset = dx * step;
                    let mut acc = splat_i32(0);
                    seq_macro::seq!(KX in 0..3 {
                        acc = add_i32(acc, mullo_i32(load_src(s0.add(offset + KX * ps), len), w[KX]));
                        acc = add_i32(acc, mullo_i32(load_src(s1.add(offset + KX * ps), len), w[3 + KX]));
                        acc = add_i32(acc, mullo_i32(load_src(s2.add(offset + KX * ps), len), w[6 + KX]));
                    });
                    save(dst.add(dx * conv.dst_stride + dc), len, acc, &conv.term, dc);
                }
                dc += N;
            }
        }

        pub const KERNELS: MergedKernels = MergedKernels {
            input,
            depthwise,
            depthwise_3x3,
            output,
        };
    };
}

simdlib_common::isa_modules!(merged_kernels);

pub(crate) fn kernels(isa: Isa) -> MergedKernels {
    simdlib_common::select_kernels!(isa)
}
