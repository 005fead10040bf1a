use simdlib_common::cache::{cache_sizes, pow2_hi, DivCeil};
use simdlib_common::{Isa, MergConvKind, MergConvParam};

/// Blocking of a merged convolution.
///
/// Channels of the depthwise stage are processed in blocks of `ma_c`, and
/// output rows in steps of `y_step[1]`. Each step keeps a window of
/// `y_step[0]` padded input rows, filled by the input stage, in a circular
/// buffer of `buf_h[0]` rows; the depthwise output lives in one of
/// `buf_h[1]` rows. Row `y` sits at slot `y & (buf_h - 1)`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AlgParam {
    /// Lanes of one register.
    pub mi_c: usize,
    /// Channels per block.
    pub ma_c: usize,
    /// Padded input rows read per step, and depthwise output rows per step.
    pub y_step: [usize; 2],
    pub buf_h: [usize; 2],
    /// Elements of the depthwise input (`u8`), depthwise output (`u8`) and
    /// output accumulator (`i32`) buffers.
    pub buf_size: [usize; 3],
}

impl AlgParam {
    pub fn new(param: &MergConvParam, isa: Isa) -> Self {
        Self::with_cache(param, isa, cache_sizes())
    }

    pub(crate) fn with_cache(param: &MergConvParam, isa: Isa, cache: [usize; 3]) -> Self {
        let [_, l2, l3] = cache;
        let kind = param.kind();
        let dw = param.depthwise();
        let channels = dw.src_c;
        let mi_c = isa.f32_lanes();

        let weight_bytes: usize = param.convs().iter().map(|conv| conv.weight_size()).sum();
        let count = weight_bytes / (l3 / 2).max(1) + 1;
        let ma_c = channels
            .msrv_div_ceil(count)
            .msrv_next_multiple_of(2 * mi_c)
            .min(channels);

        let padded_w = dw.src_w + dw.pad_x + dw.pad_w;
        let padded_h = dw.src_h + dw.pad_y + dw.pad_h;
        let out_w = dw.dst_w;
        let input_rows = |y_step: usize| ((y_step - 1) * dw.stride_y + dw.kernel_y).min(padded_h);
        let buffers = |y_step: usize| {
            let h0 = pow2_hi(input_rows(y_step));
            let h1 = pow2_hi(y_step);
            let size0 = h0 * padded_w * ma_c;
            let size1 = if kind == MergConvKind::Cd {
                0
            } else {
                h1 * out_w * ma_c
            };
            (h0, h1, size0, size1)
        };

        let mut y_step1 = dw.dst_h;
        while y_step1 > 1 {
            let (_, _, size0, size1) = buffers(y_step1);
            if size0 + size1 <= l2 {
                break;
            }
            y_step1 -= 1;
        }
        let (h0, h1, size0, size1) = buffers(y_step1);

        let last = param.last();
        let size2 = if kind != MergConvKind::Cd && ma_c < channels {
            last.dst_h * last.dst_w * last.dst_c
        } else {
            0
        };

        AlgParam {
            mi_c,
            ma_c,
            y_step: [input_rows(y_step1), y_step1],
            buf_h: [h0, h1],
            buf_size: [size0, size1, size2],
        }
    }
}
