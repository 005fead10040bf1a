//! Quantized merged convolution.
//!
//! Runs a pointwise (1x1) convolution, a depthwise convolution and a second
//! pointwise convolution as one pass over `u8` NHWC images with `i8` HWIO
//! weights, keeping the intermediate tensors in small circular row buffers
//! instead of materializing them. Either pointwise stage may be absent
//! ([`MergConvKind`]).

mod alg;
mod kernels;

pub use alg::AlgParam;

use crate::linear::{self, AddParams, LinearKernels};
use dyn_stack::{DynStack, GlobalMemBuffer, SizeOverflow, StackReq};
use kernels::{Depthwise, MergedKernels, Pointwise, Term};
use simdlib_common::{check_len, Activation, Error, Isa, MergConvKind, MergConvParam, Result, ISA};

const ALIGN: usize = 64;

/// Quantized weights and requantization constants of one convolution.
struct Stage {
    weight: Vec<i8>,
    /// Bias with the input zero point folded in.
    bias: Vec<i32>,
    norm: Vec<f32>,
    src_zero: i32,
    zero: i32,
    lo: f32,
    hi: f32,
}

impl Stage {
    fn term(&self, channel: usize) -> Term {
        Term {
            bias: self.bias.as_ptr().wrapping_add(channel),
            norm: self.norm.as_ptr().wrapping_add(channel),
            zero: self.zero,
            lo: self.lo,
            hi: self.hi,
        }
    }
}

/// Bounds of the quantized output for `activation`, relative to `zero`.
fn quantized_range(activation: Activation, scale: f32, zero: i32) -> (f32, f32) {
    let quantize = |value: f32| ((value / scale).round_ties_even() as i32).saturating_add(zero);
    let (lo, hi) = match activation {
        Activation::Identity => (0, 255),
        Activation::Relu => (zero, 255),
        Activation::RestrictRange { lower, upper } => (quantize(lower), quantize(upper)),
    };
    let (lo, hi) = (lo.clamp(0, 255), hi.clamp(0, 255));
    ((lo - zero) as f32, (hi - zero) as f32)
}

pub struct SynetQuantizedMergedConvolution {
    param: MergConvParam,
    alg: AlgParam,
    isa: Isa,
    kernels: MergedKernels,
    depthwise: unsafe fn(&Depthwise, usize, *mut u8),
    linear: LinearKernels,
    stages: Vec<Stage>,
    add: Option<AddParams>,
}

impl core::fmt::Debug for SynetQuantizedMergedConvolution {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SynetQuantizedMergedConvolution")
            .field("param", &self.param)
            .field("alg", &self.alg)
            .field("isa", &self.isa)
            .field("params_set", &!self.stages.is_empty())
            .finish()
    }
}

impl SynetQuantizedMergedConvolution {
    /// Validates `param` and plans the convolution for the detected
    /// instruction set.
    pub fn init(param: MergConvParam) -> Result<Self> {
        Self::init_with(*ISA, param)
    }

    pub fn init_with(isa: Isa, param: MergConvParam) -> Result<Self> {
        let isa = isa.check_available()?;
        let param = Self::validate(param).map_err(|err| {
            tracing::warn!(%err, "rejected merged convolution parameters");
            err
        })?;
        let alg = AlgParam::new(&param, isa);
        Ok(Self::with_alg(isa, param, alg))
    }

    fn validate(param: MergConvParam) -> Result<MergConvParam> {
        if !(2..=3).contains(&param.count) {
            return Err(Error::InvalidParam("merged convolution needs 2 or 3 stages"));
        }
        MergConvParam::new(param.batch, param.convs(), param.add)
    }

    fn with_alg(isa: Isa, param: MergConvParam, alg: AlgParam) -> Self {
        let kernels = kernels::kernels(isa);
        let depthwise = if param.depthwise().is_kernel(3) {
            kernels.depthwise_3x3
        } else {
            kernels.depthwise
        };
        tracing::debug!(kind = ?param.kind(), %isa, "merged convolution");
        tracing::trace!(?alg, "merged convolution blocking");
        Self {
            param,
            alg,
            isa,
            kernels,
            depthwise,
            linear: linear::kernels(isa),
            stages: Vec::new(),
            add: None,
        }
    }

    #[inline]
    pub fn param(&self) -> &MergConvParam {
        &self.param
    }

    #[inline]
    pub fn alg(&self) -> &AlgParam {
        &self.alg
    }

    #[inline]
    pub fn isa(&self) -> Isa {
        self.isa
    }

    /// Sets weights and quantization parameters.
    ///
    /// `io_scale`/`io_zero` describe the input, every intermediate tensor and
    /// the output, plus the result of the residual add when the convolution
    /// has one. Per stage, `weight` is HWIO, `weight_scale` and `bias` have
    /// one entry per output channel.
    pub fn set_params(
        &mut self,
        io_scale: &[f32],
        io_zero: &[i32],
        weight: &[&[i8]],
        weight_scale: &[&[f32]],
        bias: &[&[i32]],
    ) -> Result<()> {
        let count = self.param.count;
        let io_count = count + 1 + self.param.add as usize;
        if io_scale.len() != io_count || io_zero.len() != io_count {
            return Err(Error::InvalidParam("one scale and zero point per tensor expected"));
        }
        if io_scale.iter().any(|scale| !(scale.is_finite() && *scale > 0.0)) {
            return Err(Error::InvalidParam("scales must be finite and positive"));
        }
        if io_zero.iter().any(|zero| !(0..=255).contains(zero)) {
            return Err(Error::InvalidParam("zero points must be within 0..=255"));
        }
        if weight.len() != count || weight_scale.len() != count || bias.len() != count {
            return Err(Error::InvalidParam("one weight, weight scale and bias per stage expected"));
        }

        let mut stages = Vec::with_capacity(count);
        for (i, conv) in self.param.convs().iter().enumerate() {
            let dst_c = conv.dst_c;
            check_len("weight", weight[i], conv.weight_size())?;
            check_len("weight_scale", weight_scale[i], dst_c)?;
            check_len("bias", bias[i], dst_c)?;

            let weight = weight[i][..conv.weight_size()].to_vec();
            let mut weight_sum = vec![0i32; dst_c];
            for row in weight.chunks_exact(dst_c) {
                for (sum, &w) in weight_sum.iter_mut().zip(row) {
                    *sum += w as i32;
                }
            }

            let (src_scale, dst_scale) = (io_scale[i], io_scale[i + 1]);
            let (src_zero, zero) = (io_zero[i], io_zero[i + 1]);
            let norm = weight_scale[i][..dst_c]
                .iter()
                .map(|w_scale| src_scale * w_scale / dst_scale)
                .collect();
            let bias = bias[i][..dst_c]
                .iter()
                .zip(&weight_sum)
                .map(|(bias, sum)| bias - src_zero * sum)
                .collect();
            let (lo, hi) = quantized_range(conv.activation, dst_scale, zero);

            stages.push(Stage {
                weight,
                bias,
                norm,
                src_zero,
                zero,
                lo,
                hi,
            });
        }

        self.add = self.param.add.then(|| AddParams {
            a_bias: -io_zero[0],
            a_norm: io_scale[0],
            b_bias: -io_zero[count],
            b_norm: io_scale[count],
            d_norm: 1.0 / io_scale[count + 1],
            d_zero: io_zero[count + 1],
        });
        self.stages = stages;
        Ok(())
    }

    /// Scratch memory needed by [`forward`](Self::forward).
    pub fn forward_req(&self) -> Result<StackReq, SizeOverflow> {
        let [size0, size1, size2] = self.alg.buf_size;
        StackReq::try_new_aligned::<u8>(size0, ALIGN)?
            .try_and(StackReq::try_new_aligned::<u8>(size1, ALIGN)?)?
            .try_and(StackReq::try_new_aligned::<i32>(size2, ALIGN)?)
    }

    /// Bytes of scratch memory, without alignment padding.
    pub fn internal_buffer_size(&self) -> usize {
        let [size0, size1, size2] = self.alg.buf_size;
        size0 + size1 + size2 * core::mem::size_of::<i32>()
    }

    /// Runs the convolution over `batch` images of `src` into `dst`, taking
    /// scratch memory from `stack`.
    ///
    /// # Panics
    ///
    /// Panics if `stack` cannot hold [`forward_req`](Self::forward_req).
    pub fn forward(&self, src: &[u8], stack: DynStack<'_>, dst: &mut [u8]) -> Result<()> {
        if self.stages.is_empty() {
            return Err(Error::ParamsNotSet);
        }
        let batch = self.param.batch;
        let src_size = self.param.first().src_size();
        let dst_size = self.param.last().dst_size();
        check_len("src", src, batch * src_size)?;
        check_len("dst", dst, batch * dst_size)?;

        let [size0, size1, size2] = self.alg.buf_size;
        let (mut buf0, stack) = stack.make_aligned_uninit::<u8>(size0, ALIGN);
        let (mut buf1, stack) = stack.make_aligned_uninit::<u8>(size1, ALIGN);
        let (mut buf2, _) = stack.make_aligned_uninit::<i32>(size2, ALIGN);
        let buf0 = buf0.as_mut_ptr() as *mut u8;
        let buf1 = buf1.as_mut_ptr() as *mut u8;
        let buf2 = buf2.as_mut_ptr() as *mut i32;

        for b in 0..batch {
            unsafe {
                self.forward_image(
                    src.as_ptr().add(b * src_size),
                    buf0,
                    buf1,
                    buf2,
                    dst.as_mut_ptr().add(b * dst_size),
                )
            };
        }
        Ok(())
    }

    /// [`forward`](Self::forward) with scratch memory allocated for the call.
    pub fn forward_internal(&self, src: &[u8], dst: &mut [u8]) -> Result<()> {
        let mut mem = GlobalMemBuffer::new(self.forward_req()?);
        self.forward(src, DynStack::new(&mut mem), dst)
    }

    unsafe fn forward_image(
        &self,
        src: *const u8,
        buf0: *mut u8,
        buf1: *mut u8,
        sum: *mut i32,
        dst: *mut u8,
    ) {
        let kind = self.param.kind();
        let a = &self.alg;
        let dw_index = self.param.depthwise_index();
        let dw = &self.param.conv[dw_index];
        let dw_stage = &self.stages[dw_index];
        let channels = dw.src_c;

        let padded_h = dw.pad_y + dw.src_h + dw.pad_h;
        let row_stride0 = (dw.pad_x + dw.src_w + dw.pad_w) * a.ma_c;
        let row_stride1 = dw.dst_w * a.ma_c;
        let (mask0, mask1) = (a.buf_h[0] - 1, a.buf_h[1] - 1);
        let pad = dw_stage.src_zero as u8;

        let out = self.param.last();
        let out_stage = &self.stages[self.param.count - 1];
        let out_row = dw.dst_w * out.dst_c;

        let mut c = 0;
        while c < channels {
            let mac = a.ma_c.min(channels - c);
            let (first_block, last_block) = (c == 0, c + mac == channels);

            let input = Pointwise {
                src_stride: self.param.conv[0].src_c,
                src_c: self.param.conv[0].src_c,
                weight: self.stages[0].weight.as_ptr().wrapping_add(c),
                weight_stride: channels,
                dst_c: mac,
                dst_stride: a.ma_c,
                term: self.stages[0].term(c),
            };
            let depthwise = Depthwise {
                src: buf0,
                row_stride: row_stride0,
                row_mask: mask0,
                pixel_stride: a.ma_c,
                channels: mac,
                kernel_y: dw.kernel_y,
                kernel_x: dw.kernel_x,
                stride_y: dw.stride_y,
                stride_x: dw.stride_x,
                dst_w: dw.dst_w,
                weight: dw_stage.weight.as_ptr().add(c),
                weight_stride: channels,
                dst_stride: if kind == MergConvKind::Cd {
                    channels
                } else {
                    a.ma_c
                },
                term: dw_stage.term(c),
            };
            let output = Pointwise {
                src_stride: a.ma_c,
                src_c: mac,
                weight: out_stage.weight.as_ptr().wrapping_add(c * out.dst_c),
                weight_stride: out.dst_c,
                dst_c: out.dst_c,
                dst_stride: out.dst_c,
                term: out_stage.term(0),
            };

            let mut by_done = 0;
            let mut dy_beg = 0;
            while dy_beg < dw.dst_h {
                let dy_end = (dy_beg + a.y_step[1]).min(dw.dst_h);
                let by_end = (dy_beg * dw.stride_y + a.y_step[0]).min(padded_h);

                for by in by_done..by_end {
                    let row = buf0.add((by & mask0) * row_stride0);
                    if by < dw.pad_y || by >= dw.pad_y + dw.src_h {
                        row.write_bytes(pad, row_stride0);
                        continue;
                    }
                    row.write_bytes(pad, dw.pad_x * a.ma_c);
                    row.add((dw.pad_x + dw.src_w) * a.ma_c)
                        .write_bytes(pad, dw.pad_w * a.ma_c);

                    let y = by - dw.pad_y;
                    let body = row.add(dw.pad_x * a.ma_c);
                    if kind == MergConvKind::Dc {
                        let src_row = src.add(y * dw.src_w * channels + c);
                        for x in 0..dw.src_w {
                            core::ptr::copy_nonoverlapping(
                                src_row.add(x * channels),
                                body.add(x * a.ma_c),
                                mac,
                            );
                        }
                    } else {
                        let src_row = src.add(y * dw.src_w * input.src_c);
                        (self.kernels.input)(&input, src_row, dw.src_w, body);
                    }
                }
                by_done = by_end;

                for dy in dy_beg..dy_end {
                    let dst_row = if kind == MergConvKind::Cd {
                        dst.add(dy * dw.dst_w * channels + c)
                    } else {
                        buf1.add((dy & mask1) * row_stride1)
                    };
                    (self.depthwise)(&depthwise, dy, dst_row);
                }

                if kind != MergConvKind::Cd {
                    for dy in dy_beg..dy_end {
                        (self.kernels.output)(
                            &output,
                            buf1.add((dy & mask1) * row_stride1),
                            dw.dst_w,
                            !first_block,
                            last_block,
                            sum.wrapping_add(dy * out_row),
                            dst.add(dy * out_row),
                        );
                    }
                }

                if let (true, Some(add)) = (last_block, &self.add) {
                    let begin = dy_beg * out_row;
                    let len = (dy_end - dy_beg) * out_row;
                    (self.linear.add)(src.add(begin), dst.add(begin), len, add, dst.add(begin));
                }

                dy_beg = dy_end;
            }
            c += mac;
        }
    }
}
