use crate::gemm::{self, GemmKernels};
use crate::transform::{self, Tiling, Transform2d, TransformKernels, WinogradVariant};
use dyn_stack::{DynStack, GlobalMemBuffer, SizeOverflow, StackReq};
use simdlib_common::{check_len, for_each, ConvParam, Error, Isa, Parallelism, Ptr, Result, ISA};

const ALIGN: usize = 64;

/// Largest number of lhs rows one merged product may have.
const MERGE_ROWS: usize = 128;

/// `f32` convolution of channel-last images computed with Winograd
/// transforms and one matrix product per transformed tile element.
pub struct WinogradConvolution {
    param: ConvParam,
    batch: usize,
    variant: WinogradVariant,
    isa: Isa,
    transform: Transform2d,
    kernels: TransformKernels,
    gemm: GemmKernels,
    /// Images sharing one matrix product.
    merge: usize,
    tiles: usize,
    weight: Vec<f32>,
    bias: Vec<f32>,
}

impl core::fmt::Debug for WinogradConvolution {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WinogradConvolution")
            .field("param", &self.param)
            .field("batch", &self.batch)
            .field("variant", &self.variant)
            .field("isa", &self.isa)
            .field("merge", &self.merge)
            .finish()
    }
}

/// The variant used for a kernel shape, preferring larger blocks when the
/// images are big enough to fill them.
pub fn select_variant(batch: usize, param: &ConvParam) -> Result<WinogradVariant> {
    use WinogradVariant::*;
    let p = param;
    let area = p.src_h * p.src_w * batch;
    let variant = match (p.kernel_y, p.kernel_x) {
        (1, 3) => Kernel1x3Block1x4,
        (1, 5) => Kernel1x5Block1x4,
        (2, 2) if p.src_h >= 8 && p.src_w >= 8 && area >= 144 => Kernel2x2Block4x4,
        (2, 2) => Kernel2x2Block2x2,
        (3, 3) if p.src_h >= 8 && p.src_w >= 8 && area >= 144 => Kernel3x3Block4x4,
        (3, 3)
            if p.src_h >= 6
                && p.src_w >= 6
                && area >= 81
                && p.dst_h % 3 == 0
                && p.dst_w % 3 == 0 =>
        {
            Kernel3x3Block3x3
        }
        (3, 3) => Kernel3x3Block2x2,
        (kernel_y, kernel_x) => return Err(Error::UnsupportedVariant { kernel_y, kernel_x }),
    };
    Ok(variant)
}

impl WinogradConvolution {
    pub fn new(batch: usize, param: ConvParam) -> Result<Self> {
        Self::new_with(*ISA, batch, param)
    }

    pub fn new_with(isa: Isa, batch: usize, param: ConvParam) -> Result<Self> {
        let isa = isa.check_available()?;
        let variant = Self::check(batch, &param).map_err(|err| {
            tracing::warn!(%err, "rejected winograd convolution parameters");
            err
        })?;
        Ok(Self::with_variant(isa, batch, param, variant))
    }

    fn check(batch: usize, param: &ConvParam) -> Result<WinogradVariant> {
        param.validate()?;
        if batch == 0 {
            return Err(Error::InvalidParam("batch must be positive"));
        }
        if param.group != 1 || !param.is_stride(1) || !param.is_dilation(1) {
            return Err(Error::InvalidParam(
                "winograd convolution needs one group, unit stride and unit dilation",
            ));
        }
        let variant = select_variant(batch, param)?;
        variant.check_pad([param.pad_y, param.pad_x, param.pad_h, param.pad_w])?;
        Ok(variant)
    }

    fn with_variant(isa: Isa, batch: usize, param: ConvParam, variant: WinogradVariant) -> Self {
        let tiles = variant.tiles(param.dst_h, param.dst_w);
        let merge = (1..=batch)
            .filter(|merge| batch % merge == 0 && tiles * merge <= MERGE_ROWS)
            .max()
            .unwrap_or(1);
        tracing::debug!(?variant, %isa, merge, "winograd convolution");
        Self {
            param,
            batch,
            variant,
            isa,
            transform: variant.transform(),
            kernels: transform::kernels(isa),
            gemm: gemm::kernels(isa),
            merge,
            tiles,
            weight: Vec::new(),
            bias: Vec::new(),
        }
    }

    #[inline]
    pub fn param(&self) -> &ConvParam {
        &self.param
    }

    #[inline]
    pub fn variant(&self) -> WinogradVariant {
        self.variant
    }

    #[inline]
    pub fn isa(&self) -> Isa {
        self.isa
    }

    /// Sets HWIO weights and an optional per output channel bias.
    pub fn set_params(&mut self, weight: &[f32], bias: Option<&[f32]>) -> Result<()> {
        let p = &self.param;
        let size = p.src_c * p.dst_c;
        let mut transformed = vec![0.0; size * self.variant.tile_count()];
        check_len("weight", weight, p.weight_size())?;
        unsafe {
            (self.kernels.filter)(
                &self.transform,
                weight.as_ptr(),
                size,
                1,
                size,
                transformed.as_mut_ptr(),
            )
        };
        self.bias = match bias {
            Some(bias) => {
                check_len("bias", bias, p.dst_c)?;
                bias[..p.dst_c].to_vec()
            }
            None => vec![0.0; p.dst_c],
        };
        self.weight = transformed;
        Ok(())
    }

    fn strides(&self) -> (usize, usize) {
        let p = &self.param;
        (p.src_c * self.tiles, p.dst_c * self.tiles)
    }

    fn n_jobs(&self, parallelism: Parallelism) -> usize {
        parallelism.n_threads().clamp(1, self.variant.tile_count())
    }

    fn gemm_shape(&self) -> (usize, usize, usize) {
        let p = &self.param;
        (self.tiles * self.merge, p.dst_c, p.src_c)
    }

    /// Scratch memory needed by [`forward`](Self::forward).
    pub fn forward_req(&self, parallelism: Parallelism) -> Result<StackReq, SizeOverflow> {
        let count = self.variant.tile_count();
        let (stride_s, stride_d) = self.strides();
        let (m, n, k) = self.gemm_shape();
        let packed = self.gemm.packed_len(m, n, k);
        StackReq::try_new_aligned::<f32>(count * stride_s * self.merge, ALIGN)?
            .try_and(StackReq::try_new_aligned::<f32>(count * stride_d * self.merge, ALIGN)?)?
            .try_and(StackReq::try_new_aligned::<f32>(self.n_jobs(parallelism) * packed, ALIGN)?)
    }

    /// Convolves `batch` channel-last images.
    ///
    /// # Panics
    ///
    /// Panics if `stack` cannot hold [`forward_req`](Self::forward_req).
    pub fn forward(&self, src: &[f32], stack: DynStack<'_>, dst: &mut [f32], parallelism: Parallelism) -> Result<()> {
        if self.weight.is_empty() {
            return Err(Error::ParamsNotSet);
        }
        let p = &self.param;
        let (size_s, size_d) = (p.src_size(), p.dst_size());
        check_len("src", src, self.batch * size_s)?;
        check_len("dst", dst, self.batch * size_d)?;

        let count = self.variant.tile_count();
        let merge = self.merge;
        let (stride_s, stride_d) = self.strides();
        let (m, n, k) = self.gemm_shape();
        let packed_len = self.gemm.packed_len(m, n, k);
        let n_jobs = self.n_jobs(parallelism);

        let (mut buf_s, stack) = stack.make_aligned_uninit::<f32>(count * stride_s * merge, ALIGN);
        let (mut buf_d, stack) = stack.make_aligned_uninit::<f32>(count * stride_d * merge, ALIGN);
        let (mut packed, _) = stack.make_aligned_uninit::<f32>(n_jobs * packed_len, ALIGN);
        let buf_s = Ptr(buf_s.as_mut_ptr() as *mut f32);
        let buf_d = Ptr(buf_d.as_mut_ptr() as *mut f32);
        let packed = Ptr(packed.as_mut_ptr() as *mut f32);

        let input = Tiling::new(
            self.variant,
            p.src_c,
            p.src_h,
            p.src_w,
            (p.pad_y, p.pad_x),
            (p.dst_h, p.dst_w),
            stride_s * merge,
            true,
        );
        let output = Tiling::new(
            self.variant,
            p.dst_c,
            p.dst_h,
            p.dst_w,
            (0, 0),
            (p.dst_h, p.dst_w),
            stride_d * merge,
            true,
        );
        let weight = Ptr(self.weight.as_ptr() as *mut f32);
        let size_w = p.src_c * p.dst_c;

        for b in (0..self.batch).step_by(merge) {
            for i in 0..merge {
                unsafe {
                    self.kernels.run_input(
                        &self.transform,
                        &input,
                        src.as_ptr().add((b + i) * size_s),
                        buf_s.0.add(i * stride_s),
                    )
                };
            }

            for_each(parallelism, n_jobs, |job| {
                // whole wrappers, not their raw pointer fields
                let (buf_s, buf_d, weight) = (buf_s, buf_d, weight);
                let begin = job * count / n_jobs;
                let end = (job + 1) * count / n_jobs;
                let packed = packed.wrapping_add(job * packed_len);
                for t in begin..end {
                    unsafe {
                        self.gemm.run(
                            m,
                            n,
                            k,
                            buf_d.0.add(t * stride_d * merge),
                            n,
                            buf_s.0.add(t * stride_s * merge),
                            k,
                            weight.0.add(t * size_w),
                            n,
                            packed.0,
                        )
                    };
                }
            });

            for i in 0..merge {
                let dst = &mut dst[(b + i) * size_d..(b + i + 1) * size_d];
                unsafe {
                    self.kernels.run_output(
                        &self.transform,
                        &output,
                        buf_d.0.add(i * stride_d),
                        dst.as_mut_ptr(),
                    )
                };
                for pixel in dst.chunks_exact_mut(p.dst_c) {
                    for (value, bias) in pixel.iter_mut().zip(&self.bias) {
                        *value = p.activation.apply(*value + bias);
                    }
                }
            }
        }
        Ok(())
    }

    /// [`forward`](Self::forward) with scratch memory allocated for the call.
    pub fn forward_internal(&self, src: &[f32], dst: &mut [f32], parallelism: Parallelism) -> Result<()> {
        let mut mem = GlobalMemBuffer::new(self.forward_req(parallelism)?);
        self.forward(src, DynStack::new(&mut mem), dst, parallelism)
    }
}
