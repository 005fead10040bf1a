//! Winograd filter, input and output transforms.
//!
//! A variant `F(m x n, r x s)` computes an `m x n` output block of an
//! `r x s` correlation from a `(m+r-1) x (n+s-1)` input tile with one
//! elementwise product per tile element. The two-dimensional transforms are
//! tensor products of one-dimensional ones; `1xK` variants use the identity
//! on the row axis.
//!
//! Transformed data is laid out as `tile_count()` matrices, `stride` elements
//! apart. With `trans` (channel-last images, HWIO filters) each matrix is
//! `[tiles][channels]`, otherwise `[channels][tiles]`.

use simdlib_common::cache::DivCeil;
use simdlib_common::simd::Simd;
use simdlib_common::{check_len, Error, Isa, Result, ISA};

pub(crate) const MAX_TILE: usize = 64;
pub(crate) const MAX_KERNEL: usize = 25;

/// A constant row-major matrix.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Matrix {
    pub data: &'static [f32],
    pub rows: usize,
    pub cols: usize,
}

/// `F(block, kernel)`: `bt` maps an input tile, `g` a filter and `at` the
/// elementwise product back to an output block.
#[derive(Debug)]
pub(crate) struct Transform1d {
    pub kernel: usize,
    pub block: usize,
    pub tile: usize,
    pub bt: Matrix,
    pub g: Matrix,
    pub at: Matrix,
}

macro_rules! transform_1d {
    (kernel: $kernel: expr, block: $block: expr, bt: $bt: expr, g: $g: expr, at: $at: expr $(,)?) => {
        Transform1d {
            kernel: $kernel,
            block: $block,
            tile: $block + $kernel - 1,
            bt: Matrix {
                data: &$bt,
                rows: $block + $kernel - 1,
                cols: $block + $kernel - 1,
            },
            g: Matrix {
                data: &$g,
                rows: $block + $kernel - 1,
                cols: $kernel,
            },
            at: Matrix {
                data: &$at,
                rows: $block,
                cols: $block + $kernel - 1,
            },
        }
    };
}

static IDENTITY: Transform1d = transform_1d! {
    kernel: 1,
    block: 1,
    bt: [1.0],
    g: [1.0],
    at: [1.0],
};

#[rustfmt::skip]
static F2_2: Transform1d = transform_1d! {
    kernel: 2,
    block: 2,
    bt: [
        1.0, -1.0, 0.0,
        0.0, 1.0, 0.0,
        0.0, -1.0, 1.0,
    ],
    g: [
        1.0, 0.0,
        1.0, 1.0,
        0.0, 1.0,
    ],
    at: [
        1.0, 1.0, 0.0,
        0.0, 1.0, 1.0,
    ],
};

#[rustfmt::skip]
const BT_5: [f32; 25] = [
    2.0, -1.0, -2.0, 1.0, 0.0,
    0.0, -2.0, -1.0, 1.0, 0.0,
    0.0, 2.0, -3.0, 1.0, 0.0,
    0.0, -1.0, 0.0, 1.0, 0.0,
    0.0, 2.0, -1.0, -2.0, 1.0,
];

#[rustfmt::skip]
static F4_2: Transform1d = transform_1d! {
    kernel: 2,
    block: 4,
    bt: BT_5,
    g: [
        1.0 / 2.0, 0.0,
        -1.0 / 2.0, -1.0 / 2.0,
        -1.0 / 6.0, 1.0 / 6.0,
        1.0 / 6.0, 1.0 / 3.0,
        0.0, 1.0,
    ],
    at: [
        1.0, 1.0, 1.0, 1.0, 0.0,
        0.0, 1.0, -1.0, 2.0, 0.0,
        0.0, 1.0, 1.0, 4.0, 0.0,
        0.0, 1.0, -1.0, 8.0, 1.0,
    ],
};

#[rustfmt::skip]
static F2_3: Transform1d = transform_1d! {
    kernel: 3,
    block: 2,
    bt: [
        1.0, 0.0, -1.0, 0.0,
        0.0, 1.0, 1.0, 0.0,
        0.0, -1.0, 1.0, 0.0,
        0.0, 1.0, 0.0, -1.0,
    ],
    g: [
        1.0, 0.0, 0.0,
        1.0 / 2.0, 1.0 / 2.0, 1.0 / 2.0,
        1.0 / 2.0, -1.0 / 2.0, 1.0 / 2.0,
        0.0, 0.0, 1.0,
    ],
    at: [
        1.0, 1.0, 1.0, 0.0,
        0.0, 1.0, -1.0, -1.0,
    ],
};

#[rustfmt::skip]
static F3_3: Transform1d = transform_1d! {
    kernel: 3,
    block: 3,
    bt: BT_5,
    g: [
        1.0 / 2.0, 0.0, 0.0,
        -1.0 / 2.0, -1.0 / 2.0, -1.0 / 2.0,
        -1.0 / 6.0, 1.0 / 6.0, -1.0 / 6.0,
        1.0 / 6.0, 1.0 / 3.0, 2.0 / 3.0,
        0.0, 0.0, 1.0,
    ],
    at: [
        1.0, 1.0, 1.0, 1.0, 0.0,
        0.0, 1.0, -1.0, 2.0, 0.0,
        0.0, 1.0, 1.0, 4.0, 1.0,
    ],
};

#[rustfmt::skip]
static F4_3: Transform1d = transform_1d! {
    kernel: 3,
    block: 4,
    bt: [
        4.0, 0.0, -5.0, 0.0, 1.0, 0.0,
        0.0, -4.0, -4.0, 1.0, 1.0, 0.0,
        0.0, 4.0, -4.0, -1.0, 1.0, 0.0,
        0.0, -2.0, -1.0, 2.0, 1.0, 0.0,
        0.0, 2.0, -1.0, -2.0, 1.0, 0.0,
        0.0, 4.0, 0.0, -5.0, 0.0, 1.0,
    ],
    g: [
        1.0 / 4.0, 0.0, 0.0,
        -1.0 / 6.0, -1.0 / 6.0, -1.0 / 6.0,
        -1.0 / 6.0, 1.0 / 6.0, -1.0 / 6.0,
        1.0 / 24.0, 1.0 / 12.0, 1.0 / 6.0,
        1.0 / 24.0, -1.0 / 12.0, 1.0 / 6.0,
        0.0, 0.0, 1.0,
    ],
    at: [
        1.0, 1.0, 1.0, 1.0, 1.0, 0.0,
        0.0, 1.0, -1.0, 2.0, -2.0, 0.0,
        0.0, 1.0, 1.0, 4.0, 4.0, 0.0,
        0.0, 1.0, -1.0, 8.0, -8.0, 1.0,
    ],
};

#[rustfmt::skip]
static F4_5: Transform1d = transform_1d! {
    kernel: 5,
    block: 4,
    bt: [
        36.0, 0.0, -49.0, 0.0, 14.0, 0.0, -1.0, 0.0,
        0.0, 36.0, 36.0, -13.0, -13.0, 1.0, 1.0, 0.0,
        0.0, -36.0, 36.0, 13.0, -13.0, -1.0, 1.0, 0.0,
        0.0, 18.0, 9.0, -20.0, -10.0, 2.0, 1.0, 0.0,
        0.0, -18.0, 9.0, 20.0, -10.0, -2.0, 1.0, 0.0,
        0.0, 12.0, 4.0, -15.0, -5.0, 3.0, 1.0, 0.0,
        0.0, -12.0, 4.0, 15.0, -5.0, -3.0, 1.0, 0.0,
        0.0, -36.0, 0.0, 49.0, 0.0, -14.0, 0.0, 1.0,
    ],
    g: [
        1.0 / 36.0, 0.0, 0.0, 0.0, 0.0,
        1.0 / 48.0, 1.0 / 48.0, 1.0 / 48.0, 1.0 / 48.0, 1.0 / 48.0,
        1.0 / 48.0, -1.0 / 48.0, 1.0 / 48.0, -1.0 / 48.0, 1.0 / 48.0,
        -1.0 / 120.0, -1.0 / 60.0, -1.0 / 30.0, -1.0 / 15.0, -2.0 / 15.0,
        -1.0 / 120.0, 1.0 / 60.0, -1.0 / 30.0, 1.0 / 15.0, -2.0 / 15.0,
        1.0 / 720.0, 1.0 / 240.0, 1.0 / 80.0, 3.0 / 80.0, 9.0 / 80.0,
        1.0 / 720.0, -1.0 / 240.0, 1.0 / 80.0, -3.0 / 80.0, 9.0 / 80.0,
        0.0, 0.0, 0.0, 0.0, 1.0,
    ],
    at: [
        1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0,
        0.0, 1.0, -1.0, 2.0, -2.0, 3.0, -3.0, 0.0,
        0.0, 1.0, 1.0, 4.0, 4.0, 9.0, 9.0, 0.0,
        0.0, 1.0, -1.0, 8.0, -8.0, 27.0, -27.0, 1.0,
    ],
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WinogradVariant {
    Kernel1x3Block1x4,
    Kernel1x5Block1x4,
    Kernel2x2Block2x2,
    Kernel2x2Block4x4,
    Kernel3x3Block2x2,
    Kernel3x3Block3x3,
    Kernel3x3Block4x4,
}

/// Row and column transforms of a variant.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Transform2d {
    pub y: &'static Transform1d,
    pub x: &'static Transform1d,
}

impl Transform2d {
    #[inline]
    pub fn tile_count(&self) -> usize {
        self.y.tile * self.x.tile
    }
}

impl WinogradVariant {
    pub const ALL: [WinogradVariant; 7] = [
        WinogradVariant::Kernel1x3Block1x4,
        WinogradVariant::Kernel1x5Block1x4,
        WinogradVariant::Kernel2x2Block2x2,
        WinogradVariant::Kernel2x2Block4x4,
        WinogradVariant::Kernel3x3Block2x2,
        WinogradVariant::Kernel3x3Block3x3,
        WinogradVariant::Kernel3x3Block4x4,
    ];

    pub(crate) fn transform(self) -> Transform2d {
        use WinogradVariant::*;
        let (y, x) = match self {
            Kernel1x3Block1x4 => (&IDENTITY, &F4_3),
            Kernel1x5Block1x4 => (&IDENTITY, &F4_5),
            Kernel2x2Block2x2 => (&F2_2, &F2_2),
            Kernel2x2Block4x4 => (&F4_2, &F4_2),
            Kernel3x3Block2x2 => (&F2_3, &F2_3),
            Kernel3x3Block3x3 => (&F3_3, &F3_3),
            Kernel3x3Block4x4 => (&F4_3, &F4_3),
        };
        Transform2d { y, x }
    }

    /// `(kernel_y, kernel_x)`
    #[inline]
    pub fn kernel(self) -> (usize, usize) {
        let t = self.transform();
        (t.y.kernel, t.x.kernel)
    }

    /// Output block `(rows, cols)` computed per tile.
    #[inline]
    pub fn block(self) -> (usize, usize) {
        let t = self.transform();
        (t.y.block, t.x.block)
    }

    #[inline]
    pub fn tile(self) -> (usize, usize) {
        let t = self.transform();
        (t.y.tile, t.x.tile)
    }

    /// Number of transformed matrices.
    #[inline]
    pub fn tile_count(self) -> usize {
        self.transform().tile_count()
    }

    /// Number of tiles covering a `dst_h x dst_w` output.
    #[inline]
    pub fn tiles(self, dst_h: usize, dst_w: usize) -> usize {
        let (block_y, block_x) = self.block();
        dst_h.msrv_div_ceil(block_y) * dst_w.msrv_div_ceil(block_x)
    }

    /// Output size of the input transform: `src + pads - (kernel - 1)`.
    pub fn dst_size(self, src_h: usize, src_w: usize, pad: [usize; 4]) -> Option<(usize, usize)> {
        let (kernel_y, kernel_x) = self.kernel();
        let [pad_y, pad_x, pad_h, pad_w] = pad;
        let dst_h = (src_h + pad_y + pad_h).checked_sub(kernel_y - 1)?;
        let dst_w = (src_w + pad_x + pad_w).checked_sub(kernel_x - 1)?;
        (dst_h > 0 && dst_w > 0).then_some((dst_h, dst_w))
    }

    /// Checks the padding `[pad_y, pad_x, pad_h, pad_w]` this variant supports.
    pub fn check_pad(self, pad: [usize; 4]) -> Result<()> {
        use WinogradVariant::*;
        let [pad_y, pad_x, pad_h, pad_w] = pad;
        let ok = match self {
            Kernel1x3Block1x4 | Kernel1x5Block1x4 => {
                let (_, kernel) = self.kernel();
                pad_y == 0 && pad_h == 0 && pad_x == pad_w && pad_x <= kernel / 2
            }
            Kernel2x2Block2x2 | Kernel2x2Block4x4 => {
                pad_y == pad_x && pad_h == pad_w && pad_y + pad_h <= 1
            }
            Kernel3x3Block2x2 | Kernel3x3Block3x3 | Kernel3x3Block4x4 => {
                pad.iter().all(|&pad| pad <= 1)
            }
        };
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidParam("padding not supported by this winograd variant"))
        }
    }
}

/// Geometry of an image and of its transformed tiles.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Tiling {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub pad_y: usize,
    pub pad_x: usize,
    pub tiles_y: usize,
    pub tiles_x: usize,
    /// Image element strides of a row, a column and a channel.
    pub image: [usize; 3],
    pub tile_stride: usize,
    pub channel_stride: usize,
    pub matrix_stride: usize,
}

impl Tiling {
    /// Tiling of a channel-last (`trans`) or channel-first image.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        variant: WinogradVariant,
        channels: usize,
        height: usize,
        width: usize,
        pad: (usize, usize),
        dst_size: (usize, usize),
        matrix_stride: usize,
        trans: bool,
    ) -> Self {
        let (block_y, block_x) = variant.block();
        let tiles_y = dst_size.0.msrv_div_ceil(block_y);
        let tiles_x = dst_size.1.msrv_div_ceil(block_x);
        let tiles = tiles_y * tiles_x;
        let (image, tile_stride, channel_stride) = if trans {
            ([width * channels, channels, 1], channels, 1)
        } else {
            ([width, 1, height * width], 1, tiles)
        };
        Tiling {
            channels,
            height,
            width,
            pad_y: pad.0,
            pad_x: pad.1,
            tiles_y,
            tiles_x,
            image,
            tile_stride,
            channel_stride,
            matrix_stride,
        }
    }

    #[inline]
    pub fn tiles(&self) -> usize {
        self.tiles_y * self.tiles_x
    }

    #[inline]
    fn is_contiguous(&self) -> bool {
        self.image[2] == 1 && self.channel_stride == 1
    }
}

#[derive(Copy, Clone)]
pub(crate) struct TransformKernels {
    /// `(transform, src, k_stride, i_stride, size, dst)`, vectorized along `i`.
    pub filter: unsafe fn(&Transform2d, *const f32, usize, usize, usize, *mut f32),
    pub filter_any: unsafe fn(&Transform2d, *const f32, usize, usize, usize, *mut f32),
    /// `(transform, tiling, src, dst)`, vectorized along channels.
    pub input: unsafe fn(&Transform2d, &Tiling, *const f32, *mut f32),
    pub input_any: unsafe fn(&Transform2d, &Tiling, *const f32, *mut f32),
    pub output: unsafe fn(&Transform2d, &Tiling, *const f32, *mut f32),
    pub output_any: unsafe fn(&Transform2d, &Tiling, *const f32, *mut f32),
}

impl TransformKernels {
    pub(crate) unsafe fn run_input(&self, t: &Transform2d, tiling: &Tiling, src: *const f32, dst: *mut f32) {
        if tiling.is_contiguous() {
            (self.input)(t, tiling, src, dst)
        } else {
            (self.input_any)(t, tiling, src, dst)
        }
    }

    pub(crate) unsafe fn run_output(&self, t: &Transform2d, tiling: &Tiling, src: *const f32, dst: *mut f32) {
        if tiling.is_contiguous() {
            (self.output)(t, tiling, src, dst)
        } else {
            (self.output_any)(t, tiling, src, dst)
        }
    }
}

macro_rules! transform_kernels {
    ($([$target: tt])?) => {
        #[inline(always)]
        unsafe fn load(ptr: *const f32, len: usize) -> F32s {
            if len == N {
                load_f32(ptr)
            } else {
                load_f32_tail(ptr, len)
            }
        }

        #[inline(always)]
        unsafe fn store(ptr: *mut f32, len: usize, value: F32s) {
            if len == N {
                store_f32(ptr, value)
            } else {
                store_f32_tail(ptr, len, value)
            }
        }

        /// `dst = my * src * mx^T`
        #[inline(always)]
        unsafe fn sandwich(my: Matrix, mx: Matrix, src: &[F32s], dst: &mut [F32s]) {
            debug_assert!(src.len() == my.cols * mx.cols);
            debug_assert!(dst.len() == my.rows * mx.rows);
            let mut tmp = [splat_f32(0.0); MAX_TILE];
            for a in 0..my.cols {
                for j in 0..mx.rows {
                    let mut acc = splat_f32(0.0);
                    for b in 0..mx.cols {
                        let m = mx.data[j * mx.cols + b];
                        if m != 0.0 {
                            acc = mul_add_f32(src[a * mx.cols + b], splat_f32(m), acc);
                        }
                    }
                    tmp[a * mx.rows + j] = acc;
                }
            }
            for i in 0..my.rows {
                for j in 0..mx.rows {
                    let mut acc = splat_f32(0.0);
                    for a in 0..my.cols {
                        let m = my.data[i * my.cols + a];
                        if m != 0.0 {
                            acc = mul_add_f32(tmp[a * mx.rows + j], splat_f32(m), acc);
                        }
                    }
                    dst[i * mx.rows + j] = acc;
                }
            }
        }

        #[inline]
        $(#[target_feature(enable = $target)])?
        pub unsafe fn filter(
            t: &Transform2d,
            src: *const f32,
            k_stride: usize,
            i_stride: usize,
            size: usize,
            dst: *mut f32,
        ) {
            let kernel = t.y.kernel * t.x.kernel;
            let count = t.tile_count();
            let mut w = [splat_f32(0.0); MAX_KERNEL];
            let mut u = [splat_f32(0.0); MAX_TILE];
            let mut i = 0;
            while i < size {
                let len = (size - i).min(N);
                for (k, w) in w[..kernel].iter_mut().enumerate() {
                    *w = load(src.add(k * k_stride + i * i_stride), len);
                }
                sandwich(t.y.g, t.x.g, &w[..kernel], &mut u[..count]);
                for (m, u) in u[..count].iter().enumerate() {
                    store(dst.add(m * size + i), len, *u);
                }
                i += N;
            }
        }

        #[inline]
        $(#[target_feature(enable = $target)])?
        pub unsafe fn input(t: &Transform2d, g: &Tiling, src: *const f32, dst: *mut f32) {
            let (tile_y, tile_x) = (t.y.tile, t.x.tile);
            let count = t.tile_count();
            let [row_stride, col_stride, c_stride] = g.image;
            let mut d = [splat_f32(0.0); MAX_TILE];
            let mut v = [splat_f32(0.0); MAX_TILE];
            for ty in 0..g.tiles_y {
                let y0 = (ty * t.y.block) as isize - g.pad_y as isize;
                for tx in 0..g.tiles_x {
                    let x0 = (tx * t.x.block) as isize - g.pad_x as isize;
                    let out = dst.add((ty * g.tiles_x + tx) * g.tile_stride);
                    let mut c = 0;
                    while c < g.channels {
                        let len = (g.channels - c).min(N);
                        for a in 0..tile_y {
                            let y = y0 + a as isize;
                            let row_inside = y >= 0 && (y as usize) < g.height;
                            for b in 0..tile_x {
                                let x = x0 + b as isize;
                                d[a * tile_x + b] = if row_inside && x >= 0 && (x as usize) < g.width {
                                    load(src.add(y as usize * row_stride + x as usize * col_stride + c * c_stride), len)
                                } else {
                                    splat_f32(0.0)
                                };
                            }
                        }
                        sandwich(t.y.bt, t.x.bt, &d[..count], &mut v[..count]);
                        let out = out.add(c * g.channel_stride);
                        for (m, v) in v[..count].iter().enumerate() {
                            store(out.add(m * g.matrix_stride), len, *v);
                        }
                        c += N;
                    }
                }
            }
        }

        #[inline]
        $(#[target_feature(enable = $target)])?
        pub unsafe fn output(t: &Transform2d, g: &Tiling, src: *const f32, dst: *mut f32) {
            let (block_y, block_x) = (t.y.block, t.x.block);
            let count = t.tile_count();
            let [row_stride, col_stride, c_stride] = g.image;
            let mut m = [splat_f32(0.0); MAX_TILE];
            let mut y = [splat_f32(0.0); MAX_TILE];
            for ty in 0..g.tiles_y {
                let rows = (g.height - ty * block_y).min(block_y);
                for tx in 0..g.tiles_x {
                    let cols = (g.width - tx * block_x).min(block_x);
                    let tile = src.add((ty * g.tiles_x + tx) * g.tile_stride);
                    let out = dst.add(ty * block_y * row_stride + tx * block_x * col_stride);
                    let mut c = 0;
                    while c < g.channels {
                        let len = (g.channels - c).min(N);
                        let tile = tile.add(c * g.channel_stride);
                        for (i, m) in m[..count].iter_mut().enumerate() {
                            *m = load(tile.add(i * g.matrix_stride), len);
                        }
                        sandwich(t.y.at, t.x.at, &m[..count], &mut y[..block_y * block_x]);
                        for a in 0..rows {
                            for b in 0..cols {
                                store(out.add(a * row_stride + b * col_stride + c * c_stride), len, y[a * block_x + b]);
                            }
                        }
                        c += N;
                    }
                }
            }
        }

        pub unsafe fn filter_any(
            t: &Transform2d,
            src: *const f32,
            k_stride: usize,
            i_stride: usize,
            size: usize,
            dst: *mut f32,
        ) {
            Arch::vectorize(|| super::scalar::filter(t, src, k_stride, i_stride, size, dst))
        }

        pub unsafe fn input_any(t: &Transform2d, g: &Tiling, src: *const f32, dst: *mut f32) {
            Arch::vectorize(|| super::scalar::input(t, g, src, dst))
        }

        pub unsafe fn output_any(t: &Transform2d, g: &Tiling, src: *const f32, dst: *mut f32) {
            Arch::vectorize(|| super::scalar::output(t, g, src, dst))
        }

        pub const KERNELS: TransformKernels = TransformKernels {
            filter,
            filter_any,
            input,
            input_any,
            output,
            output_any,
        };
    };
}

simdlib_common::isa_modules!(transform_kernels);

pub(crate) fn kernels(isa: Isa) -> TransformKernels {
    simdlib_common::select_kernels!(isa)
}

lazy_static::lazy_static! {
    static ref KERNELS: TransformKernels = kernels(*ISA);
}

/// Elements between transformed input matrices of a `src_c x src_h x src_w`
/// image.
pub fn input_stride(
    variant: WinogradVariant,
    src_c: usize,
    src_h: usize,
    src_w: usize,
    pad: [usize; 4],
) -> Result<usize> {
    let (dst_h, dst_w) = variant
        .dst_size(src_h, src_w, pad)
        .ok_or(Error::InvalidParam("image smaller than the kernel"))?;
    Ok(src_c * variant.tiles(dst_h, dst_w))
}

/// Elements between transformed output matrices of a `dst_c x dst_h x dst_w`
/// image.
pub fn output_stride(variant: WinogradVariant, dst_c: usize, dst_h: usize, dst_w: usize) -> usize {
    dst_c * variant.tiles(dst_h, dst_w)
}

/// Transforms `size` filters into `tile_count()` matrices of `size`
/// elements. `src` is `[kernel][size]` when `trans`, `[size][kernel]`
/// otherwise.
pub fn set_filter(variant: WinogradVariant, src: &[f32], size: usize, dst: &mut [f32], trans: bool) -> Result<()> {
    set_filter_impl(&KERNELS, variant, src, size, dst, trans)
}

pub fn set_filter_with(
    isa: Isa,
    variant: WinogradVariant,
    src: &[f32],
    size: usize,
    dst: &mut [f32],
    trans: bool,
) -> Result<()> {
    set_filter_impl(&kernels(isa.check_available()?), variant, src, size, dst, trans)
}

fn set_filter_impl(
    kernels: &TransformKernels,
    variant: WinogradVariant,
    src: &[f32],
    size: usize,
    dst: &mut [f32],
    trans: bool,
) -> Result<()> {
    let t = variant.transform();
    let kernel = t.y.kernel * t.x.kernel;
    check_len("src", src, size * kernel)?;
    check_len("dst", dst, size * t.tile_count())?;
    unsafe {
        if trans {
            (kernels.filter)(&t, src.as_ptr(), size, 1, size, dst.as_mut_ptr())
        } else {
            (kernels.filter_any)(&t, src.as_ptr(), 1, kernel, size, dst.as_mut_ptr())
        }
    };
    Ok(())
}

/// Splits a `src_c x src_h x src_w` image into transformed tiles, padding it
/// with `[pad_y, pad_x, pad_h, pad_w]` zeros.
#[allow(clippy::too_many_arguments)]
pub fn set_input(
    variant: WinogradVariant,
    src: &[f32],
    src_c: usize,
    src_h: usize,
    src_w: usize,
    pad: [usize; 4],
    dst: &mut [f32],
    dst_stride: usize,
    trans: bool,
) -> Result<()> {
    set_input_impl(&KERNELS, variant, src, src_c, src_h, src_w, pad, dst, dst_stride, trans)
}

#[allow(clippy::too_many_arguments)]
pub fn set_input_with(
    isa: Isa,
    variant: WinogradVariant,
    src: &[f32],
    src_c: usize,
    src_h: usize,
    src_w: usize,
    pad: [usize; 4],
    dst: &mut [f32],
    dst_stride: usize,
    trans: bool,
) -> Result<()> {
    let kernels = kernels(isa.check_available()?);
    set_input_impl(&kernels, variant, src, src_c, src_h, src_w, pad, dst, dst_stride, trans)
}

#[allow(clippy::too_many_arguments)]
fn set_input_impl(
    kernels: &TransformKernels,
    variant: WinogradVariant,
    src: &[f32],
    src_c: usize,
    src_h: usize,
    src_w: usize,
    pad: [usize; 4],
    dst: &mut [f32],
    dst_stride: usize,
    trans: bool,
) -> Result<()> {
    variant.check_pad(pad)?;
    let stride = input_stride(variant, src_c, src_h, src_w, pad)?;
    if dst_stride < stride {
        return Err(Error::InvalidParam("matrix stride shorter than a matrix"));
    }
    check_len("src", src, src_c * src_h * src_w)?;
    check_len("dst", dst, (variant.tile_count() - 1) * dst_stride + stride)?;
    if src_c == 0 {
        return Ok(());
    }

    let dst_size = variant
        .dst_size(src_h, src_w, pad)
        .ok_or(Error::InvalidParam("image smaller than the kernel"))?;
    let tiling = Tiling::new(
        variant,
        src_c,
        src_h,
        src_w,
        (pad[0], pad[1]),
        dst_size,
        dst_stride,
        trans,
    );
    let t = variant.transform();
    unsafe { kernels.run_input(&t, &tiling, src.as_ptr(), dst.as_mut_ptr()) };
    Ok(())
}

/// Gathers transformed tiles back into a `dst_c x dst_h x dst_w` image.
#[allow(clippy::too_many_arguments)]
pub fn set_output(
    variant: WinogradVariant,
    src: &[f32],
    src_stride: usize,
    dst: &mut [f32],
    dst_c: usize,
    dst_h: usize,
    dst_w: usize,
    trans: bool,
) -> Result<()> {
    set_output_impl(&KERNELS, variant, src, src_stride, dst, dst_c, dst_h, dst_w, trans)
}

#[allow(clippy::too_many_arguments)]
pub fn set_output_with(
    isa: Isa,
    variant: WinogradVariant,
    src: &[f32],
    src_stride: usize,
    dst: &mut [f32],
    dst_c: usize,
    dst_h: usize,
    dst_w: usize,
    trans: bool,
) -> Result<()> {
    let kernels = kernels(isa.check_available()?);
    set_output_impl(&kernels, variant, src, src_stride, dst, dst_c, dst_h, dst_w, trans)
}

#[allow(clippy::too_many_arguments)]
fn set_output_impl(
    kernels: &TransformKernels,
    variant: WinogradVariant,
    src: &[f32],
    src_stride: usize,
    dst: &mut [f32],
    dst_c: usize,
    dst_h: usize,
    dst_w: usize,
    trans: bool,
) -> Result<()> {
    let stride = output_stride(variant, dst_c, dst_h, dst_w);
    if src_stride < stride {
        return Err(Error::InvalidParam("matrix stride shorter than a matrix"));
    }
    check_len("src", src, (variant.tile_count() - 1) * src_stride + stride)?;
    check_len("dst", dst, dst_c * dst_h * dst_w)?;
    if stride == 0 {
        return Ok(());
    }

    let tiling = Tiling::new(
        variant,
        dst_c,
        dst_h,
        dst_w,
        (0, 0),
        (dst_h, dst_w),
        src_stride,
        trans,
    );
    let t = variant.transform();
    unsafe { kernels.run_output(&t, &tiling, src.as_ptr(), dst.as_mut_ptr()) };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn random(len: usize) -> Vec<f32> {
        (0..len).map(|_| rand::random::<f32>() * 2.0 - 1.0).collect()
    }

    /// Single-image correlation over channel-last data through the three
    /// transforms, with the per-tile products summed over channels.
    #[allow(clippy::too_many_arguments)]
    fn winograd_conv(
        isa: Isa,
        variant: WinogradVariant,
        src: &[f32],
        src_c: usize,
        src_h: usize,
        src_w: usize,
        pad: [usize; 4],
        weight: &[f32],
        dst_c: usize,
        trans: bool,
    ) -> Vec<f32> {
        let (dst_h, dst_w) = variant.dst_size(src_h, src_w, pad).unwrap();
        let count = variant.tile_count();
        let tiles = variant.tiles(dst_h, dst_w);
        let size = src_c * dst_c;

        let mut filter = vec![0.0; count * size];
        set_filter_with(isa, variant, weight, size, &mut filter, trans).unwrap();
        let stride_s = input_stride(variant, src_c, src_h, src_w, pad).unwrap();
        let mut input = vec![0.0; count * stride_s];
        set_input_with(isa, variant, src, src_c, src_h, src_w, pad, &mut input, stride_s, trans).unwrap();

        let stride_d = output_stride(variant, dst_c, dst_h, dst_w);
        let mut product = vec![0.0f32; count * stride_d];
        for m in 0..count {
            for tile in 0..tiles {
                for d in 0..dst_c {
                    let mut sum = 0.0;
                    for c in 0..src_c {
                        // filter index i runs over (c, d) with HWIO, (d, c) with OIHW
                        let (v, u) = if trans {
                            (input[m * stride_s + tile * src_c + c], filter[m * size + c * dst_c + d])
                        } else {
                            (input[m * stride_s + c * tiles + tile], filter[m * size + d * src_c + c])
                        };
                        sum += v * u;
                    }
                    let idx = if trans { tile * dst_c + d } else { d * tiles + tile };
                    product[m * stride_d + idx] = sum;
                }
            }
        }

        let mut dst = vec![0.0; dst_c * dst_h * dst_w];
        set_output_with(isa, variant, &product, stride_d, &mut dst, dst_c, dst_h, dst_w, trans).unwrap();
        dst
    }

    /// Direct correlation, channel-last with HWIO weights or channel-first
    /// with OIHW weights.
    #[allow(clippy::too_many_arguments)]
    fn direct_conv(
        variant: WinogradVariant,
        src: &[f32],
        src_c: usize,
        src_h: usize,
        src_w: usize,
        pad: [usize; 4],
        weight: &[f32],
        dst_c: usize,
        trans: bool,
    ) -> Vec<f32> {
        let (kernel_y, kernel_x) = variant.kernel();
        let (dst_h, dst_w) = variant.dst_size(src_h, src_w, pad).unwrap();
        let mut dst = vec![0.0; dst_c * dst_h * dst_w];
        for y in 0..dst_h {
            for x in 0..dst_w {
                for d in 0..dst_c {
                    let mut sum = 0.0;
                    for ky in 0..kernel_y {
                        for kx in 0..kernel_x {
                            let sy = (y + ky) as isize - pad[0] as isize;
                            let sx = (x + kx) as isize - pad[1] as isize;
                            if sy < 0 || sx < 0 || sy as usize >= src_h || sx as usize >= src_w {
                                continue;
                            }
                            let (sy, sx) = (sy as usize, sx as usize);
                            for c in 0..src_c {
                                let (s, w) = if trans {
                                    (
                                        src[(sy * src_w + sx) * src_c + c],
                                        weight[((ky * kernel_x + kx) * src_c + c) * dst_c + d],
                                    )
                                } else {
                                    (
                                        src[(c * src_h + sy) * src_w + sx],
                                        weight[((d * src_c + c) * kernel_y + ky) * kernel_x + kx],
                                    )
                                };
                                sum += s * w;
                            }
                        }
                    }
                    let idx = if trans {
                        (y * dst_w + x) * dst_c + d
                    } else {
                        (d * dst_h + y) * dst_w + x
                    };
                    dst[idx] = sum;
                }
            }
        }
        dst
    }

    fn pads(variant: WinogradVariant) -> Vec<[usize; 4]> {
        use WinogradVariant::*;
        match variant {
            Kernel1x3Block1x4 => vec![[0, 0, 0, 0], [0, 1, 0, 1]],
            Kernel1x5Block1x4 => vec![[0, 0, 0, 0], [0, 1, 0, 1], [0, 2, 0, 2]],
            Kernel2x2Block2x2 | Kernel2x2Block4x4 => vec![[0, 0, 0, 0], [1, 1, 0, 0], [0, 0, 1, 1]],
            _ => vec![[0, 0, 0, 0], [1, 1, 1, 1], [1, 0, 0, 1]],
        }
    }

    #[test]
    fn test_matches_direct() {
        for variant in WinogradVariant::ALL {
            for pad in pads(variant) {
                for trans in [true, false] {
                    for (src_c, src_h, src_w, dst_c) in [(1, 6, 7, 1), (3, 9, 11, 5), (17, 5, 13, 2)] {
                        let (kernel_y, kernel_x) = variant.kernel();
                        let src = random(src_c * src_h * src_w);
                        let weight = random(kernel_y * kernel_x * src_c * dst_c);
                        let expected = direct_conv(variant, &src, src_c, src_h, src_w, pad, &weight, dst_c, trans);
                        for isa in Isa::available() {
                            let dst = winograd_conv(isa, variant, &src, src_c, src_h, src_w, pad, &weight, dst_c, trans);
                            assert_eq!(dst.len(), expected.len());
                            for (x, y) in dst.iter().zip(&expected) {
                                assert_approx_eq!(x, y, 1e-3);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_isa_matches_base() {
        let variant = WinogradVariant::Kernel3x3Block4x4;
        let (src_c, src_h, src_w, pad) = (37, 10, 9, [1, 1, 1, 1]);
        let src = random(src_c * src_h * src_w);
        let stride = input_stride(variant, src_c, src_h, src_w, pad).unwrap();
        let mut expected = vec![0.0; 36 * stride];
        set_input_with(Isa::Base, variant, &src, src_c, src_h, src_w, pad, &mut expected, stride, true).unwrap();
        for isa in Isa::available() {
            let mut dst = vec![0.0; 36 * stride];
            set_input_with(isa, variant, &src, src_c, src_h, src_w, pad, &mut dst, stride, true).unwrap();
            for (x, y) in dst.iter().zip(&expected) {
                assert_approx_eq!(x, y, 1e-4);
            }
        }
    }

    #[test]
    fn test_shapes() {
        use WinogradVariant::*;
        assert_eq!(Kernel1x3Block1x4.tile(), (1, 6));
        assert_eq!(Kernel1x3Block1x4.tile_count(), 6);
        assert_eq!(Kernel1x5Block1x4.tile_count(), 8);
        assert_eq!(Kernel2x2Block2x2.tile_count(), 9);
        assert_eq!(Kernel2x2Block4x4.tile_count(), 25);
        assert_eq!(Kernel3x3Block2x2.tile_count(), 16);
        assert_eq!(Kernel3x3Block3x3.tile_count(), 25);
        assert_eq!(Kernel3x3Block4x4.tile_count(), 36);
        assert_eq!(Kernel3x3Block4x4.tiles(10, 9), 3 * 3);
        assert_eq!(Kernel3x3Block2x2.dst_size(5, 6, [1, 1, 1, 1]), Some((5, 6)));
        assert_eq!(Kernel3x3Block2x2.dst_size(2, 6, [0, 0, 0, 0]), None);
        assert_eq!(Kernel1x5Block1x4.dst_size(1, 6, [0, 2, 0, 2]), Some((1, 6)));
    }

    #[test]
    fn test_bad_params() {
        use WinogradVariant::*;
        assert!(Kernel3x3Block2x2.check_pad([2, 0, 0, 0]).is_err());
        assert!(Kernel1x3Block1x4.check_pad([1, 1, 0, 1]).is_err());
        assert!(Kernel1x3Block1x4.check_pad([0, 1, 0, 0]).is_err());
        assert!(Kernel1x5Block1x4.check_pad([0, 2, 0, 2]).is_ok());
        assert!(Kernel2x2Block2x2.check_pad([1, 1, 1, 1]).is_err());
        assert!(Kernel2x2Block4x4.check_pad([1, 0, 0, 1]).is_err());

        let src = [0.0; 4 * 4];
        let mut dst = [0.0; 16 * 4];
        assert!(set_input(Kernel3x3Block2x2, &src, 1, 4, 4, [0; 4], &mut dst, 4, true).is_ok());
        assert!(set_input(Kernel3x3Block2x2, &src, 1, 4, 4, [0; 4], &mut dst, 0, true).is_err());
        assert!(set_input(Kernel3x3Block2x2, &src, 1, 4, 4, [0; 4], &mut dst[..60], 4, true).is_err());
        assert!(set_input(Kernel3x3Block2x2, &src, 1, 4, 5, [0; 4], &mut dst, 4, true).is_err());
        assert!(set_input(Kernel3x3Block2x2, &src, 1, 2, 2, [0; 4], &mut dst, 4, true).is_err());
        assert!(set_filter(Kernel3x3Block2x2, &src[..8], 1, &mut dst, true).is_err());
    }
}
