//! 8-bit BGR to CIE Lab (D65) in fixed point.
//!
//! Channels are linearized through a gamma table, mixed into XYZ with 12-bit
//! coefficients and mapped through a cube root table with 15 fractional bits.
//! Output pixels are `L, a, b` bytes with `L` scaled to `0..=255` and `a`, `b`
//! offset by 128.

use once_cell::sync::Lazy;
use simdlib_common::{check_len, Error, Isa, Result, ISA};

const LAB_SHIFT: i32 = 12;
const LAB_SHIFT2: i32 = 15;
const GAMMA_SHIFT: i32 = 3;

const GAMMA_TAB_SIZE: usize = 256;
const CBRT_TAB_SIZE: usize = GAMMA_TAB_SIZE * 3 / 2 * (1 << GAMMA_SHIFT);

const L_SCALE: i32 = (116 * 255 + 50) / 100;
const L_SHIFT: i32 = -((16 * 255 * (1 << LAB_SHIFT2) + 50) / 100);

const D65: [f64; 9] = [
    0.412453, 0.357580, 0.180423, //
    0.212671, 0.715160, 0.072169, //
    0.019334, 0.119193, 0.950227,
];
const WHITE: [f64; 3] = [0.950456, 1.0, 1.088754];

struct Tables {
    gamma: [i32; GAMMA_TAB_SIZE],
    cbrt: [i32; CBRT_TAB_SIZE],
    /// XYZ rows, columns in B, G, R order.
    coeffs: [i32; 9],
}

fn saturate_u16(value: f64) -> i32 {
    (value.round() as i32).clamp(0, u16::MAX as i32)
}

fn srgb_to_linear(x: f64) -> f64 {
    if x <= 0.04045 {
        x / 12.92
    } else {
        ((x + 0.055) / 1.055).powf(2.4)
    }
}

fn lab_f(x: f64) -> f64 {
    if x < 0.008856 {
        x * 7.787 + 16.0 / 116.0
    } else {
        x.cbrt()
    }
}

static TABLES: Lazy<Tables> = Lazy::new(|| {
    let gamma_scale = (255 << GAMMA_SHIFT) as f64;

    let mut gamma = [0; GAMMA_TAB_SIZE];
    for (i, g) in gamma.iter_mut().enumerate() {
        *g = saturate_u16(gamma_scale * srgb_to_linear(i as f64 / 255.0));
    }

    let mut cbrt = [0; CBRT_TAB_SIZE];
    for (i, c) in cbrt.iter_mut().enumerate() {
        *c = saturate_u16((1 << LAB_SHIFT2) as f64 * lab_f(i as f64 / gamma_scale));
    }

    let mut coeffs = [0; 9];
    for row in 0..3 {
        let scale = (1 << LAB_SHIFT) as f64 / WHITE[row];
        for col in 0..3 {
            coeffs[row * 3 + (2 - col)] = (D65[row * 3 + col] * scale).round() as i32;
        }
    }

    tracing::trace!("lab tables initialized");
    Tables {
        gamma,
        cbrt,
        coeffs,
    }
});

#[derive(Copy, Clone)]
struct LabKernels {
    /// `(tables, src_row, width, dst_row)`
    bgr: unsafe fn(&Tables, *const u8, usize, *mut u8),
    bgra: unsafe fn(&Tables, *const u8, usize, *mut u8),
}

macro_rules! lab_kernels {
    ($([$target: tt])?) => {
        #[inline(always)]
        unsafe fn descale(value: I32s, shift: i32) -> I32s {
            sra_i32(add_i32(value, splat_i32(1 << (shift - 1))), shift)
        }

        #[inline(always)]
        unsafe fn dot(b: I32s, g: I32s, r: I32s, coeffs: &[i32]) -> I32s {
            let sum = add_i32(
                add_i32(mullo_i32(b, splat_i32(coeffs[0])), mullo_i32(g, splat_i32(coeffs[1]))),
                mullo_i32(r, splat_i32(coeffs[2])),
            );
            descale(sum, LAB_SHIFT)
        }

        #[inline(always)]
        unsafe fn convert<const CHANNELS: usize>(tables: &Tables, src: *const u8, dst: *mut u8) {
            let stride = CHANNELS as isize;
            let gamma = tables.gamma.as_ptr();
            let b = lookup(gamma, gather_u8(src, stride));
            let g = lookup(gamma, gather_u8(src.add(1), stride));
            let r = lookup(gamma, gather_u8(src.add(2), stride));

            let cbrt = tables.cbrt.as_ptr();
            let c = &tables.coeffs;
            let fx = lookup(cbrt, dot(b, g, r, &c[0..3]));
            let fy = lookup(cbrt, dot(b, g, r, &c[3..6]));
            let fz = lookup(cbrt, dot(b, g, r, &c[6..9]));

            let offset = splat_i32(128 << LAB_SHIFT2);
            let l = descale(add_i32(mullo_i32(fy, splat_i32(L_SCALE)), splat_i32(L_SHIFT)), LAB_SHIFT2);
            let a = descale(add_i32(mullo_i32(sub_i32(fx, fy), splat_i32(500)), offset), LAB_SHIFT2);
            let b = descale(add_i32(mullo_i32(sub_i32(fy, fz), splat_i32(200)), offset), LAB_SHIFT2);

            scatter_u8(dst, 3, clamp_u8(l));
            scatter_u8(dst.add(1), 3, clamp_u8(a));
            scatter_u8(dst.add(2), 3, clamp_u8(b));
        }

        #[inline]
        $(#[target_feature(enable = $target)])?
        pub unsafe fn row<const CHANNELS: usize>(tables: &Tables, src: *const u8, width: usize, dst: *mut u8) {
            let mut x = 0;
            while x + N <= width {
                convert::<CHANNELS>(tables, src.add(x * CHANNELS), dst.add(x * 3));
                x += N;
            }
            if x < width {
                super::scalar::row::<CHANNELS>(tables, src.add(x * CHANNELS), width - x, dst.add(x * 3));
            }
        }

        pub const KERNELS: LabKernels = LabKernels {
            bgr: row::<3>,
            bgra: row::<4>,
        };
    };
}

simdlib_common::isa_modules!(lab_kernels);

fn kernels(isa: Isa) -> LabKernels {
    simdlib_common::select_kernels!(isa)
}

lazy_static::lazy_static! {
    static ref KERNELS: LabKernels = kernels(*ISA);
}

/// Converts a `width` x `height` BGR image into Lab.
///
/// Rows start every `bgr_stride` bytes in `bgr` and every `lab_stride` bytes
/// in `lab`; each Lab pixel takes 3 bytes.
pub fn bgr_to_lab(
    bgr: &[u8],
    bgr_stride: usize,
    width: usize,
    height: usize,
    lab: &mut [u8],
    lab_stride: usize,
) -> Result<()> {
    let kernels = &*KERNELS;
    convert_image(kernels.bgr, 3, bgr, bgr_stride, width, height, lab, lab_stride)
}

pub fn bgr_to_lab_with(
    isa: Isa,
    bgr: &[u8],
    bgr_stride: usize,
    width: usize,
    height: usize,
    lab: &mut [u8],
    lab_stride: usize,
) -> Result<()> {
    let kernels = kernels(isa.check_available()?);
    convert_image(kernels.bgr, 3, bgr, bgr_stride, width, height, lab, lab_stride)
}

/// Same as [`bgr_to_lab`] for 4-channel input. Alpha is ignored.
pub fn bgra_to_lab(
    bgra: &[u8],
    bgra_stride: usize,
    width: usize,
    height: usize,
    lab: &mut [u8],
    lab_stride: usize,
) -> Result<()> {
    let kernels = &*KERNELS;
    convert_image(kernels.bgra, 4, bgra, bgra_stride, width, height, lab, lab_stride)
}

pub fn bgra_to_lab_with(
    isa: Isa,
    bgra: &[u8],
    bgra_stride: usize,
    width: usize,
    height: usize,
    lab: &mut [u8],
    lab_stride: usize,
) -> Result<()> {
    let kernels = kernels(isa.check_available()?);
    convert_image(kernels.bgra, 4, bgra, bgra_stride, width, height, lab, lab_stride)
}

/// Bytes an image of `height` rows needs when only the last row is tight.
fn image_len(stride: usize, row: usize, height: usize) -> usize {
    match height {
        0 => 0,
        _ => (height - 1) * stride + row,
    }
}

#[allow(clippy::too_many_arguments)]
fn convert_image(
    row: unsafe fn(&Tables, *const u8, usize, *mut u8),
    channels: usize,
    src: &[u8],
    src_stride: usize,
    width: usize,
    height: usize,
    dst: &mut [u8],
    dst_stride: usize,
) -> Result<()> {
    if src_stride < width * channels || dst_stride < width * 3 {
        return Err(Error::InvalidParam("row stride shorter than a row"));
    }
    check_len("src", src, image_len(src_stride, width * channels, height))?;
    check_len("dst", dst, image_len(dst_stride, width * 3, height))?;
    if width == 0 {
        return Ok(());
    }

    let tables = &*TABLES;
    for y in 0..height {
        unsafe {
            row(
                tables,
                src.as_ptr().add(y * src_stride),
                width,
                dst.as_mut_ptr().add(y * dst_stride),
            )
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_image(stride: usize, height: usize) -> Vec<u8> {
        (0..stride * height).map(|_| rand::random::<u8>()).collect()
    }

    fn lab_ref(b: u8, g: u8, r: u8) -> [f64; 3] {
        let lin = |v: u8| srgb_to_linear(v as f64 / 255.0);
        let (r, g, b) = (lin(r), lin(g), lin(b));
        let xyz: Vec<f64> = (0..3)
            .map(|i| (D65[i * 3] * r + D65[i * 3 + 1] * g + D65[i * 3 + 2] * b) / WHITE[i])
            .collect();
        let (fx, fy, fz) = (lab_f(xyz[0]), lab_f(xyz[1]), lab_f(xyz[2]));
        [
            (116.0 * fy - 16.0) * 255.0 / 100.0,
            500.0 * (fx - fy) + 128.0,
            200.0 * (fy - fz) + 128.0,
        ]
    }

    #[test]
    fn test_tables() {
        let tables = &*TABLES;
        assert_eq!(tables.gamma[0], 0);
        assert_eq!(tables.gamma[255], 255 << GAMMA_SHIFT);
        assert_eq!(tables.cbrt[255 << GAMMA_SHIFT], 1 << LAB_SHIFT2);
        assert_eq!(tables.coeffs, [778, 1541, 1777, 296, 2929, 871, 3575, 448, 73]);
        for row in tables.coeffs.chunks(3) {
            assert_eq!(row.iter().sum::<i32>(), 1 << LAB_SHIFT);
        }
    }

    #[test]
    fn test_known_colors() {
        let bgr = [
            255, 255, 255, //
            0, 0, 0, //
            0, 0, 255, //
            255, 0, 0, //
            0, 255, 0,
        ];
        let expected = [
            255, 128, 128, //
            0, 128, 128, //
            136, 208, 195, //
            82, 207, 20, //
            224, 42, 211,
        ];
        for isa in Isa::available() {
            let mut lab = [0u8; 15];
            bgr_to_lab_with(isa, &bgr, 15, 5, 1, &mut lab, 15).unwrap();
            assert_eq!(lab, expected, "{isa}");
        }
    }

    #[test]
    fn test_close_to_float() {
        let (width, height) = (61, 7);
        let bgr = random_image(width * 3, height);
        let mut lab = vec![0u8; width * 3 * height];
        bgr_to_lab(&bgr, width * 3, width, height, &mut lab, width * 3).unwrap();
        for (src, dst) in bgr.chunks_exact(3).zip(lab.chunks_exact(3)) {
            let expected = lab_ref(src[0], src[1], src[2]);
            for (value, expected) in dst.iter().zip(expected) {
                assert!(
                    (*value as f64 - expected.clamp(0.0, 255.0)).abs() <= 3.0,
                    "{src:?} -> {dst:?}, expected {expected}"
                );
            }
        }
    }

    #[test]
    fn test_isa_matches_base() {
        for (width, height) in [(1, 1), (7, 3), (16, 2), (33, 5), (100, 4)] {
            let (src_stride, dst_stride) = (width * 3 + 5, width * 3 + 2);
            let bgr = random_image(src_stride, height);
            let bgra = random_image(width * 4, height);

            let mut expected = vec![0u8; dst_stride * height];
            bgr_to_lab_with(Isa::Base, &bgr, src_stride, width, height, &mut expected, dst_stride).unwrap();
            let mut expected_a = vec![0u8; width * 3 * height];
            bgra_to_lab_with(Isa::Base, &bgra, width * 4, width, height, &mut expected_a, width * 3).unwrap();

            for isa in Isa::available() {
                let mut lab = vec![0u8; dst_stride * height];
                bgr_to_lab_with(isa, &bgr, src_stride, width, height, &mut lab, dst_stride).unwrap();
                assert_eq!(lab, expected, "{isa} {width}x{height}");

                let mut lab = vec![0u8; width * 3 * height];
                bgra_to_lab_with(isa, &bgra, width * 4, width, height, &mut lab, width * 3).unwrap();
                assert_eq!(lab, expected_a, "{isa} {width}x{height}");
            }
        }
    }

    #[test]
    fn test_alpha_ignored() {
        let bgr = random_image(3 * 20, 1);
        let bgra: Vec<u8> = bgr
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], rand::random::<u8>()])
            .collect();
        let mut lab = [0u8; 60];
        let mut lab_a = [0u8; 60];
        bgr_to_lab(&bgr, 60, 20, 1, &mut lab, 60).unwrap();
        bgra_to_lab(&bgra, 80, 20, 1, &mut lab_a, 60).unwrap();
        assert_eq!(lab, lab_a);
    }

    #[test]
    fn test_bad_buffers() {
        let bgr = [0u8; 30];
        let mut lab = [0u8; 30];
        assert!(bgr_to_lab(&bgr, 20, 10, 1, &mut lab, 30).is_err());
        assert!(bgr_to_lab(&bgr, 30, 10, 2, &mut lab, 30).is_err());
        assert!(bgr_to_lab(&bgr, 30, 10, 1, &mut lab[..29], 30).is_err());
        assert!(bgr_to_lab(&bgr, 30, 10, 1, &mut lab, 30).is_ok());
        assert!(bgr_to_lab(&[], 0, 0, 5, &mut [], 0).is_ok());
    }
}
