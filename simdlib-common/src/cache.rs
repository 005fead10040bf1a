use once_cell::sync::OnceCell;

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct CacheInfo {
    pub associativity: usize,
    pub cache_bytes: usize,
    pub cache_line_bytes: usize,
}

impl CacheInfo {
    const fn new(associativity: usize, cache_bytes: usize) -> Self {
        Self {
            associativity,
            cache_bytes,
            cache_line_bytes: 64,
        }
    }
}

pub trait DivCeil: Sized {
    fn msrv_div_ceil(self, rhs: Self) -> Self;
    fn msrv_next_multiple_of(self, rhs: Self) -> Self;
    fn msrv_prev_multiple_of(self, rhs: Self) -> Self;
}

impl DivCeil for usize {
    #[inline]
    fn msrv_div_ceil(self, rhs: Self) -> Self {
        let d = self / rhs;
        if self % rhs > 0 {
            d + 1
        } else {
            d
        }
    }

    #[inline]
    fn msrv_next_multiple_of(self, rhs: Self) -> Self {
        match self % rhs {
            0 => self,
            r => self + (rhs - r),
        }
    }

    #[inline]
    fn msrv_prev_multiple_of(self, rhs: Self) -> Self {
        self / rhs * rhs
    }
}

/// Smallest power of two that is `>= value` (`1` for `0`).
#[inline]
pub fn pow2_hi(value: usize) -> usize {
    value.max(1).next_power_of_two()
}

#[cfg(all(not(miri), any(target_arch = "x86", target_arch = "x86_64")))]
fn intel_cache_info(cpuid: &raw_cpuid::CpuId) -> Option<[CacheInfo; 3]> {
    let mut info = [CacheInfo::new(0, 0); 3];
    for cache in cpuid.get_cache_parameters()? {
        use raw_cpuid::CacheType::*;
        match cache.cache_type() {
            Null | Instruction | Reserved => continue,
            Data | Unified => {
                let level = cache.level() as usize;
                if level == 0 || level > 3 {
                    continue;
                }
                let slot = &mut info[level - 1];
                slot.associativity = cache.associativity();
                slot.cache_line_bytes = cache.coherency_line_size();
                slot.cache_bytes = cache.associativity() * cache.sets() * cache.coherency_line_size();
            }
        }
    }
    Some(info)
}

#[cfg(all(not(miri), any(target_arch = "x86", target_arch = "x86_64")))]
fn amd_cache_info(cpuid: &raw_cpuid::CpuId) -> Option<[CacheInfo; 3]> {
    let l1 = cpuid.get_l1_cache_and_tlb_info()?;
    let l23 = cpuid.get_l2_l3_cache_and_tlb_info()?;

    let level = |associativity: raw_cpuid::Associativity, cache_kb: usize, line: u8| {
        use raw_cpuid::Associativity::*;
        let cache_bytes = cache_kb * 1024;
        let cache_line_bytes = line as usize;
        let associativity = match associativity {
            Unknown | Disabled => return CacheInfo::new(0, 0),
            FullyAssociative => cache_bytes / cache_line_bytes.max(1),
            DirectMapped => 1,
            NWay(n) => n as usize,
        };
        CacheInfo {
            associativity,
            cache_bytes,
            cache_line_bytes,
        }
    };

    Some([
        level(
            l1.dcache_associativity(),
            l1.dcache_size() as usize,
            l1.dcache_line_size(),
        ),
        level(
            l23.l2cache_associativity(),
            l23.l2cache_size() as usize,
            l23.l2cache_line_size(),
        ),
        // reported in units of 512KiB
        level(
            l23.l3cache_associativity(),
            l23.l3cache_size() as usize * 512,
            l23.l3cache_line_size(),
        ),
    ])
}

#[cfg(all(not(miri), any(target_arch = "x86", target_arch = "x86_64")))]
fn cache_info() -> Option<[CacheInfo; 3]> {
    let cpuid = raw_cpuid::CpuId::new();
    let vendor = cpuid.get_vendor_info()?;
    match vendor.as_str() {
        "GenuineIntel" => intel_cache_info(&cpuid),
        "AuthenticAMD" => amd_cache_info(&cpuid),
        _ => None,
    }
}

#[cfg(not(all(not(miri), any(target_arch = "x86", target_arch = "x86_64"))))]
fn cache_info() -> Option<[CacheInfo; 3]> {
    None
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
static CACHE_INFO_DEFAULT: [CacheInfo; 3] = [
    CacheInfo::new(8, 32 * 1024),
    CacheInfo::new(8, 256 * 1024),
    CacheInfo::new(8, 2 * 1024 * 1024),
];

#[cfg(target_arch = "aarch64")]
static CACHE_INFO_DEFAULT: [CacheInfo; 3] = [
    CacheInfo::new(4, 64 * 1024),
    CacheInfo::new(8, 1024 * 1024),
    CacheInfo::new(16, 4 * 1024 * 1024),
];

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
static CACHE_INFO_DEFAULT: [CacheInfo; 3] = [
    CacheInfo::new(8, 16 * 1024),
    CacheInfo::new(8, 512 * 1024),
    CacheInfo::new(8, 1024 * 1024),
];

pub struct CacheInfoDeref;

impl core::ops::Deref for CacheInfoDeref {
    type Target = [CacheInfo; 3];

    #[inline]
    fn deref(&self) -> &Self::Target {
        static CACHE_INFO: OnceCell<[CacheInfo; 3]> = OnceCell::new();
        CACHE_INFO.get_or_init(|| {
            let mut info = cache_info().unwrap_or(CACHE_INFO_DEFAULT);
            // a level the cpu did not report keeps the default size
            for (level, default) in info.iter_mut().zip(CACHE_INFO_DEFAULT.iter()) {
                if level.cache_bytes == 0 {
                    *level = *default;
                }
            }
            tracing::debug!(
                l1 = info[0].cache_bytes,
                l2 = info[1].cache_bytes,
                l3 = info[2].cache_bytes,
                "cache sizes"
            );
            info
        })
    }
}

pub static CACHE_INFO: CacheInfoDeref = CacheInfoDeref;

/// L1, L2 and L3 data cache sizes in bytes.
#[inline]
pub fn cache_sizes() -> [usize; 3] {
    let info = *CACHE_INFO;
    [info[0].cache_bytes, info[1].cache_bytes, info[2].cache_bytes]
}

#[derive(Default, Debug, Copy, Clone)]
pub struct KernelParams {
    pub kc: usize,
    pub mc: usize,
    pub nc: usize,
}

#[inline]
fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let rem = a % b;
        a = b;
        b = rem;
    }
    a
}

/// Blocking of an `m x k` by `k x n` product for an `mr x nr` register tile.
///
/// `kc` is chosen so consecutive lhs micropanels map to different L1 sets,
/// `mc` so an lhs macropanel fills the L2 ways not used by one rhs
/// micropanel, and `nc` so an rhs macropanel fits L3.
pub fn kernel_params(
    m: usize,
    n: usize,
    k: usize,
    mr: usize,
    nr: usize,
    sizeof: usize,
) -> KernelParams {
    if m == 0 || n == 0 || k == 0 {
        return KernelParams {
            kc: k,
            mc: m,
            nc: n,
        };
    }

    let info = *CACHE_INFO;

    let l1_bytes = info[0].cache_bytes.max(32 * 1024);
    let l2_bytes = info[1].cache_bytes.max(l1_bytes);
    let l3_bytes = info[2].cache_bytes;

    let l1_line = info[0].cache_line_bytes.max(64);
    let l1_assoc = info[0].associativity.max(2);
    let l2_assoc = info[1].associativity.max(2);
    let l3_assoc = info[2].associativity.max(2);

    let l1_sets = l1_bytes / (l1_line * l1_assoc);
    let set_bytes = l1_line * l1_sets;

    let g = gcd(mr * sizeof, set_bytes);
    let kc_0 = set_bytes / g;
    let c_lhs = (mr * sizeof) / g;
    let c_rhs = (nr * kc_0 * sizeof).msrv_div_ceil(set_bytes);
    let kc_multiplier = (l1_assoc / (c_lhs + c_rhs).max(1)).max(1);
    let kc = (kc_0 * kc_multiplier.next_power_of_two()).clamp(1, 512).min(k);
    let kc = k.msrv_div_ceil(k.msrv_div_ceil(kc));

    let rhs_micropanel_bytes = nr * kc * sizeof;
    let rhs_l2_assoc = rhs_micropanel_bytes.msrv_div_ceil(l2_bytes / l2_assoc);
    let lhs_l2_assoc = l2_assoc.saturating_sub(1 + rhs_l2_assoc).max(1);
    let mc = ((lhs_l2_assoc * l2_bytes) / (l2_assoc * sizeof * kc))
        .msrv_prev_multiple_of(mr)
        .max(mr);
    let mc = m.msrv_div_ceil(m.msrv_div_ceil(mc) * mr) * mr;

    let nc = if l3_bytes == 0 {
        n.msrv_next_multiple_of(nr)
    } else {
        let rhs_macropanel_bytes = ((l3_assoc - 1) * l3_bytes) / l3_assoc;
        let nc = (rhs_macropanel_bytes / (sizeof * kc))
            .msrv_prev_multiple_of(nr)
            .max(nr);
        n.msrv_div_ceil(n.msrv_div_ceil(nc) * nr) * nr
    };

    KernelParams { kc, mc, nc }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_div_ceil() {
        assert_eq!(7usize.msrv_div_ceil(2), 4);
        assert_eq!(8usize.msrv_div_ceil(2), 4);
        assert_eq!(9usize.msrv_next_multiple_of(8), 16);
        assert_eq!(16usize.msrv_next_multiple_of(8), 16);
        assert_eq!(15usize.msrv_prev_multiple_of(8), 8);
    }

    #[test]
    fn test_pow2_hi() {
        assert_eq!(pow2_hi(0), 1);
        assert_eq!(pow2_hi(1), 1);
        assert_eq!(pow2_hi(3), 4);
        assert_eq!(pow2_hi(8), 8);
        assert_eq!(pow2_hi(9), 16);
    }

    #[test]
    fn test_cache_sizes() {
        let [l1, l2, l3] = cache_sizes();
        assert!(l1 > 0);
        assert!(l2 > 0);
        assert!(l3 > 0);
    }

    #[test]
    fn test_kernel_params() {
        for (m, n, k) in [(1, 1, 1), (64, 64, 64), (1000, 17, 300), (3, 4096, 5)] {
            let params = kernel_params(m, n, k, 8, 4, 4);
            dbg!(m, n, k, params);
            assert!(params.kc >= 1 && params.kc <= k);
            assert!(params.mc >= 1 && params.mc % 8 == 0);
            assert!(params.nc >= 1 && params.nc % 4 == 0);
        }
        let params = kernel_params(0, 3, 4, 8, 4, 4);
        assert_eq!((params.kc, params.mc, params.nc), (4, 0, 3));
    }
}
