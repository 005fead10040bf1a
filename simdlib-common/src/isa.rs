use core::fmt;
use core::str::FromStr;

use once_cell::sync::OnceCell;

/// Instruction set extensions a kernel can be specialized for.
///
/// Variants of one architecture are ordered by capability, so `max`/`min`
/// pick the more/less capable tier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Isa {
    Base,
    Sse41,
    Avx2,
    Avx512bw,
    Avx512vnni,
    AmxBf16,
    Neon,
}

/// Environment variable capping the detected instruction set.
pub const ISA_ENV: &str = "SIMDLIB_ISA";

impl Isa {
    pub const ALL: [Isa; 7] = [
        Isa::Base,
        Isa::Sse41,
        Isa::Avx2,
        Isa::Avx512bw,
        Isa::Avx512vnni,
        Isa::AmxBf16,
        Isa::Neon,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Isa::Base => "base",
            Isa::Sse41 => "sse41",
            Isa::Avx2 => "avx2",
            Isa::Avx512bw => "avx512bw",
            Isa::Avx512vnni => "avx512vnni",
            Isa::AmxBf16 => "amxbf16",
            Isa::Neon => "neon",
        }
    }

    /// Runtime cpu check. AVX-512 tiers are only reported when their kernels are
    /// compiled in (`nightly` feature).
    pub fn is_available(self) -> bool {
        match self {
            Isa::Base => true,
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            Isa::Sse41 => crate::feature_detected!("sse4.1"),
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            Isa::Avx2 => {
                Isa::Sse41.is_available()
                    && crate::feature_detected!("avx2")
                    && crate::feature_detected!("fma")
            }
            #[cfg(all(feature = "nightly", any(target_arch = "x86", target_arch = "x86_64")))]
            Isa::Avx512bw => {
                Isa::Avx2.is_available()
                    && crate::feature_detected!("avx512f")
                    && crate::feature_detected!("avx512bw")
            }
            #[cfg(all(feature = "nightly", any(target_arch = "x86", target_arch = "x86_64")))]
            Isa::Avx512vnni => {
                Isa::Avx512bw.is_available() && crate::feature_detected!("avx512vnni")
            }
            #[cfg(all(feature = "nightly", target_arch = "x86_64"))]
            Isa::AmxBf16 => Isa::Avx512vnni.is_available() && has_amx_bf16(),
            #[cfg(target_arch = "aarch64")]
            Isa::Neon => crate::feature_detected!("neon"),
            _ => false,
        }
    }

    /// The most capable instruction set of this cpu.
    pub fn detect() -> Isa {
        Isa::ALL
            .iter()
            .copied()
            .filter(|isa| isa.is_available())
            .max()
            .unwrap_or(Isa::Base)
    }

    /// Every instruction set of this cpu, least capable first.
    pub fn available() -> Vec<Isa> {
        Isa::ALL
            .iter()
            .copied()
            .filter(|isa| isa.is_available())
            .collect()
    }

    /// Fails for instruction sets this cpu does not support, whose kernels
    /// must not run.
    pub fn check_available(self) -> crate::Result<Isa> {
        if self.is_available() {
            Ok(self)
        } else {
            Err(crate::Error::InvalidParam("instruction set not available on this cpu"))
        }
    }

    /// The detected instruction set capped by a `SIMDLIB_ISA` value. Unknown
    /// values are ignored with a warning.
    pub fn from_env_value(value: Option<&str>) -> Isa {
        select(Isa::detect(), value)
    }

    /// The tier whose kernels run for this instruction set. VNNI and AMX
    /// reuse the AVX-512BW kernels.
    pub fn kernel_tier(self) -> Isa {
        match self {
            Isa::Avx512vnni | Isa::AmxBf16 => Isa::Avx512bw,
            isa => isa,
        }
    }

    /// Number of `f32` (or `i32`) lanes of one vector register.
    pub fn f32_lanes(self) -> usize {
        match self.kernel_tier() {
            Isa::Base => 1,
            Isa::Sse41 | Isa::Neon => 4,
            Isa::Avx2 => 8,
            _ => 16,
        }
    }
}

#[cfg(all(feature = "nightly", target_arch = "x86_64"))]
fn has_amx_bf16() -> bool {
    // CPUID.(EAX=07H, ECX=0):EDX[22]
    #[allow(unused_unsafe)]
    let leaf = unsafe { core::arch::x86_64::__cpuid_count(7, 0) };
    leaf.edx & (1 << 22) != 0
}

impl fmt::Display for Isa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Isa {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        Isa::ALL
            .iter()
            .copied()
            .find(|isa| isa.name() == s)
            .ok_or(crate::Error::InvalidParam("unknown instruction set name"))
    }
}

fn select(detected: Isa, limit: Option<&str>) -> Isa {
    match limit.map(str::parse::<Isa>) {
        None => detected,
        Some(Ok(limit)) => {
            let isa = Isa::ALL
                .iter()
                .copied()
                .filter(|isa| *isa <= limit && *isa <= detected && isa.is_available())
                .max()
                .unwrap_or(Isa::Base);
            tracing::debug!(%detected, %limit, %isa, "instruction set limited by {}", ISA_ENV);
            isa
        }
        Some(Err(_)) => {
            tracing::warn!(
                value = limit.unwrap_or_default(),
                "ignoring unknown {} value",
                ISA_ENV
            );
            detected
        }
    }
}

pub struct IsaDeref;

impl core::ops::Deref for IsaDeref {
    type Target = Isa;

    #[inline]
    fn deref(&self) -> &Self::Target {
        static ISA: OnceCell<Isa> = OnceCell::new();
        ISA.get_or_init(|| {
            let limit = std::env::var(ISA_ENV).ok();
            let isa = Isa::from_env_value(limit.as_deref());
            tracing::debug!(%isa, tier = %isa.kernel_tier(), "selected instruction set");
            isa
        })
    }
}

/// Instruction set used by the dispatching entry points, probed once.
pub static ISA: IsaDeref = IsaDeref;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        let isa = Isa::detect();
        dbg!(isa, Isa::available());
        assert!(isa.is_available());
        assert!(Isa::Base.is_available());
        assert!(Isa::available().contains(&isa));
        assert!(Isa::available().contains(&Isa::Base));
        assert!(Isa::Base.check_available().is_ok());
    }

    #[test]
    fn test_parse() {
        for isa in Isa::ALL {
            assert_eq!(isa.name().parse::<Isa>().unwrap(), isa);
        }
        assert_eq!(" AVX2 ".parse::<Isa>().unwrap(), Isa::Avx2);
        assert!("sse9".parse::<Isa>().is_err());
    }

    #[test]
    fn test_select() {
        let detected = Isa::detect();
        assert_eq!(select(detected, None), detected);
        assert_eq!(select(detected, Some("base")), Isa::Base);
        assert_eq!(select(detected, Some("bogus")), detected);
        assert!(select(detected, Some("avx2")) <= detected);
        assert!(select(detected, Some("avx2")).is_available());
    }

    #[test]
    fn test_env_value() {
        let detected = Isa::detect();
        assert_eq!(Isa::from_env_value(None), detected);
        assert_eq!(Isa::from_env_value(Some("base")), Isa::Base);
        assert_eq!(Isa::from_env_value(Some(" BASE ")), Isa::Base);
        assert_eq!(Isa::from_env_value(Some("sse9")), detected);
        assert_eq!(Isa::from_env_value(Some("")), detected);
        for isa in Isa::ALL {
            let capped = Isa::from_env_value(Some(isa.name()));
            assert!(capped <= isa && capped <= detected);
            assert!(capped.is_available());
        }

        // the process-wide value went through the same path
        let limit = std::env::var(ISA_ENV).ok();
        assert_eq!(*ISA, Isa::from_env_value(limit.as_deref()));
    }

    #[test]
    fn test_kernel_tier() {
        assert_eq!(Isa::AmxBf16.kernel_tier(), Isa::Avx512bw);
        assert_eq!(Isa::Avx512vnni.kernel_tier(), Isa::Avx512bw);
        assert_eq!(Isa::Avx2.kernel_tier(), Isa::Avx2);
        assert_eq!(Isa::Base.f32_lanes(), 1);
        assert_eq!(Isa::Avx2.f32_lanes(), 8);
    }
}
