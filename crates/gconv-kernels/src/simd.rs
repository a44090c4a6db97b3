//! Runtime SIMD capability detection.
//!
//! The lane-packed layout is sized for 128-bit registers (4 x f32), which
//! every tier below provides; wider tiers only change inner-loop speed.

use std::sync::OnceLock;

/// SIMD capabilities detected at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimdCapability {
    pub sse2: bool,
    pub avx2: bool,
    pub fma: bool,
    pub neon: bool,
}

static DETECTED: OnceLock<SimdCapability> = OnceLock::new();

impl SimdCapability {
    /// Detect SIMD capabilities for the current CPU.
    pub fn detect() -> &'static SimdCapability {
        DETECTED.get_or_init(|| {
            #[cfg(target_arch = "x86_64")]
            {
                SimdCapability {
                    sse2: is_x86_feature_detected!("sse2"),
                    avx2: is_x86_feature_detected!("avx2"),
                    fma: is_x86_feature_detected!("fma"),
                    neon: false,
                }
            }

            #[cfg(target_arch = "aarch64")]
            {
                SimdCapability {
                    sse2: false,
                    avx2: false,
                    fma: true,
                    neon: true, // NEON is mandatory on AArch64
                }
            }

            #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
            {
                SimdCapability {
                    sse2: false,
                    avx2: false,
                    fma: false,
                    neon: false,
                }
            }
        })
    }

    /// Best available SIMD tier as a human-readable string.
    pub fn best_tier(&self) -> &'static str {
        if self.avx2 {
            "AVX2"
        } else if self.neon {
            "NEON"
        } else if self.sse2 {
            "SSE2"
        } else {
            "scalar"
        }
    }

    /// Number of f32 values in the widest available vector register.
    pub fn f32_lanes(&self) -> usize {
        if self.avx2 {
            8
        } else if self.neon || self.sse2 {
            4
        } else {
            1
        }
    }

    /// Whether any SIMD is available.
    pub fn has_simd(&self) -> bool {
        self.sse2 || self.avx2 || self.neon
    }
}
