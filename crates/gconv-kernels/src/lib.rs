//! # gconv-kernels
//!
//! CPU kernels for gconv.
//!
//! Provides:
//! - Runtime SIMD capability detection (SSE2, AVX2, NEON)
//! - Lane pack/unpack between flat channel-major and lane-packed layouts
//! - Tiled f32 GEMM with rayon row parallelism
//! - Convolution sub-kernels: 3x3, pointwise, generic im2col and quantized i8

pub mod conv;
pub mod gemm;
pub mod lane;
pub mod simd;

pub use conv::{ConvAcc, ConvImpl, ImplKind};
pub use simd::SimdCapability;
