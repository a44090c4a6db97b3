//! # gconv
//!
//! Grouped convolution over SIMD lane-packed tensors.
//!
//! Re-exports the workspace crates:
//! - `core`: dtypes, shapes, buffers, packed tensors, parameters, errors
//! - `kernels`: SIMD detection, lane packing, GEMM and convolution sub-kernels
//! - `group`: the grouped convolution layer and its planning pieces

pub use gconv_core as core;
pub use gconv_group as group;
pub use gconv_kernels as kernels;

pub use gconv_core::{
    Activation, ConvParams, ConvResource, DType, GconvError, PackedTensor, RawBuffer, Result, TensorDesc,
};
pub use gconv_group::{ExecConfig, ExecContext, GroupConv, LayerState, SharedGroupConv};
pub use gconv_kernels::{ImplKind, SimdCapability};
