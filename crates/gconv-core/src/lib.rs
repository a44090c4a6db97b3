//! # gconv-core
//!
//! Shared data model for the gconv grouped-convolution engine.
//!
//! Provides:
//! - Element types (`DType`) including the 8-bit quantized tag
//! - Stack-allocated shapes for 4D NCHW tensors
//! - Reference-counted raw buffers with zero-copy views
//! - Lane-packed tensor descriptors and caller-owned packed tensors
//! - Convolution parameters and trained resources

pub mod buffer;
pub mod dtype;
pub mod error;
pub mod param;
pub mod resource;
pub mod shape;
pub mod tensor;

pub use buffer::RawBuffer;
pub use dtype::DType;
pub use error::GconvError;
pub use param::{Activation, ConvParams};
pub use resource::ConvResource;
pub use shape::Shape;
pub use tensor::{round_up, PackedTensor, PackedView, PackedViewMut, TensorDesc, DEFAULT_LANE};

pub type Result<T> = std::result::Result<T, GconvError>;
