//! # gconv-group
//!
//! Grouped convolution over lane-packed tensors.
//!
//! Provides:
//! - Per-group geometry and flattened parameters
//! - Zero-copy partitioning of trained filter/bias buffers
//! - Priority-based sub-kernel selection
//! - Split/merge transcoding between aggregate and per-group packed layouts
//! - The `GroupConv` layer with grow-only scratch arenas and optional rayon
//!   group parallelism

pub mod arena;
pub mod config;
pub mod context;
pub mod geometry;
pub mod group;
pub mod partition;
pub mod selector;
pub mod shared;
pub mod transcode;

pub use config::ExecConfig;
pub use context::ExecContext;
pub use geometry::GroupGeometry;
pub use group::{GroupConv, LayerState};
pub use shared::SharedGroupConv;
pub use transcode::Transcoder;
