//! Execution context handed to layers at `init`.

use gconv_core::{DType, PackedTensor, Result, TensorDesc};
use gconv_kernels::SimdCapability;

use crate::config::ExecConfig;

/// Execution settings plus the host's SIMD capabilities.
#[derive(Debug, Clone)]
pub struct ExecContext {
    config: ExecConfig,
    simd: SimdCapability,
}

impl ExecContext {
    pub fn new(config: ExecConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            simd: *SimdCapability::detect(),
        })
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub fn lane_width(&self) -> usize {
        self.config.lane_width
    }

    pub fn simd(&self) -> &SimdCapability {
        &self.simd
    }

    /// Descriptor for an NCHW tensor packed with this context's lane width.
    pub fn desc(&self, dims: [usize; 4], dtype: DType) -> Result<TensorDesc> {
        TensorDesc::new(dims, dtype, self.config.lane_width)
    }

    /// Allocate a zeroed lane-packed tensor.
    pub fn alloc_packed(&self, dims: [usize; 4], dtype: DType) -> Result<PackedTensor> {
        Ok(PackedTensor::zeros(self.desc(dims, dtype)?))
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self {
            config: ExecConfig::default(),
            simd: *SimdCapability::detect(),
        }
    }
}
