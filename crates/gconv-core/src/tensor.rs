//! Lane-packed tensor descriptors and storage.
//!
//! Layout: per batch, channels are grouped into blocks of `lane` channels;
//! each block stores the spatial plane with the `lane` channel values of a
//! position adjacent (NC/lane·HW·lane). Channel slots past the true channel
//! count in the last block are padding and carry no data.

use crate::{DType, GconvError, Result, Shape};

/// Lane width of the 128-bit f32x4 registers the layout is built around.
pub const DEFAULT_LANE: usize = 4;

/// Round `n` up to the next multiple of `multiple`.
pub fn round_up(n: usize, multiple: usize) -> usize {
    n.div_ceil(multiple) * multiple
}

/// Shape, element type and lane width of an NCHW lane-packed tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDesc {
    shape: Shape,
    dtype: DType,
    lane: usize,
}

impl TensorDesc {
    /// Describe a `[batch, channels, height, width]` tensor.
    ///
    /// Every dimension and the lane width must be non-zero.
    pub fn new(dims: [usize; 4], dtype: DType, lane: usize) -> Result<Self> {
        if lane == 0 {
            return Err(GconvError::InvalidParam("lane width must be non-zero".into()));
        }
        if dims.iter().any(|&d| d == 0) {
            return Err(GconvError::InvalidParam(format!(
                "tensor dims must be non-zero, got {dims:?}"
            )));
        }
        Ok(Self {
            shape: Shape::from(dims),
            dtype,
            lane,
        })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn lane(&self) -> usize {
        self.lane
    }

    pub fn batch(&self) -> usize {
        self.dims()[0]
    }

    pub fn channels(&self) -> usize {
        self.dims()[1]
    }

    pub fn height(&self) -> usize {
        self.dims()[2]
    }

    pub fn width(&self) -> usize {
        self.dims()[3]
    }

    /// Spatial positions per channel (`height * width`).
    pub fn plane(&self) -> usize {
        self.shape.count(2, 4)
    }

    /// Channel slots including lane padding.
    pub fn packed_channels(&self) -> usize {
        round_up(self.channels(), self.lane)
    }

    /// Element slots per batch, padding included.
    pub fn packed_count_per_batch(&self) -> usize {
        self.packed_channels() * self.plane()
    }

    /// Element slots of the whole tensor, padding included.
    pub fn packed_count(&self) -> usize {
        self.batch() * self.packed_count_per_batch()
    }

    /// Bytes of lane-packed storage for the whole tensor.
    pub fn packed_bytes(&self) -> usize {
        self.dtype.storage_bytes(self.packed_count())
    }

    /// Same descriptor with a different channel count.
    pub fn with_channels(&self, channels: usize) -> Result<Self> {
        let d = self.dims();
        Self::new([d[0], channels, d[2], d[3]], self.dtype, self.lane)
    }
}

/// Caller-owned lane-packed tensor.
#[derive(Debug, Clone)]
pub struct PackedTensor {
    desc: TensorDesc,
    data: Vec<u8>,
}

impl PackedTensor {
    /// Allocate zero-filled packed storage for `desc`.
    pub fn zeros(desc: TensorDesc) -> Self {
        let data = vec![0u8; desc.packed_bytes()];
        Self { desc, data }
    }

    /// Wrap already lane-packed bytes.
    pub fn from_packed(desc: TensorDesc, data: Vec<u8>) -> Result<Self> {
        if data.len() != desc.packed_bytes() {
            return Err(GconvError::StorageError(format!(
                "expected {} packed bytes for {}, got {}",
                desc.packed_bytes(),
                desc.shape(),
                data.len()
            )));
        }
        Ok(Self { desc, data })
    }

    /// Wrap already lane-packed f32 values.
    pub fn from_packed_f32(desc: TensorDesc, values: &[f32]) -> Result<Self> {
        if desc.dtype() != DType::F32 {
            return Err(GconvError::UnsupportedDType(desc.dtype()));
        }
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        Self::from_packed(desc, bytes)
    }

    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Interpret storage as packed f32 values.
    pub fn as_f32_slice(&self) -> Option<&[f32]> {
        if self.desc.dtype() != DType::F32 {
            return None;
        }
        bytemuck::try_cast_slice(self.data.as_slice()).ok()
    }

    pub fn as_f32_slice_mut(&mut self) -> Option<&mut [f32]> {
        if self.desc.dtype() != DType::F32 {
            return None;
        }
        bytemuck::try_cast_slice_mut(self.data.as_mut_slice()).ok()
    }

    pub fn view(&self) -> PackedView<'_> {
        PackedView {
            desc: &self.desc,
            data: &self.data,
        }
    }

    pub fn view_mut(&mut self) -> PackedViewMut<'_> {
        PackedViewMut {
            desc: &self.desc,
            data: &mut self.data,
        }
    }
}

/// Borrowed read-only packed tensor, either caller storage or a scratch slot.
#[derive(Debug, Clone, Copy)]
pub struct PackedView<'a> {
    desc: &'a TensorDesc,
    data: &'a [u8],
}

impl<'a> PackedView<'a> {
    pub fn new(desc: &'a TensorDesc, data: &'a [u8]) -> Result<Self> {
        check_len(desc, data.len())?;
        Ok(Self { desc, data })
    }

    pub fn desc(&self) -> &'a TensorDesc {
        self.desc
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Packed f32 values, or an error for other dtypes.
    pub fn as_f32(&self) -> Result<&'a [f32]> {
        if self.desc.dtype() != DType::F32 {
            return Err(GconvError::UnsupportedDType(self.desc.dtype()));
        }
        bytemuck::try_cast_slice(self.data)
            .map_err(|e| GconvError::StorageError(format!("f32 view: {e}")))
    }

    /// Packed i8 values, or an error for other dtypes.
    pub fn as_i8(&self) -> Result<&'a [i8]> {
        if self.desc.dtype() != DType::I8 {
            return Err(GconvError::UnsupportedDType(self.desc.dtype()));
        }
        Ok(bytemuck::cast_slice(self.data))
    }
}

/// Borrowed writable packed tensor.
#[derive(Debug)]
pub struct PackedViewMut<'a> {
    desc: &'a TensorDesc,
    data: &'a mut [u8],
}

impl<'a> PackedViewMut<'a> {
    pub fn new(desc: &'a TensorDesc, data: &'a mut [u8]) -> Result<Self> {
        check_len(desc, data.len())?;
        Ok(Self { desc, data })
    }

    pub fn desc(&self) -> &'a TensorDesc {
        self.desc
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    pub fn as_f32_mut(&mut self) -> Result<&mut [f32]> {
        if self.desc.dtype() != DType::F32 {
            return Err(GconvError::UnsupportedDType(self.desc.dtype()));
        }
        bytemuck::try_cast_slice_mut(&mut *self.data)
            .map_err(|e| GconvError::StorageError(format!("f32 view: {e}")))
    }

    pub fn as_i8_mut(&mut self) -> Result<&mut [i8]> {
        if self.desc.dtype() != DType::I8 {
            return Err(GconvError::UnsupportedDType(self.desc.dtype()));
        }
        Ok(bytemuck::cast_slice_mut(&mut *self.data))
    }
}

fn check_len(desc: &TensorDesc, len: usize) -> Result<()> {
    if len != desc.packed_bytes() {
        return Err(GconvError::StorageError(format!(
            "packed view of {} needs {} bytes, got {}",
            desc.shape(),
            desc.packed_bytes(),
            len
        )));
    }
    Ok(())
}
