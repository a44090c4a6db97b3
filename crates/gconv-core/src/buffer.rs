use std::sync::Arc;

use crate::{DType, GconvError, Result};

/// Reference-counted byte buffer holding trained weights.
///
/// A buffer is either a whole allocation or a view (`offset`, `len`) into
/// the allocation of another buffer. Views share the parent's `Arc`, so
/// taking one never copies bytes and the storage lives as long as any
/// holder does. Views are read-only; writing through the parent after views
/// were taken clones the parent's bytes first (copy-on-write), so a view
/// never observes the write.
#[derive(Debug, Clone)]
pub struct RawBuffer {
    data: Arc<Vec<u8>>,
    offset: usize,
    len: usize,
    dtype: DType,
}

impl RawBuffer {
    /// Allocate a zero-filled buffer for `numel` elements.
    pub fn zeros(dtype: DType, numel: usize) -> Self {
        let bytes = vec![0u8; dtype.storage_bytes(numel)];
        Self::whole(dtype, bytes)
    }

    /// Wrap raw bytes. The length must be a whole number of elements.
    pub fn from_bytes(dtype: DType, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() % dtype.element_size() != 0 {
            return Err(GconvError::StorageError(format!(
                "{} bytes is not a whole number of {} elements",
                bytes.len(),
                dtype
            )));
        }
        Ok(Self::whole(dtype, bytes))
    }

    /// Create a buffer from f32 values.
    pub fn from_f32(data: &[f32]) -> Self {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_ne_bytes()).collect();
        Self::whole(DType::F32, bytes)
    }

    /// Create a buffer from i8 values.
    pub fn from_i8(data: &[i8]) -> Self {
        let bytes: Vec<u8> = data.iter().map(|&v| v as u8).collect();
        Self::whole(DType::I8, bytes)
    }

    /// Create a buffer from i32 values.
    pub fn from_i32(data: &[i32]) -> Self {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_ne_bytes()).collect();
        Self::whole(DType::I32, bytes)
    }

    fn whole(dtype: DType, bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self {
            data: Arc::new(bytes),
            offset: 0,
            len,
            dtype,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Size of this buffer (or view) in bytes.
    pub fn bytes_size(&self) -> usize {
        self.len
    }

    /// Number of elements in this buffer (or view).
    pub fn numel(&self) -> usize {
        self.len / self.dtype.element_size()
    }

    /// Byte offset into the shared allocation.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether this buffer covers only part of its allocation.
    pub fn is_view(&self) -> bool {
        self.offset != 0 || self.len != self.data.len()
    }

    /// Whether both buffers alias the same allocation.
    pub fn shares_storage(&self, other: &RawBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.len]
    }

    /// Mutable access to the bytes of a whole buffer.
    ///
    /// Clones the allocation if views of it are alive. Views themselves are
    /// read-only and return an error.
    pub fn as_bytes_mut(&mut self) -> Result<&mut [u8]> {
        if self.is_view() {
            return Err(GconvError::StorageError(
                "cannot write through a buffer view".into(),
            ));
        }
        Ok(Arc::make_mut(&mut self.data).as_mut_slice())
    }

    /// Interpret the buffer as f32 values.
    /// Returns None if dtype is not F32 or the bytes are misaligned.
    pub fn as_f32_slice(&self) -> Option<&[f32]> {
        if self.dtype != DType::F32 {
            return None;
        }
        bytemuck::try_cast_slice(self.as_bytes()).ok()
    }

    /// Interpret the buffer as i8 values.
    pub fn as_i8_slice(&self) -> Option<&[i8]> {
        if self.dtype != DType::I8 {
            return None;
        }
        Some(bytemuck::cast_slice(self.as_bytes()))
    }

    /// Interpret the buffer as i32 values.
    pub fn as_i32_slice(&self) -> Option<&[i32]> {
        if self.dtype != DType::I32 {
            return None;
        }
        bytemuck::try_cast_slice(self.as_bytes()).ok()
    }

    /// Zero-copy view of `len` bytes starting `offset` bytes into this buffer.
    pub fn view(&self, offset: usize, len: usize) -> Result<RawBuffer> {
        let end = offset.checked_add(len).ok_or_else(|| {
            GconvError::StorageError("view range overflows".into())
        })?;
        if end > self.len {
            return Err(GconvError::StorageError(format!(
                "view {}..{} exceeds buffer of {} bytes",
                offset, end, self.len
            )));
        }
        let elem = self.dtype.element_size();
        if offset % elem != 0 || len % elem != 0 {
            return Err(GconvError::StorageError(format!(
                "view {}..{} splits a {} element",
                offset, end, self.dtype
            )));
        }
        Ok(Self {
            data: Arc::clone(&self.data),
            offset: self.offset + offset,
            len,
            dtype: self.dtype,
        })
    }
}
