//! Lane-packed layout transcoding between an aggregate tensor and per-group
//! slots.
//!
//! Group channel boundaries rarely line up with lane boundaries of the
//! aggregate packing, and every group pads to the lane width on its own, so
//! each batch goes through a flat channel-major staging buffer: unpack the
//! aggregate batch, then re-pack each group's channel run (or the inverse).
//!
//! Group slots are laid out back to back: slot `g` starts at
//! `g * group_desc.packed_bytes()` and holds all batches of group `g`.

use bytemuck::Pod;
use tracing::trace;

use gconv_core::{DType, GconvError, PackedView, PackedViewMut, Result, TensorDesc};
use gconv_kernels::lane;

use crate::arena::Arena;

type LaneFn<T> = fn(&mut [T], &[T], usize, usize, usize);

/// Splits and merges lane-packed tensors, reusing one staging buffer.
#[derive(Debug)]
pub struct Transcoder {
    staging: Arena,
}

impl Default for Transcoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcoder {
    pub fn new() -> Self {
        Self {
            staging: Arena::new("transcode staging"),
        }
    }

    /// Bytes held by the staging buffer.
    pub fn staging_bytes(&self) -> usize {
        self.staging.capacity()
    }

    /// Scatter `src` into `group` slots of `group_desc` in `dst`.
    pub fn split(&mut self, src: PackedView<'_>, group_desc: &TensorDesc, group: usize, dst: &mut [u8]) -> Result<()> {
        let agg = src.desc();
        check_layout(agg, group_desc, group, dst.len())?;
        trace!(group, channels = agg.channels(), dtype = %agg.dtype(), "split");
        match agg.dtype() {
            DType::F32 => {
                let staging = self.staging.reserve(agg.dtype().storage_bytes(agg.channels() * agg.plane()));
                split_typed::<f32>(src.as_bytes(), dst, staging, agg, group_desc, group, lane::unpack_f32, lane::pack_f32)
            }
            DType::F16 | DType::BF16 => {
                let staging = self.staging.reserve(agg.dtype().storage_bytes(agg.channels() * agg.plane()));
                split_typed::<u16>(src.as_bytes(), dst, staging, agg, group_desc, group, lane::unpack_lanes, lane::pack_lanes)
            }
            other => Err(unsupported("split", other)),
        }
    }

    /// Gather `group` slots of `group_desc` from `src` into `dst`.
    pub fn merge(&mut self, src: &[u8], group_desc: &TensorDesc, group: usize, mut dst: PackedViewMut<'_>) -> Result<()> {
        let agg = dst.desc();
        check_layout(agg, group_desc, group, src.len())?;
        trace!(group, channels = agg.channels(), dtype = %agg.dtype(), "merge");
        match agg.dtype() {
            DType::F32 => {
                let staging = self.staging.reserve(agg.dtype().storage_bytes(agg.channels() * agg.plane()));
                merge_typed::<f32>(src, dst.as_bytes_mut(), staging, agg, group_desc, group, lane::unpack_f32, lane::pack_f32)
            }
            DType::F16 | DType::BF16 => {
                let staging = self.staging.reserve(agg.dtype().storage_bytes(agg.channels() * agg.plane()));
                merge_typed::<u16>(src, dst.as_bytes_mut(), staging, agg, group_desc, group, lane::unpack_lanes, lane::pack_lanes)
            }
            other => Err(unsupported("merge", other)),
        }
    }
}

fn unsupported(op: &str, dtype: DType) -> GconvError {
    if dtype.is_quantized() {
        return GconvError::Unsupported(format!("{op} int8 tensor not supported"));
    }
    GconvError::Unsupported(format!("{op} {dtype} tensor not supported"))
}

/// Check that `group_desc` is a `1 / group` channel slice of `agg` and that
/// the slot buffer has room for exactly `group` slots.
fn check_layout(agg: &TensorDesc, group_desc: &TensorDesc, group: usize, slots_len: usize) -> Result<()> {
    if group == 0 {
        return Err(GconvError::InvalidParam("group must be >= 1".into()));
    }
    let mut expected = agg.dims().to_vec();
    expected[1] = group_desc.channels() * group;
    if group_desc.dtype() != agg.dtype()
        || group_desc.lane() != agg.lane()
        || group_desc.batch() != agg.batch()
        || group_desc.plane() != agg.plane()
        || expected[1] != agg.channels()
    {
        expected[1] = agg.channels();
        let mut got = group_desc.dims().to_vec();
        got[1] *= group;
        return Err(GconvError::ShapeMismatch { expected, got });
    }
    if slots_len != group * group_desc.packed_bytes() {
        return Err(GconvError::StorageError(format!(
            "{group} group slots need {} bytes, got {slots_len}",
            group * group_desc.packed_bytes()
        )));
    }
    Ok(())
}

fn cast<T: Pod>(bytes: &[u8]) -> Result<&[T]> {
    bytemuck::try_cast_slice(bytes).map_err(|e| GconvError::StorageError(format!("lane cast: {e}")))
}

fn cast_mut<T: Pod>(bytes: &mut [u8]) -> Result<&mut [T]> {
    bytemuck::try_cast_slice_mut(bytes).map_err(|e| GconvError::StorageError(format!("lane cast: {e}")))
}

#[allow(clippy::too_many_arguments)]
fn split_typed<T: Pod>(
    src: &[u8],
    dst: &mut [u8],
    staging: &mut [u8],
    agg: &TensorDesc,
    group_desc: &TensorDesc,
    group: usize,
    unpack: LaneFn<T>,
    pack: LaneFn<T>,
) -> Result<()> {
    let src = cast::<T>(src)?;
    let dst = cast_mut::<T>(dst)?;
    let staging = cast_mut::<T>(staging)?;

    let (plane, lane_w) = (agg.plane(), agg.lane());
    let cg = group_desc.channels();
    let agg_pb = agg.packed_count_per_batch();
    let grp_pb = group_desc.packed_count_per_batch();
    let slot = group_desc.packed_count();

    for b in 0..agg.batch() {
        unpack(staging, &src[b * agg_pb..(b + 1) * agg_pb], plane, agg.channels(), lane_w);
        for g in 0..group {
            let out = &mut dst[g * slot + b * grp_pb..g * slot + (b + 1) * grp_pb];
            pack(out, &staging[g * cg * plane..(g + 1) * cg * plane], plane, cg, lane_w);
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn merge_typed<T: Pod>(
    src: &[u8],
    dst: &mut [u8],
    staging: &mut [u8],
    agg: &TensorDesc,
    group_desc: &TensorDesc,
    group: usize,
    unpack: LaneFn<T>,
    pack: LaneFn<T>,
) -> Result<()> {
    let src = cast::<T>(src)?;
    let dst = cast_mut::<T>(dst)?;
    let staging = cast_mut::<T>(staging)?;

    let (plane, lane_w) = (agg.plane(), agg.lane());
    let cg = group_desc.channels();
    let agg_pb = agg.packed_count_per_batch();
    let grp_pb = group_desc.packed_count_per_batch();
    let slot = group_desc.packed_count();

    for b in 0..agg.batch() {
        for g in 0..group {
            let run = &src[g * slot + b * grp_pb..g * slot + (b + 1) * grp_pb];
            unpack(&mut staging[g * cg * plane..(g + 1) * cg * plane], run, plane, cg, lane_w);
        }
        pack(&mut dst[b * agg_pb..(b + 1) * agg_pb], staging, plane, agg.channels(), lane_w);
    }
    Ok(())
}
