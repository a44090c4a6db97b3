//! Lane packing between flat channel-major and lane-packed layouts.
//!
//! Flat layout: `[channels][plane]`.
//! Packed layout: `[ceil(channels / lane)][plane][lane]`, where the slots past
//! `channels` in the last block are padding. Packing writes zeros there;
//! unpacking never reads them.

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

/// Packed element count for `channels` channels of `plane` positions.
pub fn packed_len(channels: usize, plane: usize, lane: usize) -> usize {
    channels.div_ceil(lane) * lane * plane
}

/// Lane-packed `src` → flat channel-major `dst`.
pub fn unpack_lanes<T: Copy>(dst: &mut [T], src: &[T], plane: usize, channels: usize, lane: usize) {
    assert!(dst.len() >= channels * plane, "unpack dst too small");
    assert!(src.len() >= packed_len(channels, plane, lane), "unpack src too small");
    if channels == 0 || plane == 0 {
        return;
    }

    let block_len = plane * lane;
    for (block, src_block) in src.chunks(block_len).take(channels.div_ceil(lane)).enumerate() {
        let c0 = block * lane;
        let valid = lane.min(channels - c0);
        for l in 0..valid {
            let row = &mut dst[(c0 + l) * plane..(c0 + l + 1) * plane];
            for (p, v) in row.iter_mut().enumerate() {
                *v = src_block[p * lane + l];
            }
        }
    }
}

/// Flat channel-major `src` → lane-packed `dst`, zero-filling padding lanes.
pub fn pack_lanes<T: Copy + Default>(dst: &mut [T], src: &[T], plane: usize, channels: usize, lane: usize) {
    assert!(src.len() >= channels * plane, "pack src too small");
    assert!(dst.len() >= packed_len(channels, plane, lane), "pack dst too small");
    if channels == 0 || plane == 0 {
        return;
    }

    let block_len = plane * lane;
    for (block, dst_block) in dst.chunks_mut(block_len).take(channels.div_ceil(lane)).enumerate() {
        let c0 = block * lane;
        let valid = lane.min(channels - c0);
        for l in 0..lane {
            if l < valid {
                let row = &src[(c0 + l) * plane..(c0 + l + 1) * plane];
                for (p, &v) in row.iter().enumerate() {
                    dst_block[p * lane + l] = v;
                }
            } else {
                for p in 0..plane {
                    dst_block[p * lane + l] = T::default();
                }
            }
        }
    }
}

/// f32 unpack; lane width 4 uses NEON de-interleaving loads on aarch64.
pub fn unpack_f32(dst: &mut [f32], src: &[f32], plane: usize, channels: usize, lane: usize) {
    #[cfg(target_arch = "aarch64")]
    {
        if lane == 4 {
            neon_unpack_c4(dst, src, plane, channels);
            return;
        }
    }
    unpack_lanes(dst, src, plane, channels, lane);
}

/// f32 pack; lane width 4 uses NEON interleaving stores on aarch64.
pub fn pack_f32(dst: &mut [f32], src: &[f32], plane: usize, channels: usize, lane: usize) {
    #[cfg(target_arch = "aarch64")]
    {
        if lane == 4 {
            neon_pack_c4(dst, src, plane, channels);
            return;
        }
    }
    pack_lanes(dst, src, plane, channels, lane);
}

/// NEON unpack of full 4-channel blocks; the partial block goes scalar.
#[cfg(target_arch = "aarch64")]
fn neon_unpack_c4(dst: &mut [f32], src: &[f32], plane: usize, channels: usize) {
    assert!(dst.len() >= channels * plane, "unpack dst too small");
    assert!(src.len() >= packed_len(channels, plane, 4), "unpack src too small");

    let full = channels / 4;
    for block in 0..full {
        unsafe {
            let sp = src.as_ptr().add(block * plane * 4);
            let dp = dst.as_mut_ptr().add(block * 4 * plane);
            let mut p = 0;
            while p + 4 <= plane {
                let v = vld4q_f32(sp.add(p * 4));
                vst1q_f32(dp.add(p), v.0);
                vst1q_f32(dp.add(plane + p), v.1);
                vst1q_f32(dp.add(2 * plane + p), v.2);
                vst1q_f32(dp.add(3 * plane + p), v.3);
                p += 4;
            }
            // Scalar tail
            while p < plane {
                for l in 0..4 {
                    *dp.add(l * plane + p) = *sp.add(p * 4 + l);
                }
                p += 1;
            }
        }
    }

    let rest = channels - full * 4;
    if rest > 0 {
        unpack_lanes(
            &mut dst[full * 4 * plane..],
            &src[full * plane * 4..],
            plane,
            rest,
            4,
        );
    }
}

/// NEON pack of full 4-channel blocks; the partial block goes scalar.
#[cfg(target_arch = "aarch64")]
fn neon_pack_c4(dst: &mut [f32], src: &[f32], plane: usize, channels: usize) {
    assert!(src.len() >= channels * plane, "pack src too small");
    assert!(dst.len() >= packed_len(channels, plane, 4), "pack dst too small");

    let full = channels / 4;
    for block in 0..full {
        unsafe {
            let sp = src.as_ptr().add(block * 4 * plane);
            let dp = dst.as_mut_ptr().add(block * plane * 4);
            let mut p = 0;
            while p + 4 <= plane {
                let v = float32x4x4_t(
                    vld1q_f32(sp.add(p)),
                    vld1q_f32(sp.add(plane + p)),
                    vld1q_f32(sp.add(2 * plane + p)),
                    vld1q_f32(sp.add(3 * plane + p)),
                );
                vst4q_f32(dp.add(p * 4), v);
                p += 4;
            }
            // Scalar tail
            while p < plane {
                for l in 0..4 {
                    *dp.add(p * 4 + l) = *sp.add(l * plane + p);
                }
                p += 1;
            }
        }
    }

    let rest = channels - full * 4;
    if rest > 0 {
        pack_lanes(
            &mut dst[full * plane * 4..],
            &src[full * 4 * plane..],
            plane,
            rest,
            4,
        );
    }
}
