//! Grow-only scratch arena owned by one layer.
//!
//! The arena keeps a single 16-byte aligned allocation and hands out the
//! first `n` bytes of it. Requests that fit reuse the allocation; larger
//! requests grow it. It never shrinks, so steady-state forwards allocate
//! nothing.

use bytemuck::{Pod, Zeroable};
use tracing::debug;

const ARENA_ALIGN: usize = 16;

#[repr(C, align(16))]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Chunk([u8; ARENA_ALIGN]);

/// Reusable scratch storage.
pub struct Arena {
    name: &'static str,
    chunks: Vec<Chunk>,
    grows: usize,
}

impl Arena {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            chunks: Vec::new(),
            grows: 0,
        }
    }

    /// Borrow `nbytes` of scratch, growing the arena if needed.
    ///
    /// Bytes keep whatever the previous user left in them.
    pub fn reserve(&mut self, nbytes: usize) -> &mut [u8] {
        let needed = align_up(nbytes, ARENA_ALIGN) / ARENA_ALIGN;
        if needed > self.chunks.len() {
            debug!(
                arena = self.name,
                from = self.capacity(),
                to = needed * ARENA_ALIGN,
                "growing scratch arena"
            );
            self.chunks.resize(needed, Chunk::zeroed());
            self.grows += 1;
        }
        &mut bytemuck::cast_slice_mut::<Chunk, u8>(&mut self.chunks)[..nbytes]
    }

    /// First `nbytes` of the arena, read-only.
    ///
    /// Panics if `nbytes` exceeds the capacity; callers reserve first.
    pub fn bytes(&self, nbytes: usize) -> &[u8] {
        &bytemuck::cast_slice::<Chunk, u8>(&self.chunks)[..nbytes]
    }

    /// Allocated bytes.
    pub fn capacity(&self) -> usize {
        self.chunks.len() * ARENA_ALIGN
    }

    /// Number of times the arena had to grow.
    pub fn grows(&self) -> usize {
        self.grows
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("name", &self.name)
            .field("capacity", &self.capacity())
            .field("grows", &self.grows)
            .finish()
    }
}

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}
