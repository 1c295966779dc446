//! Chunk invalidation tracking for edited regions.

use std::collections::BTreeSet;

use crate::core::types::Vec3;
use crate::math::Aabb;

/// Tracks which chunks need a mesh rebuild after edits.
///
/// Chunks are addressed by their index in the world's chunk list. Every
/// time a chunk is marked its generation counter is bumped, so callers can
/// tell how often a chunk has been invalidated.
#[derive(Debug)]
pub struct ChunkInvalidator {
    /// Chunks needing rebuild, kept sorted for deterministic rebuild order
    dirty: BTreeSet<usize>,
    /// Invalidation counters, one per chunk
    generations: Vec<u32>,
}

impl ChunkInvalidator {
    /// Create an invalidator for `chunk_count` chunks.
    pub fn new(chunk_count: usize) -> Self {
        Self {
            dirty: BTreeSet::new(),
            generations: vec![0; chunk_count],
        }
    }

    /// Mark every chunk whose bounds touch the sphere (boundary inclusive).
    ///
    /// Returns the number of chunks newly or repeatedly marked.
    pub fn mark_sphere(
        &mut self,
        bounds: impl IntoIterator<Item = (usize, Aabb)>,
        center: Vec3,
        radius: f32,
    ) -> usize {
        let mut marked = 0;
        for (index, aabb) in bounds {
            if aabb.intersects_sphere(center, radius) {
                self.mark_chunk_dirty(index);
                marked += 1;
            }
        }
        marked
    }

    /// Mark a specific chunk as dirty and increment its generation.
    pub fn mark_chunk_dirty(&mut self, index: usize) {
        if let Some(generation) = self.generations.get_mut(index) {
            self.dirty.insert(index);
            *generation = generation.wrapping_add(1);
        }
    }

    /// Mark every chunk dirty.
    pub fn mark_all(&mut self) {
        for index in 0..self.generations.len() {
            self.mark_chunk_dirty(index);
        }
    }

    /// Take all dirty chunks in ascending index order and clear the dirty set.
    pub fn take_dirty(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    /// Get the invalidation count for a chunk.
    pub fn generation(&self, index: usize) -> u32 {
        self.generations.get(index).copied().unwrap_or(0)
    }
}
