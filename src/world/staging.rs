//! Shared triangle staging: one append buffer reused by every chunk.
//!
//! Usage is an explicit `acquire -> dispatch -> drain -> release` cycle so a
//! second chunk can never march into the buffer while an earlier chunk's
//! vertices are still unread.

use crate::compute::{ComputeBackend, TriangleBufferId, Vertex};
use crate::core::error::Error;
use crate::core::types::Result;

/// Triangle append buffer plus a host-side vertex scratch list
#[derive(Debug)]
pub struct TriangleStaging {
    buffer: Option<TriangleBufferId>,
    max_triangles: u32,
    in_use: bool,
    vertices: Vec<Vertex>,
}

impl TriangleStaging {
    pub fn new<B: ComputeBackend>(backend: &mut B, max_triangles: u32) -> Result<Self> {
        let buffer = backend.create_triangle_buffer(max_triangles, "triangle_staging")?;
        Ok(Self {
            buffer: Some(buffer),
            max_triangles,
            in_use: false,
            vertices: Vec::new(),
        })
    }

    pub fn max_triangles(&self) -> u32 {
        self.max_triangles
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    /// Claim the buffer and zero its counter
    pub fn acquire<B: ComputeBackend>(&mut self, backend: &mut B) -> Result<TriangleBufferId> {
        let buffer = self
            .buffer
            .ok_or_else(|| Error::Resource("Triangle staging has been destroyed".to_string()))?;
        if self.in_use {
            return Err(Error::Resource("Triangle staging is already acquired".to_string()));
        }
        backend.reset_counter(buffer)?;
        self.in_use = true;
        Ok(buffer)
    }

    /// Read back the appended triangles; returns the triangle count.
    ///
    /// A count above capacity means the kernel dropped triangles. It is
    /// clamped and reported, never used to over-read the buffer.
    pub fn drain<B: ComputeBackend>(&mut self, backend: &mut B) -> Result<u32> {
        let buffer = match (self.buffer, self.in_use) {
            (Some(buffer), true) => buffer,
            _ => return Err(Error::Resource("Triangle staging drained without acquire".to_string())),
        };

        backend.wait_idle()?;
        let reported = backend.read_triangle_count(buffer)?;
        let count = if reported > self.max_triangles {
            log::error!(
                "Triangle count {} exceeds staging capacity {}; clamping",
                reported,
                self.max_triangles
            );
            self.max_triangles
        } else {
            reported
        };

        backend.read_vertices(buffer, count * 3, &mut self.vertices)?;
        Ok(count)
    }

    /// Vertices read by the last [`drain`](Self::drain)
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    /// Give the buffer back for the next chunk
    pub fn release(&mut self) {
        self.in_use = false;
    }

    /// Free the backend buffer. Safe to call more than once.
    pub fn destroy<B: ComputeBackend>(&mut self, backend: &mut B) {
        if let Some(buffer) = self.buffer.take() {
            backend.release_triangle_buffer(buffer);
        }
        self.in_use = false;
        self.vertices = Vec::new();
    }
}
