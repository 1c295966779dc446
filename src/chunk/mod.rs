//! Terrain chunks: one cubical slice of the density volume and its mesh.

pub mod mesh;

pub use mesh::ChunkMesh;

use crate::compute::Vertex;
use crate::core::error::Error;
use crate::core::types::{Result, UVec3, Vec3};
use crate::math::Aabb;

/// Integer chunk coordinate in `[0, num_chunks)` on each axis
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkCoord {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl ChunkCoord {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Index in the world's chunk list (y-major, then x, then z)
    pub fn index(&self, num_chunks: u32) -> usize {
        ((self.y * num_chunks + self.x) * num_chunks + self.z) as usize
    }

    /// Inverse of [`index`](Self::index)
    pub fn from_index(index: usize, num_chunks: u32) -> Self {
        let n = num_chunks as usize;
        Self {
            z: (index % n) as u32,
            x: (index / n % n) as u32,
            y: (index / (n * n)) as u32,
        }
    }

    pub fn as_uvec3(&self) -> UVec3 {
        UVec3::new(self.x, self.y, self.z)
    }

    /// First sample of this chunk in the density volume
    pub fn sample_origin(&self, num_points_per_axis: u32) -> UVec3 {
        self.as_uvec3() * (num_points_per_axis - 1)
    }
}

/// Where a chunk is in its regeneration cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkState {
    /// Ready for a new regeneration
    Idle,
    /// March kernel submitted
    Dispatching,
    /// Waiting on triangle count and vertex readback
    ReadingBack,
    /// Mesh replaced, cycle not yet closed
    Meshed,
}

/// One chunk of terrain
#[derive(Debug)]
pub struct Chunk {
    pub coord: ChunkCoord,
    /// World-space center
    pub center: Vec3,
    /// World-space side length
    pub size: f32,
    mesh: ChunkMesh,
    state: ChunkState,
    generation: u64,
}

impl Chunk {
    pub fn new(coord: ChunkCoord, center: Vec3, size: f32) -> Self {
        Self {
            coord,
            center,
            size,
            mesh: ChunkMesh::default(),
            state: ChunkState::Idle,
            generation: 0,
        }
    }

    /// World-space bounding cube
    pub fn bounds(&self) -> Aabb {
        Aabb::cube(self.center, self.size)
    }

    pub fn mesh(&self) -> &ChunkMesh {
        &self.mesh
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    /// Number of times the mesh has been replaced
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Enter `Dispatching`. Fails unless the chunk is idle.
    pub fn begin_regeneration(&mut self) -> Result<()> {
        if self.state != ChunkState::Idle {
            return Err(Error::Chunk(format!(
                "Chunk {:?} cannot start regenerating while {:?}",
                self.coord, self.state
            )));
        }
        self.state = ChunkState::Dispatching;
        Ok(())
    }

    /// Enter `ReadingBack` after the march dispatch completed
    pub fn begin_readback(&mut self) -> Result<()> {
        if self.state != ChunkState::Dispatching {
            return Err(Error::Chunk(format!(
                "Chunk {:?} cannot read back while {:?}",
                self.coord, self.state
            )));
        }
        self.state = ChunkState::ReadingBack;
        Ok(())
    }

    /// Replace the mesh with the first `vertex_count` vertices of `vertices`
    pub fn create_mesh(&mut self, vertices: &[Vertex], vertex_count: usize, flat_shading: bool) {
        let count = vertex_count.min(vertices.len());
        self.mesh = ChunkMesh::from_vertices(&vertices[..count], flat_shading);
        self.generation += 1;
        if self.state == ChunkState::ReadingBack {
            self.state = ChunkState::Meshed;
        }
    }

    /// Close the regeneration cycle, whatever stage it reached
    pub fn finish(&mut self) {
        self.state = ChunkState::Idle;
    }

    /// Drop the geometry. Safe to call more than once.
    pub fn release(&mut self) {
        self.mesh = ChunkMesh::default();
        self.state = ChunkState::Idle;
    }
}
