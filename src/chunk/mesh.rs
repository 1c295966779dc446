//! Indexed triangle mesh built from a march kernel vertex stream

use std::collections::HashMap;

use crate::compute::Vertex;
use crate::core::types::Vec3;

/// CPU-side chunk geometry
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkMesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl ChunkMesh {
    /// Build a mesh from whole triangles of `vertices`.
    ///
    /// Smooth meshes share one vertex per cell edge. Flat meshes give every
    /// triangle three fresh vertices carrying its face normal.
    pub fn from_vertices(vertices: &[Vertex], flat_shading: bool) -> Self {
        let whole = vertices.len() - vertices.len() % 3;
        let vertices = &vertices[..whole];
        if flat_shading {
            Self::flat(vertices)
        } else {
            Self::smooth(vertices)
        }
    }

    fn smooth(vertices: &[Vertex]) -> Self {
        let mut mesh = Self::with_capacity(vertices.len() / 2, vertices.len());
        let mut welded: HashMap<[u32; 2], u32> = HashMap::with_capacity(vertices.len() / 2);

        for v in vertices {
            let index = *welded.entry(v.edge).or_insert_with(|| {
                mesh.positions.push(v.position());
                mesh.normals.push(v.normal());
                mesh.positions.len() as u32 - 1
            });
            mesh.indices.push(index);
        }
        mesh
    }

    fn flat(vertices: &[Vertex]) -> Self {
        let mut mesh = Self::with_capacity(vertices.len(), vertices.len());

        for tri in vertices.chunks_exact(3) {
            let [a, b, c] = [tri[0].position(), tri[1].position(), tri[2].position()];
            let mut face = (b - a).cross(c - a).normalize_or_zero();
            // Orient along the density gradient so winding doesn't matter
            let gradient = tri[0].normal() + tri[1].normal() + tri[2].normal();
            if face.dot(gradient) < 0.0 {
                face = -face;
            }

            for v in tri {
                let normal = if face == Vec3::ZERO { v.normal() } else { face };
                mesh.indices.push(mesh.positions.len() as u32);
                mesh.positions.push(v.position());
                mesh.normals.push(normal);
            }
        }
        mesh
    }

    fn with_capacity(vertices: usize, indices: usize) -> Self {
        Self {
            positions: Vec::with_capacity(vertices),
            normals: Vec::with_capacity(vertices),
            indices: Vec::with_capacity(indices),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(position: [f32; 3], normal: [f32; 3], edge: [u32; 2]) -> Vertex {
        Vertex { position, normal, edge }
    }

    /// Two triangles sharing the edge between keys 1 and 2
    fn quad() -> Vec<Vertex> {
        let up = [0.0, 0.0, 1.0];
        let v0 = vertex([0.0, 0.0, 0.0], up, [0, 1]);
        let v1 = vertex([1.0, 0.0, 0.0], up, [1, 2]);
        let v2 = vertex([0.0, 1.0, 0.0], up, [2, 3]);
        let v3 = vertex([1.0, 1.0, 0.0], up, [3, 4]);
        vec![v0, v1, v2, v2, v1, v3]
    }

    #[test]
    fn test_smooth_welds_shared_edges() {
        let mesh = ChunkMesh::from_vertices(&quad(), false);
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.indices, vec![0, 1, 2, 2, 1, 3]);
    }

    #[test]
    fn test_flat_duplicates_vertices() {
        let mesh = ChunkMesh::from_vertices(&quad(), true);
        assert_eq!(mesh.vertex_count(), 6);
        assert_eq!(mesh.triangle_count(), 2);
        for n in &mesh.normals {
            assert_eq!(*n, Vec3::Z);
        }
    }

    #[test]
    fn test_flat_normal_follows_gradient() {
        let down = [0.0, 0.0, -1.0];
        let tri = vec![
            vertex([0.0, 0.0, 0.0], down, [0, 1]),
            vertex([1.0, 0.0, 0.0], down, [1, 2]),
            vertex([0.0, 1.0, 0.0], down, [2, 3]),
        ];
        let mesh = ChunkMesh::from_vertices(&tri, true);
        assert_eq!(mesh.normals[0], -Vec3::Z);
    }

    #[test]
    fn test_degenerate_triangle_keeps_kernel_normals() {
        let n = [0.0, 1.0, 0.0];
        let tri = vec![
            vertex([0.0, 0.0, 0.0], n, [0, 1]),
            vertex([0.0, 0.0, 0.0], n, [1, 2]),
            vertex([0.0, 0.0, 0.0], n, [2, 3]),
        ];
        let mesh = ChunkMesh::from_vertices(&tri, true);
        assert_eq!(mesh.normals, vec![Vec3::Y; 3]);
    }

    #[test]
    fn test_partial_triangle_ignored() {
        let mut verts = quad();
        verts.truncate(4);
        let mesh = ChunkMesh::from_vertices(&verts, false);
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.vertex_count(), 3);
    }

    #[test]
    fn test_empty_stream() {
        let mesh = ChunkMesh::from_vertices(&[], false);
        assert!(mesh.is_empty());
        assert_eq!(mesh, ChunkMesh::default());
    }
}
