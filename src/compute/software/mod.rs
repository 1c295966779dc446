//! CPU simulation of the compute backend.
//!
//! Runs every kernel synchronously on the calling thread (density is split
//! across rayon workers) with the same thread-id contract as the WGSL
//! shaders. Used for tests, benchmarks and machines without a GPU adapter.

pub mod kernels;

use crate::compute::types::{Kernel, KernelParams, Vertex};
use crate::compute::{workgroup_count, Bindings, ComputeBackend, TriangleBufferId, VolumeId, WORKGROUP_SIZE};
use crate::core::error::Error;
use crate::core::types::{Result, UVec3};

/// Largest volume side accepted by default
pub const DEFAULT_MAX_VOLUME_SIZE: u32 = 512;

struct SoftVolume {
    size: u32,
    data: Vec<f32>,
}

struct SoftTriangles {
    vertices: Vec<Vertex>,
    counter: u32,
    max_triangles: u32,
}

/// One recorded dispatch, for inspecting what the pipeline submitted
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DispatchRecord {
    pub params: KernelParams,
    pub bindings: Bindings,
    pub threads: UVec3,
    pub workgroups: UVec3,
}

impl DispatchRecord {
    pub fn kernel(&self) -> Kernel {
        self.params.kernel()
    }
}

/// CPU backend holding volumes and triangle buffers in host memory
pub struct SoftwareBackend {
    volumes: Vec<Option<SoftVolume>>,
    buffers: Vec<Option<SoftTriangles>>,
    history: Option<Vec<DispatchRecord>>,
    max_volume_size: u32,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            volumes: Vec::new(),
            buffers: Vec::new(),
            history: None,
            max_volume_size: DEFAULT_MAX_VOLUME_SIZE,
        }
    }

    /// Record every dispatch for later inspection
    pub fn with_history(mut self) -> Self {
        self.history = Some(Vec::new());
        self
    }

    /// Reject volumes larger than `size` samples per side
    pub fn with_max_volume_size(mut self, size: u32) -> Self {
        self.max_volume_size = size;
        self
    }

    /// Dispatches recorded so far (empty unless history is enabled)
    pub fn history(&self) -> &[DispatchRecord] {
        self.history.as_deref().unwrap_or(&[])
    }

    /// Take and clear the recorded dispatches
    pub fn take_history(&mut self) -> Vec<DispatchRecord> {
        self.history.as_mut().map(std::mem::take).unwrap_or_default()
    }

    /// Volumes currently allocated
    pub fn live_volumes(&self) -> usize {
        self.volumes.iter().filter(|v| v.is_some()).count()
    }

    /// Triangle buffers currently allocated
    pub fn live_triangle_buffers(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }

    fn volume(&self, id: VolumeId) -> Result<&SoftVolume> {
        self.volumes
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::Resource(format!("Unknown volume {:?}", id)))
    }

    fn volume_mut(&mut self, id: VolumeId) -> Result<&mut SoftVolume> {
        self.volumes
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::Resource(format!("Unknown volume {:?}", id)))
    }

    fn buffer(&self, id: TriangleBufferId) -> Result<&SoftTriangles> {
        self.buffers
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::Resource(format!("Unknown triangle buffer {:?}", id)))
    }

    fn buffer_mut(&mut self, id: TriangleBufferId) -> Result<&mut SoftTriangles> {
        self.buffers
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::Resource(format!("Unknown triangle buffer {:?}", id)))
    }

    fn check_size(&self, id: VolumeId, expected: i32) -> Result<()> {
        let size = self.volume(id)?.size;
        if size as i32 != expected {
            return Err(Error::Resource(format!(
                "Volume {:?} has size {} but kernel expects {}",
                id, size, expected
            )));
        }
        Ok(())
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Every thread id of a padded dispatch, x fastest
fn padded_threads(threads: UVec3) -> impl Iterator<Item = UVec3> {
    let padded = workgroup_count(threads) * WORKGROUP_SIZE;
    (0..padded.z).flat_map(move |z| {
        (0..padded.y).flat_map(move |y| (0..padded.x).map(move |x| UVec3::new(x, y, z)))
    })
}

impl ComputeBackend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn create_volume(&mut self, size: u32, label: &str) -> Result<VolumeId> {
        if size < 2 || size > self.max_volume_size {
            return Err(Error::Resource(format!(
                "Cannot allocate volume '{}' with {} samples per side (limit {})",
                label, size, self.max_volume_size
            )));
        }
        let len = size as usize * size as usize * size as usize;
        self.volumes.push(Some(SoftVolume { size, data: vec![0.0; len] }));
        Ok(VolumeId(self.volumes.len() as u32 - 1))
    }

    fn release_volume(&mut self, volume: VolumeId) {
        if let Some(slot) = self.volumes.get_mut(volume.0 as usize) {
            *slot = None;
        }
    }

    fn copy_volume(&mut self, src: VolumeId, dst: VolumeId) -> Result<()> {
        if src == dst {
            self.volume(src)?;
            return Ok(());
        }
        let (size, data) = {
            let v = self.volume(src)?;
            (v.size, v.data.clone())
        };
        let target = self.volume_mut(dst)?;
        if target.size != size {
            return Err(Error::Resource(format!(
                "Cannot copy volume of size {} into size {}",
                size, target.size
            )));
        }
        target.data = data;
        Ok(())
    }

    fn read_volume(&mut self, volume: VolumeId) -> Result<Vec<f32>> {
        Ok(self.volume(volume)?.data.clone())
    }

    fn create_triangle_buffer(&mut self, max_triangles: u32, label: &str) -> Result<TriangleBufferId> {
        if max_triangles == 0 {
            return Err(Error::Resource(format!("Triangle buffer '{}' needs a non-zero capacity", label)));
        }
        self.buffers.push(Some(SoftTriangles {
            vertices: vec![Vertex::default(); max_triangles as usize * 3],
            counter: 0,
            max_triangles,
        }));
        Ok(TriangleBufferId(self.buffers.len() as u32 - 1))
    }

    fn release_triangle_buffer(&mut self, buffer: TriangleBufferId) {
        if let Some(slot) = self.buffers.get_mut(buffer.0 as usize) {
            *slot = None;
        }
    }

    fn reset_counter(&mut self, buffer: TriangleBufferId) -> Result<()> {
        self.buffer_mut(buffer)?.counter = 0;
        Ok(())
    }

    fn read_triangle_count(&mut self, buffer: TriangleBufferId) -> Result<u32> {
        Ok(self.buffer(buffer)?.counter)
    }

    fn read_vertices(&mut self, buffer: TriangleBufferId, vertex_count: u32, out: &mut Vec<Vertex>) -> Result<()> {
        let buf = self.buffer(buffer)?;
        let count = vertex_count as usize;
        if count > buf.vertices.len() {
            return Err(Error::Readback(format!(
                "Requested {} vertices from a buffer holding {}",
                count,
                buf.vertices.len()
            )));
        }
        out.clear();
        out.extend_from_slice(&buf.vertices[..count]);
        Ok(())
    }

    fn dispatch(&mut self, params: &KernelParams, bindings: &Bindings, threads: UVec3) -> Result<()> {
        let kernel = params.kernel();
        match params {
            KernelParams::Density(p) => {
                let target = bindings.require_target(kernel)?;
                self.check_size(target, p.texture_size as i32)?;
                let padded = workgroup_count(threads) * WORKGROUP_SIZE;
                kernels::density(p, &mut self.volume_mut(target)?.data, padded);
            }
            KernelParams::Edit(p) => {
                let target = bindings.require_target(kernel)?;
                self.check_size(target, p.texture_size)?;
                let data = &mut self.volume_mut(target)?.data;
                for id in padded_threads(threads) {
                    kernels::edit(p, data, id);
                }
            }
            KernelParams::Blur(p) => {
                let source = bindings.require_source(kernel)?;
                let target = bindings.require_target(kernel)?;
                self.check_size(source, p.texture_size)?;
                self.check_size(target, p.texture_size)?;
                // Blurring in place would read already-filtered neighbours
                let input = if source == target {
                    self.volume(source)?.data.clone()
                } else {
                    Vec::new()
                };
                let mut output = std::mem::take(&mut self.volume_mut(target)?.data);
                {
                    let input = if source == target { &input } else { &self.volume(source)?.data };
                    for id in padded_threads(threads) {
                        kernels::blur(p, input, &mut output, id);
                    }
                }
                self.volume_mut(target)?.data = output;
            }
            KernelParams::March(p) => {
                let source = bindings.require_source(kernel)?;
                let triangles = bindings.require_triangles(kernel)?;
                self.check_size(source, p.texture_size)?;
                let mut buf = self
                    .buffers
                    .get_mut(triangles.0 as usize)
                    .and_then(Option::take)
                    .ok_or_else(|| Error::Resource(format!("Unknown triangle buffer {:?}", triangles)))?;
                let limit = p.max_triangles.min(buf.max_triangles);
                {
                    let input = &self.volume(source)?.data;
                    for id in padded_threads(threads) {
                        kernels::march(p, input, id, |tri| {
                            let slot = buf.counter;
                            buf.counter = buf.counter.saturating_add(1);
                            if slot < limit {
                                let start = slot as usize * 3;
                                buf.vertices[start..start + 3].copy_from_slice(&tri);
                            }
                        });
                    }
                }
                self.buffers[triangles.0 as usize] = Some(buf);
            }
        }

        log::trace!("Ran {} kernel over {} threads", kernel.name(), threads);
        if let Some(history) = self.history.as_mut() {
            history.push(DispatchRecord {
                params: *params,
                bindings: *bindings,
                threads,
                workgroups: workgroup_count(threads),
            });
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::types::{BlurParams, DensityParams, EditParams, MarchParams};
    use crate::core::types::IVec3;

    fn density_params(size: u32) -> KernelParams {
        KernelParams::Density(DensityParams {
            texture_size: size,
            planet_size: 8.0,
            noise_scale: 1.0,
            noise_height_multiplier: 0.0,
            seed: 7,
            _pad: [0; 3],
        })
    }

    fn march_params(size: u32, max_triangles: u32) -> KernelParams {
        KernelParams::March(MarchParams {
            chunk_origin: [0; 3],
            num_points_per_axis: size as i32,
            texture_size: size as i32,
            iso_level: 0.0,
            planet_size: 8.0,
            max_triangles,
        })
    }

    #[test]
    fn test_volume_lifecycle() {
        let mut backend = SoftwareBackend::new();
        let v = backend.create_volume(4, "v").unwrap();
        assert_eq!(backend.live_volumes(), 1);
        assert_eq!(backend.read_volume(v).unwrap().len(), 64);
        backend.release_volume(v);
        backend.release_volume(v);
        assert_eq!(backend.live_volumes(), 0);
        assert!(backend.read_volume(v).is_err());
    }

    #[test]
    fn test_volume_size_limit() {
        let mut backend = SoftwareBackend::new().with_max_volume_size(8);
        assert!(backend.create_volume(9, "big").is_err());
        assert!(backend.create_volume(1, "tiny").is_err());
        assert!(backend.create_volume(8, "ok").is_ok());
    }

    #[test]
    fn test_missing_binding_is_error() {
        let mut backend = SoftwareBackend::new();
        let result = backend.dispatch(&density_params(4), &Bindings::new(), UVec3::splat(4));
        assert!(matches!(result, Err(Error::Binding { kernel: "density", slot: "target" })));
    }

    #[test]
    fn test_size_mismatch_is_error() {
        let mut backend = SoftwareBackend::new();
        let v = backend.create_volume(5, "v").unwrap();
        let result = backend.dispatch(&density_params(4), &Bindings::new().target(v), UVec3::splat(4));
        assert!(matches!(result, Err(Error::Resource(_))));
    }

    #[test]
    fn test_over_dispatch_edit_is_clamped() {
        let mut backend = SoftwareBackend::new();
        let v = backend.create_volume(4, "v").unwrap();
        // Brush hanging off the corner of the volume
        let params = KernelParams::Edit(EditParams::new(IVec3::ZERO, 2, 4, 1.0, 1.0));
        backend.dispatch(&params, &Bindings::new().target(v), UVec3::splat(5)).unwrap();
        let data = backend.read_volume(v).unwrap();
        assert_eq!(data[0], 1.0);
        assert_eq!(data[63], 0.0);
    }

    #[test]
    fn test_blur_in_place_matches_separate_target() {
        let mut backend = SoftwareBackend::new();
        let a = backend.create_volume(6, "a").unwrap();
        let b = backend.create_volume(6, "b").unwrap();
        backend.dispatch(&density_params(6), &Bindings::new().target(a), UVec3::splat(6)).unwrap();
        backend.copy_volume(a, b).unwrap();

        let params = KernelParams::Blur(BlurParams {
            region_origin: [0; 3],
            blur_radius: 1,
            texture_size: 6,
            _pad: [0; 3],
        });
        let c = backend.create_volume(6, "c").unwrap();
        backend.dispatch(&params, &Bindings::new().source(a).target(c), UVec3::splat(6)).unwrap();
        backend.dispatch(&params, &Bindings::new().source(b).target(b), UVec3::splat(6)).unwrap();
        assert_eq!(backend.read_volume(b).unwrap(), backend.read_volume(c).unwrap());
    }

    #[test]
    fn test_march_sphere_produces_triangles() {
        let mut backend = SoftwareBackend::new();
        let v = backend.create_volume(8, "v").unwrap();
        let buf = backend.create_triangle_buffer(7 * 7 * 7 * 5, "tris").unwrap();
        backend.dispatch(&density_params(8), &Bindings::new().target(v), UVec3::splat(8)).unwrap();
        backend.reset_counter(buf).unwrap();
        backend
            .dispatch(&march_params(8, 7 * 7 * 7 * 5), &Bindings::new().source(v).triangles(buf), UVec3::splat(7))
            .unwrap();
        backend.wait_idle().unwrap();

        let count = backend.read_triangle_count(buf).unwrap();
        assert!(count > 0);
        let mut verts = Vec::new();
        backend.read_vertices(buf, count * 3, &mut verts).unwrap();
        assert_eq!(verts.len(), count as usize * 3);
        for v in &verts {
            assert!(v.position().is_finite());
            // Normals point away from the solid core
            assert!(v.normal().dot(v.position()) > 0.0);
        }
    }

    #[test]
    fn test_march_counter_exceeds_capacity() {
        let mut backend = SoftwareBackend::new();
        let v = backend.create_volume(8, "v").unwrap();
        let buf = backend.create_triangle_buffer(2, "tris").unwrap();
        backend.dispatch(&density_params(8), &Bindings::new().target(v), UVec3::splat(8)).unwrap();
        backend
            .dispatch(&march_params(8, 2), &Bindings::new().source(v).triangles(buf), UVec3::splat(7))
            .unwrap();
        // The counter keeps counting past capacity; only two slots were written
        assert!(backend.read_triangle_count(buf).unwrap() > 2);
        let mut verts = Vec::new();
        assert!(backend.read_vertices(buf, 9, &mut verts).is_err());
        backend.read_vertices(buf, 6, &mut verts).unwrap();
        assert_eq!(verts.len(), 6);
    }

    #[test]
    fn test_history_records_workgroups() {
        let mut backend = SoftwareBackend::new().with_history();
        let v = backend.create_volume(9, "v").unwrap();
        backend.dispatch(&density_params(9), &Bindings::new().target(v), UVec3::splat(9)).unwrap();
        let history = backend.take_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kernel(), Kernel::Density);
        assert_eq!(history[0].workgroups, UVec3::splat(2));
        assert!(backend.history().is_empty());
    }
}
