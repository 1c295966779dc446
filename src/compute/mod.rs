//! Compute dispatch layer.
//!
//! The terrain pipeline only talks to kernels through [`ComputeBackend`]:
//! allocate volumes and triangle buffers, dispatch a kernel over a 3D
//! thread range with explicit [`Bindings`], then [`ComputeBackend::wait_idle`]
//! before reading anything back. Two backends implement it:
//! [`GpuBackend`] (wgpu + WGSL) and [`SoftwareBackend`] (CPU simulation).

pub mod types;
pub mod tables;
pub mod software;
pub mod gpu;

pub use types::{
    Kernel, KernelParams, Vertex,
    DensityParams, EditParams, BlurParams, MarchParams,
};
pub use software::{SoftwareBackend, DispatchRecord};
pub use gpu::GpuBackend;

use crate::core::error::Error;
use crate::core::types::{Result, UVec3};

/// Threads per workgroup along each axis (8x8x8 = 512 invocations)
pub const WORKGROUP_SIZE: u32 = 8;

/// Handle to a cubic `f32` density volume owned by a backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VolumeId(pub(crate) u32);

/// Handle to a vertex append buffer plus its triangle counter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TriangleBufferId(pub(crate) u32);

/// Resources bound for a single dispatch.
///
/// Nothing carries over between dispatches: every call states the
/// resources its kernel touches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bindings {
    /// Volume the kernel samples
    pub source: Option<VolumeId>,
    /// Volume the kernel writes
    pub target: Option<VolumeId>,
    /// Append buffer receiving triangles
    pub triangles: Option<TriangleBufferId>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, volume: VolumeId) -> Self {
        self.source = Some(volume);
        self
    }

    pub fn target(mut self, volume: VolumeId) -> Self {
        self.target = Some(volume);
        self
    }

    pub fn triangles(mut self, buffer: TriangleBufferId) -> Self {
        self.triangles = Some(buffer);
        self
    }

    /// Source volume, or a binding error naming `kernel`
    pub fn require_source(&self, kernel: Kernel) -> Result<VolumeId> {
        self.source.ok_or(Error::Binding { kernel: kernel.name(), slot: "source" })
    }

    /// Target volume, or a binding error naming `kernel`
    pub fn require_target(&self, kernel: Kernel) -> Result<VolumeId> {
        self.target.ok_or(Error::Binding { kernel: kernel.name(), slot: "target" })
    }

    /// Triangle buffer, or a binding error naming `kernel`
    pub fn require_triangles(&self, kernel: Kernel) -> Result<TriangleBufferId> {
        self.triangles.ok_or(Error::Binding { kernel: kernel.name(), slot: "triangles" })
    }
}

/// Workgroups needed to cover `threads` invocations on each axis
pub fn workgroup_count(threads: UVec3) -> UVec3 {
    UVec3::new(
        threads.x.div_ceil(WORKGROUP_SIZE),
        threads.y.div_ceil(WORKGROUP_SIZE),
        threads.z.div_ceil(WORKGROUP_SIZE),
    )
}

/// Execution backend for the terrain kernels.
///
/// Dispatches may run asynchronously; callers must go through
/// [`wait_idle`](Self::wait_idle) before any read that depends on them.
/// Kernels treat out-of-range thread ids and sample indices as no-ops, so
/// over-dispatch is always safe.
pub trait ComputeBackend {
    /// Human readable backend name for logs
    fn name(&self) -> &str;

    /// Allocate a zero-filled cubic volume with `size` samples per side
    fn create_volume(&mut self, size: u32, label: &str) -> Result<VolumeId>;

    /// Free a volume. Unknown or already released handles are ignored.
    fn release_volume(&mut self, volume: VolumeId);

    /// Copy every sample of `src` into `dst` (same size required)
    fn copy_volume(&mut self, src: VolumeId, dst: VolumeId) -> Result<()>;

    /// Read back all samples in `x + y*size + z*size*size` order
    fn read_volume(&mut self, volume: VolumeId) -> Result<Vec<f32>>;

    /// Allocate an append buffer for up to `max_triangles` triangles
    fn create_triangle_buffer(&mut self, max_triangles: u32, label: &str) -> Result<TriangleBufferId>;

    /// Free a triangle buffer. Unknown or already released handles are ignored.
    fn release_triangle_buffer(&mut self, buffer: TriangleBufferId);

    /// Set the buffer's triangle counter to zero
    fn reset_counter(&mut self, buffer: TriangleBufferId) -> Result<()>;

    /// Triangle count reported by the last march into `buffer`
    fn read_triangle_count(&mut self, buffer: TriangleBufferId) -> Result<u32>;

    /// Copy the first `vertex_count` vertices of `buffer` into `out`
    /// (replacing its contents). Fails if `vertex_count` exceeds capacity.
    fn read_vertices(&mut self, buffer: TriangleBufferId, vertex_count: u32, out: &mut Vec<Vertex>) -> Result<()>;

    /// Run the kernel selected by `params` over `threads` invocations
    fn dispatch(&mut self, params: &KernelParams, bindings: &Bindings, threads: UVec3) -> Result<()>;

    /// Block until every submitted dispatch has completed
    fn wait_idle(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroup_count_rounds_up() {
        assert_eq!(workgroup_count(UVec3::new(1, 8, 9)), UVec3::new(1, 1, 2));
        assert_eq!(workgroup_count(UVec3::splat(7)), UVec3::ONE);
        assert_eq!(workgroup_count(UVec3::ZERO), UVec3::ZERO);
    }

    #[test]
    fn test_workgroups_cover_threads() {
        for n in 1..40u32 {
            let groups = workgroup_count(UVec3::splat(n));
            assert!(groups.x * WORKGROUP_SIZE >= n);
            assert!((groups.x - 1) * WORKGROUP_SIZE < n);
        }
    }

    #[test]
    fn test_missing_binding_names_kernel() {
        let bindings = Bindings::new().target(VolumeId(0));
        assert!(bindings.require_target(Kernel::Density).is_ok());
        match bindings.require_source(Kernel::Blur) {
            Err(Error::Binding { kernel, slot }) => {
                assert_eq!(kernel, "blur");
                assert_eq!(slot, "source");
            }
            other => panic!("expected binding error, got {:?}", other),
        }
    }
}
