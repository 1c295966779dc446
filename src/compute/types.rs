//! GPU-visible data layouts shared by every backend.
//!
//! Uniform structs are plain scalars (no `vec3`) so the WGSL side can
//! declare matching structs without std140-style padding surprises.

use bytemuck::{Pod, Zeroable};

use crate::core::types::{IVec3, Vec3};

/// Opaque compute units the pipeline invokes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// Fills the raw volume from the density function
    Density,
    /// Adds a weighted spherical brush to the raw volume
    Edit,
    /// Box-filters raw samples into the processed volume
    Blur,
    /// Marching cubes over one chunk, appending triangles
    March,
}

impl Kernel {
    /// Shader/kernel name used in labels and logs
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Density => "density",
            Kernel::Edit => "edit",
            Kernel::Blur => "blur",
            Kernel::March => "march",
        }
    }
}

/// Vertex emitted by the march kernel
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// Sorted linear sample indices of the cell edge this vertex lies on.
    /// Identical for every triangle that touches the same edge.
    pub edge: [u32; 2],
}

impl Vertex {
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn normal(&self) -> Vec3 {
        Vec3::from_array(self.normal)
    }
}

/// Parameters for [`Kernel::Density`]
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DensityParams {
    pub texture_size: u32,
    pub planet_size: f32,
    pub noise_scale: f32,
    pub noise_height_multiplier: f32,
    pub seed: u32,
    pub _pad: [u32; 3],
}

/// Parameters for [`Kernel::Edit`]
///
/// Thread `id` of the dispatch addresses sample `dispatch_origin + id`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct EditParams {
    pub brush_centre: [i32; 3],
    pub brush_radius: i32,
    pub dispatch_origin: [i32; 3],
    pub texture_size: i32,
    pub weight: f32,
    pub delta_time: f32,
    pub _pad: [f32; 2],
}

/// Parameters for [`Kernel::Blur`]
///
/// Thread `id` of the dispatch writes sample `region_origin + id`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BlurParams {
    pub region_origin: [i32; 3],
    pub blur_radius: i32,
    pub texture_size: i32,
    pub _pad: [i32; 3],
}

/// Parameters for [`Kernel::March`]
///
/// Thread `id` of the dispatch polygonises the cell whose minimum corner is
/// sample `chunk_origin + id`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MarchParams {
    pub chunk_origin: [i32; 3],
    pub num_points_per_axis: i32,
    pub texture_size: i32,
    pub iso_level: f32,
    pub planet_size: f32,
    pub max_triangles: u32,
}

/// Parameter block of one dispatch; the variant selects the kernel
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KernelParams {
    Density(DensityParams),
    Edit(EditParams),
    Blur(BlurParams),
    March(MarchParams),
}

impl KernelParams {
    /// Kernel this parameter block drives
    pub fn kernel(&self) -> Kernel {
        match self {
            KernelParams::Density(_) => Kernel::Density,
            KernelParams::Edit(_) => Kernel::Edit,
            KernelParams::Blur(_) => Kernel::Blur,
            KernelParams::March(_) => Kernel::March,
        }
    }

    /// Raw bytes uploaded as the kernel's uniform block
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            KernelParams::Density(p) => bytemuck::bytes_of(p),
            KernelParams::Edit(p) => bytemuck::bytes_of(p),
            KernelParams::Blur(p) => bytemuck::bytes_of(p),
            KernelParams::March(p) => bytemuck::bytes_of(p),
        }
    }
}

impl EditParams {
    pub fn new(centre: IVec3, radius: u32, texture_size: u32, weight: f32, delta_time: f32) -> Self {
        let r = radius.min(i32::MAX as u32) as i32;
        Self {
            brush_centre: centre.to_array(),
            brush_radius: r,
            dispatch_origin: centre.saturating_sub(IVec3::splat(r)).to_array(),
            texture_size: texture_size as i32,
            weight,
            delta_time,
            _pad: [0.0; 2],
        }
    }
}
