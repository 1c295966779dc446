//! Compute pipelines for the four terrain kernels.
//!
//! Every kernel uses a single bind group (group 0) whose binding 0 is its
//! uniform parameter block:
//!
//! | kernel  | 1                        | 2                    | 3               | 4          |
//! |---------|--------------------------|----------------------|-----------------|------------|
//! | density | storage 3D r32f write    |                      |                 |            |
//! | edit    | storage 3D r32f rw       |                      |                 |            |
//! | blur    | texture 3D (source)      | storage 3D r32f write|                 |            |
//! | march   | texture 3D (source)      | vertex storage rw    | counter atomic  | tri table  |

use wgpu::util::DeviceExt;

use crate::compute::tables::flat_tri_table;
use crate::compute::types::Kernel;

/// Volume texture format
pub const VOLUME_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

/// A pipeline plus the layout its bind groups are built against
pub struct KernelPipeline {
    pub pipeline: wgpu::ComputePipeline,
    pub layout: wgpu::BindGroupLayout,
}

/// All kernel pipelines and shared read-only tables
pub struct KernelPipelines {
    pub density: KernelPipeline,
    pub edit: KernelPipeline,
    pub blur: KernelPipeline,
    pub march: KernelPipeline,
    /// Flattened 256x16 triangulation table
    pub tri_table: wgpu::Buffer,
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_texture_entry(binding: u32, access: wgpu::StorageTextureAccess) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access,
            format: VOLUME_FORMAT,
            view_dimension: wgpu::TextureViewDimension::D3,
        },
        count: None,
    }
}

fn sampled_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D3,
            multisampled: false,
        },
        count: None,
    }
}

fn storage_buffer_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn build(
    device: &wgpu::Device,
    kernel: Kernel,
    source: &str,
    entries: &[wgpu::BindGroupLayoutEntry],
) -> KernelPipeline {
    let name = kernel.name();
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&format!("{}_shader", name)),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("{}_layout", name)),
        entries,
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("{}_pipeline_layout", name)),
        bind_group_layouts: &[&layout],
        immediate_size: 0,
    });

    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(&format!("{}_pipeline", name)),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    });

    KernelPipeline { pipeline, layout }
}

impl KernelPipelines {
    pub fn new(device: &wgpu::Device) -> Self {
        use wgpu::StorageTextureAccess::{ReadWrite, WriteOnly};

        let density = build(
            device,
            Kernel::Density,
            include_str!("../../../shaders/density.wgsl"),
            &[uniform_entry(0), storage_texture_entry(1, WriteOnly)],
        );

        let edit = build(
            device,
            Kernel::Edit,
            include_str!("../../../shaders/edit.wgsl"),
            &[uniform_entry(0), storage_texture_entry(1, ReadWrite)],
        );

        let blur = build(
            device,
            Kernel::Blur,
            include_str!("../../../shaders/blur.wgsl"),
            &[uniform_entry(0), sampled_texture_entry(1), storage_texture_entry(2, WriteOnly)],
        );

        let march = build(
            device,
            Kernel::March,
            include_str!("../../../shaders/march.wgsl"),
            &[
                uniform_entry(0),
                sampled_texture_entry(1),
                storage_buffer_entry(2, false),
                storage_buffer_entry(3, false),
                storage_buffer_entry(4, true),
            ],
        );

        let tri_table = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("march_tri_table"),
            contents: bytemuck::cast_slice(&flat_tri_table()),
            usage: wgpu::BufferUsages::STORAGE,
        });

        Self {
            density,
            edit,
            blur,
            march,
            tri_table,
        }
    }

    pub fn get(&self, kernel: Kernel) -> &KernelPipeline {
        match kernel {
            Kernel::Density => &self.density,
            Kernel::Edit => &self.edit,
            Kernel::Blur => &self.blur,
            Kernel::March => &self.march,
        }
    }
}
