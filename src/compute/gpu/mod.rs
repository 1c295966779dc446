//! wgpu implementation of [`ComputeBackend`].
//!
//! Volumes are `R32Float` 3D textures; triangle buffers are a vertex
//! storage buffer plus an atomic counter, read back through staging
//! buffers the same way the counter/append readback works everywhere else:
//! copy to a `MAP_READ` buffer, map, poll, read, unmap.

pub mod context;
pub mod pipelines;

pub use context::GpuContext;
pub use pipelines::{KernelPipelines, VOLUME_FORMAT};

use wgpu::util::DeviceExt;

use crate::compute::types::{KernelParams, Vertex};
use crate::compute::{workgroup_count, Bindings, ComputeBackend, TriangleBufferId, VolumeId};
use crate::core::error::Error;
use crate::core::types::{Result, UVec3};

const VERTEX_SIZE: u64 = std::mem::size_of::<Vertex>() as u64;

struct GpuVolume {
    size: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct GpuTriangles {
    vertices: wgpu::Buffer,
    vertex_staging: wgpu::Buffer,
    counter: wgpu::Buffer,
    counter_staging: wgpu::Buffer,
    max_triangles: u32,
}

/// GPU backend running the WGSL kernels
pub struct GpuBackend {
    context: GpuContext,
    pipelines: KernelPipelines,
    volumes: Vec<Option<GpuVolume>>,
    buffers: Vec<Option<GpuTriangles>>,
}

impl GpuBackend {
    /// Create a backend on the default high-performance adapter
    pub fn new() -> Result<Self> {
        let context = pollster::block_on(GpuContext::new())?;
        Ok(Self::from_context(context))
    }

    /// Build pipelines on an existing context
    pub fn from_context(context: GpuContext) -> Self {
        let pipelines = KernelPipelines::new(&context.device);
        log::info!("Compute pipelines created");
        Self {
            context,
            pipelines,
            volumes: Vec::new(),
            buffers: Vec::new(),
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    /// View of a volume texture, for binding it in render passes
    pub fn volume_view(&self, volume: VolumeId) -> Option<&wgpu::TextureView> {
        self.volumes.get(volume.0 as usize).and_then(Option::as_ref).map(|v| &v.view)
    }

    fn volume(&self, id: VolumeId) -> Result<&GpuVolume> {
        self.volumes
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::Resource(format!("Unknown volume {:?}", id)))
    }

    fn buffer(&self, id: TriangleBufferId) -> Result<&GpuTriangles> {
        self.buffers
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::Resource(format!("Unknown triangle buffer {:?}", id)))
    }

    fn sized_volume(&self, id: VolumeId, expected: i32) -> Result<&GpuVolume> {
        let volume = self.volume(id)?;
        if volume.size as i32 != expected {
            return Err(Error::Resource(format!(
                "Volume {:?} has size {} but kernel expects {}",
                id, volume.size, expected
            )));
        }
        Ok(volume)
    }

    /// Map `len` bytes of a staging buffer and copy them out
    fn map_read(&self, buffer: &wgpu::Buffer, len: u64) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let slice = buffer.slice(..len);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.context.wait_idle()?;

        rx.recv()
            .map_err(|e| Error::Readback(format!("Map callback dropped: {}", e)))?
            .map_err(|e| Error::Readback(format!("Buffer map failed: {:?}", e)))?;

        let bytes = slice.get_mapped_range().to_vec();
        buffer.unmap();
        Ok(bytes)
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.context.queue.submit(std::iter::once(encoder.finish()));
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn bind_group(&self, params: &KernelParams, bindings: &Bindings, uniform: &wgpu::Buffer) -> Result<wgpu::BindGroup> {
        let kernel = params.kernel();
        let layout = &self.pipelines.get(kernel).layout;
        let label = format!("{}_bind_group", kernel.name());
        let device = &self.context.device;

        let group = match params {
            KernelParams::Density(p) => {
                let target = self.sized_volume(bindings.require_target(kernel)?, p.texture_size as i32)?;
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&label),
                    layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: uniform.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&target.view) },
                    ],
                })
            }
            KernelParams::Edit(p) => {
                let target = self.sized_volume(bindings.require_target(kernel)?, p.texture_size)?;
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&label),
                    layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: uniform.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&target.view) },
                    ],
                })
            }
            KernelParams::Blur(p) => {
                let source_id = bindings.require_source(kernel)?;
                let target_id = bindings.require_target(kernel)?;
                if source_id == target_id {
                    return Err(Error::Resource(
                        "Blur cannot sample and write the same volume".to_string(),
                    ));
                }
                let source = self.sized_volume(source_id, p.texture_size)?;
                let target = self.sized_volume(target_id, p.texture_size)?;
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&label),
                    layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: uniform.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&source.view) },
                        wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&target.view) },
                    ],
                })
            }
            KernelParams::March(p) => {
                let source = self.sized_volume(bindings.require_source(kernel)?, p.texture_size)?;
                let triangles = self.buffer(bindings.require_triangles(kernel)?)?;
                if p.max_triangles > triangles.max_triangles {
                    return Err(Error::Resource(format!(
                        "March limit {} exceeds buffer capacity {}",
                        p.max_triangles, triangles.max_triangles
                    )));
                }
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&label),
                    layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: uniform.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&source.view) },
                        wgpu::BindGroupEntry { binding: 2, resource: triangles.vertices.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 3, resource: triangles.counter.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 4, resource: self.pipelines.tri_table.as_entire_binding() },
                    ],
                })
            }
        };
        Ok(group)
    }
}

impl ComputeBackend for GpuBackend {
    fn name(&self) -> &str {
        "gpu"
    }

    fn create_volume(&mut self, size: u32, label: &str) -> Result<VolumeId> {
        let max = self.context.device.limits().max_texture_dimension_3d;
        if size < 2 || size > max {
            return Err(Error::Resource(format!(
                "Cannot allocate volume '{}' with {} samples per side (limit {})",
                label, size, max
            )));
        }

        let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: size,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format: VOLUME_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        self.volumes.push(Some(GpuVolume { size, texture, view }));
        Ok(VolumeId(self.volumes.len() as u32 - 1))
    }

    fn release_volume(&mut self, volume: VolumeId) {
        if let Some(slot) = self.volumes.get_mut(volume.0 as usize) {
            if let Some(v) = slot.take() {
                v.texture.destroy();
            }
        }
    }

    fn copy_volume(&mut self, src: VolumeId, dst: VolumeId) -> Result<()> {
        let source = self.volume(src)?;
        let target = self.volume(dst)?;
        if source.size != target.size {
            return Err(Error::Resource(format!(
                "Cannot copy volume of size {} into size {}",
                source.size, target.size
            )));
        }
        if src == dst {
            return Ok(());
        }

        let size = source.size;
        let mut encoder = self.encoder("copy_volume_encoder");
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: size,
            },
        );
        self.submit(encoder);
        Ok(())
    }

    fn read_volume(&mut self, volume: VolumeId) -> Result<Vec<f32>> {
        let volume = self.volume(volume)?;
        let size = volume.size;
        let row_bytes = size * 4;
        let padded_row = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let staging_size = padded_row as u64 * size as u64 * size as u64;

        let staging = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("volume_readback_staging"),
            size: staging_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.encoder("volume_readback_encoder");
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &volume.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(size),
                },
            },
            wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: size,
            },
        );
        self.submit(encoder);

        let bytes = self.map_read(&staging, staging_size)?;
        staging.destroy();

        let mut samples = Vec::with_capacity(size as usize * size as usize * size as usize);
        for row in bytes.chunks_exact(padded_row as usize) {
            samples.extend(bytemuck::pod_collect_to_vec::<u8, f32>(&row[..row_bytes as usize]));
        }
        Ok(samples)
    }

    fn create_triangle_buffer(&mut self, max_triangles: u32, label: &str) -> Result<TriangleBufferId> {
        if max_triangles == 0 {
            return Err(Error::Resource(format!("Triangle buffer '{}' needs a non-zero capacity", label)));
        }
        let bytes = max_triangles as u64 * 3 * VERTEX_SIZE;
        let limits = self.context.device.limits();
        if bytes > limits.max_storage_buffer_binding_size as u64 || bytes > limits.max_buffer_size {
            return Err(Error::Resource(format!(
                "Triangle buffer '{}' of {} bytes exceeds device limits",
                label, bytes
            )));
        }

        let device = &self.context.device;
        let vertices = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{}_vertices", label)),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let vertex_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{}_vertex_staging", label)),
            size: bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let counter = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{}_counter", label)),
            size: std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let counter_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{}_counter_staging", label)),
            size: std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        self.buffers.push(Some(GpuTriangles {
            vertices,
            vertex_staging,
            counter,
            counter_staging,
            max_triangles,
        }));
        Ok(TriangleBufferId(self.buffers.len() as u32 - 1))
    }

    fn release_triangle_buffer(&mut self, buffer: TriangleBufferId) {
        if let Some(slot) = self.buffers.get_mut(buffer.0 as usize) {
            if let Some(b) = slot.take() {
                b.vertices.destroy();
                b.vertex_staging.destroy();
                b.counter.destroy();
                b.counter_staging.destroy();
            }
        }
    }

    fn reset_counter(&mut self, buffer: TriangleBufferId) -> Result<()> {
        let buf = self.buffer(buffer)?;
        let mut encoder = self.encoder("reset_counter_encoder");
        encoder.clear_buffer(&buf.counter, 0, None);
        self.submit(encoder);
        Ok(())
    }

    fn read_triangle_count(&mut self, buffer: TriangleBufferId) -> Result<u32> {
        let buf = self.buffer(buffer)?;
        let mut encoder = self.encoder("counter_readback_encoder");
        encoder.copy_buffer_to_buffer(&buf.counter, 0, &buf.counter_staging, 0, std::mem::size_of::<u32>() as u64);
        self.submit(encoder);

        let data = self.map_read(&buf.counter_staging, std::mem::size_of::<u32>() as u64)?;
        Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
    }

    fn read_vertices(&mut self, buffer: TriangleBufferId, vertex_count: u32, out: &mut Vec<Vertex>) -> Result<()> {
        let buf = self.buffer(buffer)?;
        let capacity = buf.max_triangles as u64 * 3;
        if vertex_count as u64 > capacity {
            return Err(Error::Readback(format!(
                "Requested {} vertices from a buffer holding {}",
                vertex_count, capacity
            )));
        }

        out.clear();
        let bytes = vertex_count as u64 * VERTEX_SIZE;
        if bytes == 0 {
            return Ok(());
        }

        let mut encoder = self.encoder("vertex_readback_encoder");
        encoder.copy_buffer_to_buffer(&buf.vertices, 0, &buf.vertex_staging, 0, bytes);
        self.submit(encoder);

        let data = self.map_read(&buf.vertex_staging, bytes)?;
        out.extend(bytemuck::pod_collect_to_vec::<u8, Vertex>(&data));
        Ok(())
    }

    fn dispatch(&mut self, params: &KernelParams, bindings: &Bindings, threads: UVec3) -> Result<()> {
        let kernel = params.kernel();
        let uniform = self.context.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{}_params", kernel.name())),
            contents: params.as_bytes(),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = self.bind_group(params, bindings, &uniform)?;
        let groups = workgroup_count(threads);

        let mut encoder = self.encoder(&format!("{}_encoder", kernel.name()));
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&format!("{}_pass", kernel.name())),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines.get(kernel).pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups.x, groups.y, groups.z);
        }
        self.submit(encoder);

        log::trace!("Dispatched {} kernel: {} workgroups", kernel.name(), groups);
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.context.wait_idle()
    }
}

impl Drop for GpuBackend {
    fn drop(&mut self) {
        for slot in &mut self.volumes {
            if let Some(v) = slot.take() {
                v.texture.destroy();
            }
        }
        for slot in &mut self.buffers {
            if let Some(b) = slot.take() {
                b.vertices.destroy();
                b.vertex_staging.destroy();
                b.counter.destroy();
                b.counter_staging.destroy();
            }
        }
    }
}
