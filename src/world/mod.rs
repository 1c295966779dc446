//! Terrain world: chunk grid, density field and incremental regeneration.
//!
//! [`TerrainWorld`] owns every chunk, the density field, the shared
//! triangle staging buffer and the compute backend. An edit stamps the
//! field, re-smooths the padded region when smoothing is on, then rebuilds
//! exactly the chunks whose cubes touch the affected sphere.

pub mod config;
pub mod invalidator;
pub mod staging;

pub use config::WorldConfig;
pub use invalidator::ChunkInvalidator;
pub use staging::TriangleStaging;

use crate::chunk::{Chunk, ChunkCoord};
use crate::compute::{Bindings, ComputeBackend, KernelParams, MarchParams, VolumeId};
use crate::core::error::Error;
use crate::core::types::{IVec3, Result, UVec3, Vec3};
use crate::field::DensityField;

/// Default edit rate scale (one 60 Hz frame)
pub const DEFAULT_FRAME_DELTA: f32 = 1.0 / 60.0;

/// Largest brush radius in samples; every integer up to here is exact in f32
pub const MAX_SAMPLE_RADIUS: u32 = 1 << 24;

/// Where an edit lands in sample space
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EditTarget {
    /// Sample the brush is centred on (clamped into the volume)
    pub sample: IVec3,
    /// Brush radius in samples
    pub sample_radius: u32,
    /// World-space position of `sample`
    pub center: Vec3,
    /// World-space radius of every sample the edit may have changed,
    /// smoothing spread and one sample of margin included
    pub affected_radius: f32,
}

/// Outcome of one [`TerrainWorld::terraform`] call
#[derive(Clone, Debug, PartialEq)]
pub struct TerraformReport {
    pub target: EditTarget,
    /// Indices of the chunks rebuilt, ascending
    pub regenerated: Vec<usize>,
    /// Triangles across the rebuilt chunks
    pub triangles: u32,
}

/// Handles a renderer needs to shade the terrain
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderInputs {
    /// Current processed density
    pub density: VolumeId,
    /// Density as first generated, if a snapshot was taken
    pub initial_density: Option<VolumeId>,
    pub bounds_size: f32,
}

/// Running counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorldStats {
    pub chunk_regenerations: u64,
    pub edits: u64,
    pub last_edit_triangles: u32,
}

/// The chunked terrain and everything needed to edit it
pub struct TerrainWorld<B: ComputeBackend> {
    config: WorldConfig,
    backend: B,
    field: DensityField,
    snapshot: Option<VolumeId>,
    staging: TriangleStaging,
    chunks: Vec<Chunk>,
    invalidator: ChunkInvalidator,
    frame_delta: f32,
    stats: WorldStats,
    shut_down: bool,
}

impl<B: ComputeBackend> TerrainWorld<B> {
    /// Build the world: allocate, generate the field, mesh every chunk.
    ///
    /// On failure everything allocated so far is released before the error
    /// is returned.
    pub fn new(config: WorldConfig, mut backend: B) -> Result<Self> {
        config.validate()?;
        let size = config.texture_size();

        log::info!(
            "Creating terrain world on {} backend: {}^3 chunks, {}^3 samples, bounds {}",
            backend.name(),
            config.num_chunks,
            size,
            config.bounds_size
        );

        let mut field = DensityField::initialize(&mut backend, size, config.smoothing())?;
        let staging = match TriangleStaging::new(&mut backend, config.max_triangles_per_chunk()) {
            Ok(staging) => staging,
            Err(e) => {
                field.release(&mut backend);
                return Err(e);
            }
        };

        let chunks = (0..config.chunk_count())
            .map(|index| {
                let coord = ChunkCoord::from_index(index, config.num_chunks);
                Chunk::new(coord, config.chunk_center(coord), config.chunk_size())
            })
            .collect();
        let invalidator = ChunkInvalidator::new(config.chunk_count());

        let mut world = Self {
            config,
            backend,
            field,
            snapshot: None,
            staging,
            chunks,
            invalidator,
            frame_delta: DEFAULT_FRAME_DELTA,
            stats: WorldStats::default(),
            shut_down: false,
        };

        if let Err(e) = world.build() {
            log::error!("Terrain world initialization failed: {}", e);
            world.shutdown();
            return Err(e);
        }
        Ok(world)
    }

    fn build(&mut self) -> Result<()> {
        self.field.generate(&mut self.backend, &self.config.density_settings())?;

        if self.config.snapshot_initial_density {
            let snapshot = self.backend.create_volume(self.field.size(), "initial_density")?;
            self.snapshot = Some(snapshot);
            self.backend.copy_volume(self.field.processed()?, snapshot)?;
        }

        self.invalidator.mark_all();
        let mut triangles = 0u64;
        for index in self.invalidator.take_dirty() {
            triangles += self.regenerate_chunk(index)? as u64;
        }

        log::info!(
            "Terrain world ready: {} chunks, {} triangles",
            self.chunks.len(),
            triangles
        );
        Ok(())
    }

    /// Rebuild one chunk's mesh from the processed density.
    ///
    /// Returns the chunk's triangle count.
    pub fn regenerate_chunk(&mut self, index: usize) -> Result<u32> {
        self.ensure_live()?;
        let chunk = self
            .chunks
            .get_mut(index)
            .ok_or_else(|| Error::Chunk(format!("No chunk with index {}", index)))?;
        chunk.begin_regeneration()?;

        let result = march_chunk(&mut self.backend, &mut self.staging, &self.field, &self.config, chunk);
        self.staging.release();
        chunk.finish();

        let triangles = result?;
        self.stats.chunk_regenerations += 1;
        log::debug!("Regenerated chunk {:?}: {} triangles", chunk.coord, triangles);
        Ok(triangles)
    }

    /// Convert an edit's world-space point and radius to sample space.
    ///
    /// Points outside the world clamp to the nearest boundary sample.
    pub fn edit_target(&self, point: Vec3, radius: f32) -> Result<EditTarget> {
        if !point.is_finite() {
            return Err(Error::Edit(format!("Edit point {} is not finite", point)));
        }
        if !(radius.is_finite() && radius > 0.0) {
            return Err(Error::Edit(format!("Edit radius must be positive, got {}", radius)));
        }

        let size = self.config.texture_size();
        let bounds = self.config.bounds_size;
        let pixel = self.config.sample_world_size();
        let last = (size - 1) as f32;

        let t = ((point + Vec3::splat(bounds * 0.5)) / bounds).clamp(Vec3::ZERO, Vec3::ONE);
        let sample = (t * last).round().as_ivec3();
        let sample_radius = (radius / pixel).ceil().min(MAX_SAMPLE_RADIUS as f32) as u32;
        let center = (sample.as_vec3() / last - 0.5) * bounds;
        let affected_radius = (sample_radius as f32 + 1.0 + self.field.blur_radius() as f32) * pixel;

        Ok(EditTarget {
            sample,
            sample_radius,
            center,
            affected_radius,
        })
    }

    /// Apply a brush at `point` and rebuild the touched chunks.
    ///
    /// Negative `weight` adds material, positive removes it. The change is
    /// scaled by the frame delta set with [`set_frame_delta`](Self::set_frame_delta).
    pub fn terraform(&mut self, point: Vec3, weight: f32, radius: f32) -> Result<TerraformReport> {
        self.ensure_live()?;
        if !weight.is_finite() {
            return Err(Error::Edit(format!("Edit weight {} is not finite", weight)));
        }
        let target = self.edit_target(point, radius)?;

        self.field
            .stamp(&mut self.backend, target.sample, target.sample_radius, weight, self.frame_delta)?;
        if self.field.is_smoothed() {
            let region = self.field.padded_region(target.sample, target.sample_radius);
            self.field.reprocess(&mut self.backend, region)?;
        }
        self.backend.wait_idle()?;

        self.invalidator.mark_sphere(
            self.chunks.iter().map(Chunk::bounds).enumerate(),
            target.center,
            target.affected_radius,
        );
        let regenerated = self.invalidator.take_dirty();

        let mut triangles = 0u32;
        for &index in &regenerated {
            triangles = triangles.saturating_add(self.regenerate_chunk(index)?);
        }

        self.stats.edits += 1;
        self.stats.last_edit_triangles = triangles;
        log::debug!(
            "Terraform at sample {} (r={}, w={}): {} chunks, {} triangles",
            target.sample,
            target.sample_radius,
            weight,
            regenerated.len(),
            triangles
        );

        Ok(TerraformReport {
            target,
            regenerated,
            triangles,
        })
    }

    /// Set the time step that scales edit weights
    pub fn set_frame_delta(&mut self, delta_time: f32) {
        if delta_time.is_finite() && delta_time >= 0.0 {
            self.frame_delta = delta_time;
        } else {
            log::warn!("Ignoring invalid frame delta {}", delta_time);
        }
    }

    pub fn frame_delta(&self) -> f32 {
        self.frame_delta
    }

    pub fn render_inputs(&self) -> Result<RenderInputs> {
        self.ensure_live()?;
        Ok(RenderInputs {
            density: self.field.processed()?,
            initial_density: self.snapshot,
            bounds_size: self.config.bounds_size,
        })
    }

    /// Read back the processed density samples
    pub fn read_density(&mut self) -> Result<Vec<f32>> {
        self.ensure_live()?;
        let processed = self.field.processed()?;
        self.backend.wait_idle()?;
        self.backend.read_volume(processed)
    }

    /// Release every backend resource and chunk mesh. Safe to call twice.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.staging.destroy(&mut self.backend);
        self.field.release(&mut self.backend);
        if let Some(snapshot) = self.snapshot.take() {
            self.backend.release_volume(snapshot);
        }
        for chunk in &mut self.chunks {
            chunk.release();
        }
        self.shut_down = true;
        log::info!("Terrain world shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, coord: ChunkCoord) -> Option<&Chunk> {
        if coord.as_uvec3().max_element() >= self.config.num_chunks {
            return None;
        }
        self.chunks.get(coord.index(self.config.num_chunks))
    }

    pub fn field(&self) -> &DensityField {
        &self.field
    }

    pub fn invalidator(&self) -> &ChunkInvalidator {
        &self.invalidator
    }

    pub fn stats(&self) -> WorldStats {
        self.stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn ensure_live(&self) -> Result<()> {
        if self.shut_down {
            return Err(Error::Resource("Terrain world has been shut down".to_string()));
        }
        Ok(())
    }
}

impl<B: ComputeBackend> Drop for TerrainWorld<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Dispatch the march kernel for `chunk` and rebuild its mesh
fn march_chunk<B: ComputeBackend>(
    backend: &mut B,
    staging: &mut TriangleStaging,
    field: &DensityField,
    config: &WorldConfig,
    chunk: &mut Chunk,
) -> Result<u32> {
    let n = config.num_points_per_axis;
    let buffer = staging.acquire(backend)?;

    let params = KernelParams::March(MarchParams {
        chunk_origin: chunk.coord.sample_origin(n).as_ivec3().to_array(),
        num_points_per_axis: n as i32,
        texture_size: field.size() as i32,
        iso_level: config.iso_level,
        planet_size: config.bounds_size,
        max_triangles: staging.max_triangles(),
    });
    let bindings = Bindings::new().source(field.processed()?).triangles(buffer);
    backend.dispatch(&params, &bindings, UVec3::splat(n - 1))?;

    chunk.begin_readback()?;
    let count = staging.drain(backend)?;
    chunk.create_mesh(staging.vertices(), count as usize * 3, config.use_flat_shading);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{Kernel, SoftwareBackend, TriangleBufferId, Vertex};
    use crate::math::Aabb;
    use std::cell::RefCell;
    use std::collections::{HashSet, VecDeque};
    use std::rc::Rc;

    fn small_config() -> WorldConfig {
        WorldConfig {
            num_chunks: 2,
            num_points_per_axis: 4,
            bounds_size: 8.0,
            ..Default::default()
        }
    }

    fn world(config: WorldConfig) -> TerrainWorld<SoftwareBackend> {
        TerrainWorld::new(config, SoftwareBackend::new().with_history()).unwrap()
    }

    #[derive(Default)]
    struct Script {
        live_volumes: HashSet<VolumeId>,
        live_buffers: HashSet<TriangleBufferId>,
        volume_budget: Option<usize>,
        forced_counts: VecDeque<u32>,
        /// (reported triangle count, requested vertex count)
        reads: Vec<(u32, u32)>,
        last_count: u32,
    }

    /// Software backend that tracks handles and can fake triangle counts
    struct ScriptedBackend {
        inner: SoftwareBackend,
        script: Rc<RefCell<Script>>,
    }

    impl ScriptedBackend {
        fn new(script: Rc<RefCell<Script>>) -> Self {
            Self { inner: SoftwareBackend::new(), script }
        }
    }

    impl ComputeBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn create_volume(&mut self, size: u32, label: &str) -> Result<VolumeId> {
            let mut script = self.script.borrow_mut();
            if let Some(budget) = script.volume_budget {
                if budget == 0 {
                    return Err(Error::Resource("out of volume budget".to_string()));
                }
                script.volume_budget = Some(budget - 1);
            }
            let id = self.inner.create_volume(size, label)?;
            script.live_volumes.insert(id);
            Ok(id)
        }

        fn release_volume(&mut self, volume: VolumeId) {
            self.script.borrow_mut().live_volumes.remove(&volume);
            self.inner.release_volume(volume);
        }

        fn copy_volume(&mut self, src: VolumeId, dst: VolumeId) -> Result<()> {
            self.inner.copy_volume(src, dst)
        }

        fn read_volume(&mut self, volume: VolumeId) -> Result<Vec<f32>> {
            self.inner.read_volume(volume)
        }

        fn create_triangle_buffer(&mut self, max_triangles: u32, label: &str) -> Result<TriangleBufferId> {
            let id = self.inner.create_triangle_buffer(max_triangles, label)?;
            self.script.borrow_mut().live_buffers.insert(id);
            Ok(id)
        }

        fn release_triangle_buffer(&mut self, buffer: TriangleBufferId) {
            self.script.borrow_mut().live_buffers.remove(&buffer);
            self.inner.release_triangle_buffer(buffer);
        }

        fn reset_counter(&mut self, buffer: TriangleBufferId) -> Result<()> {
            self.inner.reset_counter(buffer)
        }

        fn read_triangle_count(&mut self, buffer: TriangleBufferId) -> Result<u32> {
            let real = self.inner.read_triangle_count(buffer)?;
            let mut script = self.script.borrow_mut();
            let count = script.forced_counts.pop_front().unwrap_or(real);
            script.last_count = count;
            Ok(count)
        }

        fn read_vertices(&mut self, buffer: TriangleBufferId, vertex_count: u32, out: &mut Vec<Vertex>) -> Result<()> {
            {
                let mut script = self.script.borrow_mut();
                let reported = script.last_count;
                script.reads.push((reported, vertex_count));
            }
            self.inner.read_vertices(buffer, vertex_count, out)
        }

        fn dispatch(&mut self, params: &KernelParams, bindings: &Bindings, threads: UVec3) -> Result<()> {
            self.inner.dispatch(params, bindings, threads)
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.inner.wait_idle()
        }
    }

    #[test]
    fn test_new_meshes_every_chunk_once() {
        let world = world(small_config());
        assert_eq!(world.chunks().len(), 8);
        let marches = world
            .backend()
            .history()
            .iter()
            .filter(|r| r.kernel() == Kernel::March)
            .count();
        assert_eq!(marches, 8);
        for chunk in world.chunks() {
            assert_eq!(chunk.generation(), 1);
            assert!(!chunk.mesh().is_empty());
        }
        assert_eq!(world.stats().chunk_regenerations, 8);
    }

    #[test]
    fn test_march_dispatch_per_chunk() {
        let world = world(small_config());
        let origins: HashSet<[i32; 3]> = world
            .backend()
            .history()
            .iter()
            .filter_map(|r| match r.params {
                KernelParams::March(p) => {
                    assert_eq!(r.threads, UVec3::splat(3));
                    assert_eq!(p.max_triangles, 27 * 5);
                    Some(p.chunk_origin)
                }
                _ => None,
            })
            .collect();
        assert_eq!(origins.len(), 8);
        assert!(origins.contains(&[3, 3, 3]));
        assert!(origins.contains(&[0, 3, 0]));
    }

    #[test]
    fn test_chunk_layout() {
        let world = world(small_config());
        for (index, chunk) in world.chunks().iter().enumerate() {
            assert_eq!(chunk.coord.index(2), index);
            assert_eq!(chunk.center, world.config().chunk_center(chunk.coord));
            assert_eq!(chunk.size, 4.0);
        }
        assert_eq!(world.chunks()[0].center, Vec3::splat(-2.0));
        assert!(world.chunk(ChunkCoord::new(2, 0, 0)).is_none());
    }

    #[test]
    fn test_neighbours_share_boundary_samples() {
        let config = small_config();
        let n = config.num_points_per_axis;
        let a = ChunkCoord::new(0, 1, 0).sample_origin(n);
        let b = ChunkCoord::new(1, 1, 0).sample_origin(n);
        // Last sample layer of a is the first of b
        assert_eq!(a.x + n - 1, b.x);
        assert_eq!(b.x + n - 1, config.texture_size() - 1);
    }

    fn seam_config() -> WorldConfig {
        WorldConfig {
            num_chunks: 2,
            num_points_per_axis: 5,
            bounds_size: 8.0,
            noise_height_multiplier: 0.2,
            noise_scale: 0.5,
            ..Default::default()
        }
    }

    /// Compare vertices on the x = 0 plane across each pair of neighbours.
    /// Returns how many seam vertices were found.
    fn assert_seams_match<B: ComputeBackend>(world: &TerrainWorld<B>) -> usize {
        let on_seam = |chunk: &Chunk| -> HashSet<[u32; 3]> {
            chunk
                .mesh()
                .positions
                .iter()
                .filter(|p| p.x == 0.0)
                .map(|p| [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()])
                .collect()
        };
        let mut found = 0;
        for (y, z) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
            let left = world.chunk(ChunkCoord::new(0, y, z)).unwrap();
            let right = world.chunk(ChunkCoord::new(1, y, z)).unwrap();
            let l = on_seam(left);
            assert_eq!(l, on_seam(right), "seam between chunks at y={} z={}", y, z);
            found += l.len();
        }
        found
    }

    #[test]
    fn test_seam_vertices_coincide() {
        let world = world(seam_config());
        for (y, z) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
            let left = world.chunk(ChunkCoord::new(0, y, z)).unwrap();
            assert!(left.mesh().positions.iter().any(|p| p.x == 0.0));
        }
        assert!(assert_seams_match(&world) > 0);
    }

    #[test]
    fn test_seams_hold_after_blurred_edits() {
        let mut world = world(WorldConfig { blur_map: true, blur_radius: 1, ..seam_config() });
        world.set_frame_delta(1.0);
        let edits = [
            (Vec3::new(0.2, -1.0, 0.6), 4.0, 1.5),
            (Vec3::new(-0.3, 1.2, -1.4), 3.0, 2.0),
            (Vec3::new(0.7, 2.5, 2.5), -2.0, 1.0),
            (Vec3::new(-0.9, -2.2, 1.8), 2.5, 1.2),
        ];
        for (point, weight, radius) in edits {
            let report = world.terraform(point, weight, radius).unwrap();
            assert!(!report.regenerated.is_empty());
            assert!(assert_seams_match(&world) > 0);
        }
    }

    #[test]
    fn test_sample_radius_monotone() {
        let world = world(small_config());
        let mut last = 0;
        for i in 1..200 {
            let target = world.edit_target(Vec3::ZERO, i as f32 * 0.05).unwrap();
            assert!(target.sample_radius >= last);
            assert!(target.sample_radius >= 1);
            last = target.sample_radius;
        }
    }

    #[test]
    fn test_large_brush_keeps_requested_radius() {
        let mut world = world(small_config());
        world.set_frame_delta(1.0);
        let before = world.read_density().unwrap();
        world.backend_mut().take_history();

        // Radius well past the world diagonal, centred on the (0,0,0) corner
        let report = world.terraform(Vec3::splat(-4.0), 1.0, 20.0).unwrap();
        assert_eq!(report.target.sample, IVec3::ZERO);
        assert_eq!(report.target.sample_radius, 18);
        assert_eq!(report.regenerated, (0..8).collect::<Vec<_>>());

        // The edit dispatch covers only the in-volume part of the brush
        let history = world.backend().history();
        assert_eq!(history[0].kernel(), Kernel::Edit);
        assert_eq!(history[0].threads, UVec3::splat(7));

        // Far corner sits at sqrt(3) * 6 < 0.7 * 18 samples: full weight
        let after = world.read_density().unwrap();
        assert!((after[342] - before[342] - 1.0).abs() < 1e-5);
        assert!(after.iter().zip(&before).all(|(a, b)| a > b));
    }

    #[test]
    fn test_huge_radius_is_capped() {
        let world = world(small_config());
        let target = world.edit_target(Vec3::ZERO, 1e30).unwrap();
        assert_eq!(target.sample_radius, MAX_SAMPLE_RADIUS);
        assert!(target.affected_radius.is_finite());
    }

    #[test]
    fn test_edit_target_conversion() {
        let world = world(small_config());
        let target = world.edit_target(Vec3::ZERO, 1.0).unwrap();
        assert_eq!(target.sample, IVec3::splat(3));
        assert_eq!(target.sample_radius, 1);
        assert_eq!(target.center, Vec3::ZERO);
        assert!((target.affected_radius - 2.0 * 8.0 / 7.0).abs() < 1e-6);

        // Outside the world clamps to the boundary
        let target = world.edit_target(Vec3::new(100.0, -100.0, 0.0), 1.0).unwrap();
        assert_eq!(target.sample, IVec3::new(6, 0, 3));
    }

    #[test]
    fn test_invalid_edits_rejected() {
        let mut world = world(small_config());
        for radius in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(world.terraform(Vec3::ZERO, 1.0, radius), Err(Error::Edit(_))));
        }
        assert!(matches!(world.terraform(Vec3::NAN, 1.0, 1.0), Err(Error::Edit(_))));
        assert!(matches!(world.terraform(Vec3::ZERO, f32::NAN, 1.0), Err(Error::Edit(_))));
        assert_eq!(world.stats().edits, 0);
    }

    #[test]
    fn test_removal_at_shared_corner() {
        let mut world = world(small_config());
        assert_eq!(world.field().size(), 7);
        let before: Vec<_> = world.chunks().iter().map(|c| c.mesh().clone()).collect();

        world.set_frame_delta(1.0);
        let report = world.terraform(Vec3::ZERO, 10.0, 1.0).unwrap();
        assert_eq!(report.target.sample, IVec3::splat(3));
        assert_eq!(report.regenerated, (0..8).collect::<Vec<_>>());

        let density = world.read_density().unwrap();
        assert_eq!(density[3 + 3 * 7 + 3 * 49], -0.5 + 10.0);

        for (chunk, old) in world.chunks().iter().zip(&before) {
            assert_eq!(chunk.generation(), 2);
            assert_ne!(chunk.mesh(), old);
        }
        assert_eq!(world.stats().edits, 1);
        assert_eq!(world.stats().last_edit_triangles, report.triangles);
    }

    #[test]
    fn test_regenerated_set_matches_sphere_test() {
        let config = WorldConfig {
            num_chunks: 3,
            num_points_per_axis: 4,
            bounds_size: 9.0,
            ..Default::default()
        };
        let mut world = world(config);
        let points = [
            Vec3::ZERO,
            Vec3::new(1.5, 1.5, 1.5),
            Vec3::new(-4.0, 0.3, 2.2),
            Vec3::new(4.5, 4.5, -4.5),
            Vec3::new(20.0, 0.0, 0.0),
        ];
        for point in points {
            for radius in [0.1, 0.8, 2.5] {
                let report = world.terraform(point, 1.0, radius).unwrap();
                let expected: Vec<usize> = world
                    .chunks()
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.bounds().intersects_sphere(report.target.center, report.target.affected_radius))
                    .map(|(i, _)| i)
                    .collect();
                assert_eq!(report.regenerated, expected, "point {} radius {}", point, radius);
                assert!(!report.regenerated.is_empty());
            }
        }
    }

    #[test]
    fn test_small_edit_touches_single_chunk() {
        let config = WorldConfig {
            num_chunks: 4,
            num_points_per_axis: 9,
            bounds_size: 32.0,
            ..Default::default()
        };
        let mut world = world(config);
        // Middle of chunk (0,0,0), far from every face
        let report = world.terraform(Vec3::splat(-12.0), 1.0, 0.5).unwrap();
        assert_eq!(report.regenerated, vec![0]);
        assert_eq!(world.invalidator().generation(0), 2);
        assert_eq!(world.invalidator().generation(1), 1);
    }

    #[test]
    fn test_blur_widens_affected_radius() {
        let sharp = world(small_config());
        let blurred = world(WorldConfig { blur_map: true, blur_radius: 2, ..small_config() });
        let a = sharp.edit_target(Vec3::ZERO, 1.0).unwrap();
        let b = blurred.edit_target(Vec3::ZERO, 1.0).unwrap();
        assert!((b.affected_radius - a.affected_radius - 2.0 * 8.0 / 7.0).abs() < 1e-5);
    }

    #[test]
    fn test_blurred_terraform_reprocesses_region() {
        let mut world = world(WorldConfig { blur_map: true, blur_radius: 1, ..small_config() });
        world.backend_mut().take_history();
        world.terraform(Vec3::ZERO, 5.0, 1.0).unwrap();
        let history = world.backend().history();
        assert_eq!(history[0].kernel(), Kernel::Edit);
        assert_eq!(history[1].kernel(), Kernel::Blur);
        assert_eq!(history[1].threads, UVec3::splat(5));
        assert!(history[2..].iter().all(|r| r.kernel() == Kernel::March));
    }

    #[test]
    fn test_snapshot_keeps_initial_density() {
        let mut world = world(small_config());
        let inputs = world.render_inputs().unwrap();
        let snapshot = inputs.initial_density.unwrap();
        assert_ne!(snapshot, inputs.density);
        assert_eq!(inputs.bounds_size, 8.0);

        let initial = world.read_density().unwrap();
        world.set_frame_delta(1.0);
        world.terraform(Vec3::ZERO, 3.0, 1.0).unwrap();
        assert_eq!(world.backend_mut().read_volume(snapshot).unwrap(), initial);
        assert_ne!(world.read_density().unwrap(), initial);
    }

    #[test]
    fn test_no_snapshot_when_disabled() {
        let world = world(WorldConfig { snapshot_initial_density: false, ..small_config() });
        assert_eq!(world.render_inputs().unwrap().initial_density, None);
        assert_eq!(world.backend().live_volumes(), 1);
    }

    #[test]
    fn test_frame_delta_scales_edits() {
        let mut world = world(small_config());
        assert_eq!(world.frame_delta(), DEFAULT_FRAME_DELTA);
        world.set_frame_delta(f32::NAN);
        world.set_frame_delta(-1.0);
        assert_eq!(world.frame_delta(), DEFAULT_FRAME_DELTA);

        world.set_frame_delta(0.5);
        let before = world.read_density().unwrap()[3 + 3 * 7 + 3 * 49];
        world.terraform(Vec3::ZERO, 2.0, 1.0).unwrap();
        let after = world.read_density().unwrap()[3 + 3 * 7 + 3 * 49];
        assert_eq!(after - before, 1.0);
    }

    #[test]
    fn test_read_back_bound_fuzzed() {
        let script = Rc::new(RefCell::new(Script::default()));
        let mut world = TerrainWorld::new(small_config(), ScriptedBackend::new(script.clone())).unwrap();
        let cap = world.config().max_triangles_per_chunk();

        {
            let mut s = script.borrow_mut();
            s.reads.clear();
            s.forced_counts = (0..=cap + 3).collect();
        }
        for i in 0..=(cap + 3) as usize {
            let triangles = world.regenerate_chunk(i % 8).unwrap();
            assert_eq!(triangles, (i as u32).min(cap));
        }

        let s = script.borrow();
        assert_eq!(s.reads.len(), cap as usize + 4);
        for &(reported, requested) in &s.reads {
            assert_eq!(requested, 3 * reported.min(cap));
        }
    }

    #[test]
    fn test_failed_snapshot_releases_everything() {
        let script = Rc::new(RefCell::new(Script { volume_budget: Some(2), ..Default::default() }));
        let config = WorldConfig { blur_map: true, ..small_config() };
        let result = TerrainWorld::new(config, ScriptedBackend::new(script.clone()));
        assert!(matches!(result, Err(Error::Resource(_))));

        let s = script.borrow();
        assert!(s.live_volumes.is_empty());
        assert!(s.live_buffers.is_empty());
    }

    #[test]
    fn test_invalid_config_allocates_nothing() {
        let script = Rc::new(RefCell::new(Script::default()));
        let config = WorldConfig { num_points_per_axis: 1, ..small_config() };
        assert!(matches!(
            TerrainWorld::new(config, ScriptedBackend::new(script.clone())),
            Err(Error::Config(_))
        ));
        assert!(script.borrow().live_volumes.is_empty());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let script = Rc::new(RefCell::new(Script::default()));
        let mut world = TerrainWorld::new(small_config(), ScriptedBackend::new(script.clone())).unwrap();
        assert_eq!(script.borrow().live_volumes.len(), 2);
        assert_eq!(script.borrow().live_buffers.len(), 1);

        world.shutdown();
        world.shutdown();
        assert!(world.is_shut_down());
        assert!(script.borrow().live_volumes.is_empty());
        assert!(script.borrow().live_buffers.is_empty());
        assert!(world.chunks().iter().all(|c| c.mesh().is_empty()));

        assert!(matches!(world.terraform(Vec3::ZERO, 1.0, 1.0), Err(Error::Resource(_))));
        assert!(world.render_inputs().is_err());
        drop(world);
        assert!(script.borrow().live_volumes.is_empty());
    }

    #[test]
    fn test_drop_releases_resources() {
        let script = Rc::new(RefCell::new(Script::default()));
        {
            let _world = TerrainWorld::new(small_config(), ScriptedBackend::new(script.clone())).unwrap();
        }
        assert!(script.borrow().live_volumes.is_empty());
        assert!(script.borrow().live_buffers.is_empty());
    }

    #[test]
    fn test_chunk_bounds_tile_world() {
        let world = world(small_config());
        let union = world
            .chunks()
            .iter()
            .map(Chunk::bounds)
            .fold(Aabb { min: Vec3::splat(f32::MAX), max: Vec3::splat(f32::MIN) }, |acc, b| {
                Aabb { min: acc.min.min(b.min), max: acc.max.max(b.max) }
            });
        assert_eq!(union.min, Vec3::splat(-4.0));
        assert_eq!(union.max, Vec3::splat(4.0));
    }
}
