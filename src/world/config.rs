//! World configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunk::ChunkCoord;
use crate::compute::tables::MAX_TRIANGLES_PER_CELL;
use crate::core::error::Error;
use crate::core::types::{Result, Vec3};
use crate::field::DensitySettings;

/// Terrain world settings, fixed for the lifetime of a world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Chunks along each axis
    pub num_chunks: u32,
    /// Density samples along each chunk axis, shared faces included
    pub num_points_per_axis: u32,
    /// World-space side length of the whole terrain cube
    pub bounds_size: f32,
    pub iso_level: f32,
    pub use_flat_shading: bool,
    pub noise_scale: f32,
    pub noise_height_multiplier: f32,
    /// Smooth the processed volume with a box blur
    pub blur_map: bool,
    /// Blur half-width in samples
    pub blur_radius: u32,
    pub seed: u32,
    /// Keep a copy of the freshly generated density for shading
    pub snapshot_initial_density: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            num_chunks: 4,
            num_points_per_axis: 10,
            bounds_size: 10.0,
            iso_level: 0.0,
            use_flat_shading: false,
            noise_scale: 1.0,
            noise_height_multiplier: 0.0,
            blur_map: false,
            blur_radius: 3,
            seed: 12345,
            snapshot_initial_density: true,
        }
    }
}

impl WorldConfig {
    /// Load a config from a JSON file; missing fields take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON
    pub fn save_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_chunks == 0 {
            return Err(Error::Config("num_chunks must be at least 1".to_string()));
        }
        if self.num_points_per_axis < 2 {
            return Err(Error::Config("num_points_per_axis must be at least 2".to_string()));
        }
        if !(self.bounds_size.is_finite() && self.bounds_size > 0.0) {
            return Err(Error::Config(format!("bounds_size must be positive, got {}", self.bounds_size)));
        }
        if !self.iso_level.is_finite() || !self.noise_scale.is_finite() || !self.noise_height_multiplier.is_finite() {
            return Err(Error::Config("iso_level and noise settings must be finite".to_string()));
        }
        let size = self.num_chunks as u64 * (self.num_points_per_axis as u64 - 1) + 1;
        if size > i32::MAX as u64 {
            return Err(Error::Config(format!("Density volume side {} is too large", size)));
        }
        // Staging holds three vertices per triangle, counted in u32
        let staging_vertices = (self.num_points_per_axis - 1)
            .checked_pow(3)
            .and_then(|cells| cells.checked_mul(MAX_TRIANGLES_PER_CELL * 3));
        if staging_vertices.is_none() {
            return Err(Error::Config(format!(
                "num_points_per_axis {} needs more triangle storage per chunk than fits in u32",
                self.num_points_per_axis
            )));
        }
        if (self.num_chunks as usize).checked_pow(3).is_none() {
            return Err(Error::Config(format!("num_chunks {} gives too many chunks", self.num_chunks)));
        }
        Ok(())
    }

    /// Samples per side of the density volume
    pub fn texture_size(&self) -> u32 {
        self.num_chunks * (self.num_points_per_axis - 1) + 1
    }

    /// World-space side length of one chunk
    pub fn chunk_size(&self) -> f32 {
        self.bounds_size / self.num_chunks as f32
    }

    /// World-space extent attributed to one sample when converting edit radii
    pub fn sample_world_size(&self) -> f32 {
        self.bounds_size / self.texture_size() as f32
    }

    /// Marching cells per chunk
    pub fn voxels_per_chunk(&self) -> u32 {
        (self.num_points_per_axis - 1).pow(3)
    }

    /// Triangle capacity needed for the densest possible chunk
    pub fn max_triangles_per_chunk(&self) -> u32 {
        self.voxels_per_chunk() * MAX_TRIANGLES_PER_CELL
    }

    pub fn chunk_count(&self) -> usize {
        (self.num_chunks as usize).pow(3)
    }

    /// World-space center of the chunk at `coord`
    pub fn chunk_center(&self, coord: ChunkCoord) -> Vec3 {
        let offset = -(self.num_chunks as f32 - 1.0) / 2.0;
        (Vec3::splat(offset) + coord.as_uvec3().as_vec3()) * self.chunk_size()
    }

    /// Blur half-width when smoothing is on
    pub fn smoothing(&self) -> Option<u32> {
        self.blur_map.then_some(self.blur_radius)
    }

    pub fn density_settings(&self) -> DensitySettings {
        DensitySettings {
            bounds_size: self.bounds_size,
            noise_scale: self.noise_scale,
            noise_height_multiplier: self.noise_height_multiplier,
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = WorldConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.texture_size(), 37);
        assert_eq!(config.max_triangles_per_chunk(), 729 * 5);
        assert_eq!(config.chunk_count(), 64);
    }

    #[test]
    fn test_texture_size_formula() {
        for num_chunks in 1..5 {
            for points in 2..8 {
                let config = WorldConfig { num_chunks, num_points_per_axis: points, ..Default::default() };
                assert_eq!(config.texture_size(), num_chunks * (points - 1) + 1);
            }
        }
    }

    #[test]
    fn test_chunk_centers() {
        let config = WorldConfig { num_chunks: 3, bounds_size: 9.0, ..Default::default() };
        for x in 0..3 {
            for y in 0..3 {
                for z in 0..3 {
                    let c = config.chunk_center(ChunkCoord::new(x, y, z));
                    let expected = Vec3::new(x as f32 - 1.0, y as f32 - 1.0, z as f32 - 1.0) * 3.0;
                    assert_eq!(c, expected);
                }
            }
        }

        let config = WorldConfig { num_chunks: 2, bounds_size: 8.0, ..Default::default() };
        assert_eq!(config.chunk_center(ChunkCoord::new(0, 0, 0)), Vec3::splat(-2.0));
        assert_eq!(config.chunk_center(ChunkCoord::new(1, 1, 1)), Vec3::splat(2.0));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            WorldConfig { num_chunks: 0, ..Default::default() },
            WorldConfig { num_points_per_axis: 1, ..Default::default() },
            WorldConfig { bounds_size: 0.0, ..Default::default() },
            WorldConfig { bounds_size: f32::NAN, ..Default::default() },
            WorldConfig { noise_scale: f32::INFINITY, ..Default::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(Error::Config(_))), "{:?}", config);
        }
    }

    #[test]
    fn test_validate_rejects_triangle_capacity_overflow() {
        // 999^3 cells * 5 triangles * 3 vertices does not fit in u32
        let config = WorldConfig { num_chunks: 1, num_points_per_axis: 1000, ..Default::default() };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = WorldConfig { num_chunks: 1, num_points_per_axis: 400, ..Default::default() };
        assert!(config.validate().is_ok());
        assert_eq!(config.max_triangles_per_chunk(), 399 * 399 * 399 * 5);
    }

    #[test]
    fn test_validate_rejects_chunk_count_overflow() {
        let config = WorldConfig { num_chunks: 3_000_000, num_points_per_axis: 2, ..Default::default() };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "num_chunks": 2, "blur_map": true }}"#).unwrap();

        let config = WorldConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.num_chunks, 2);
        assert!(config.blur_map);
        assert_eq!(config.num_points_per_axis, 10);
        assert_eq!(config.smoothing(), Some(3));
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.json");
        let config = WorldConfig { seed: 7, use_flat_shading: true, ..Default::default() };
        config.save_json_file(&path).unwrap();
        assert_eq!(WorldConfig::from_json_file(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "num_chunks": 0 }}"#).unwrap();
        assert!(matches!(WorldConfig::from_json_file(file.path()), Err(Error::Config(_))));

        assert!(matches!(WorldConfig::from_json_file("/nonexistent/world.json"), Err(Error::Io(_))));
    }
}
