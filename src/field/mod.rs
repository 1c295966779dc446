//! Scalar field store: the raw and processed density volumes.
//!
//! The raw volume receives generation and edit stamps. The processed volume
//! is what chunks triangulate: a box-filtered copy of raw when smoothing is
//! enabled, otherwise the very same volume handle.

use crate::compute::{
    BlurParams, Bindings, ComputeBackend, DensityParams, EditParams, KernelParams, VolumeId,
};
use crate::core::error::Error;
use crate::core::types::{IVec3, Result, UVec3};
use crate::math::SampleRegion;

/// Inputs of the density function
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DensitySettings {
    /// World-space side length of the whole volume
    pub bounds_size: f32,
    pub noise_scale: f32,
    pub noise_height_multiplier: f32,
    pub seed: u32,
}

/// Raw and processed density volumes owned by one world
#[derive(Debug)]
pub struct DensityField {
    size: u32,
    raw: Option<VolumeId>,
    processed: Option<VolumeId>,
    blur_radius: Option<u32>,
}

impl DensityField {
    /// Allocate the field on `backend`.
    ///
    /// `smoothing` is the blur half-width; `None` makes processed alias raw.
    pub fn initialize<B: ComputeBackend>(backend: &mut B, size: u32, smoothing: Option<u32>) -> Result<Self> {
        if size == 0 {
            return Err(Error::Config("Density volume size must be greater than zero".to_string()));
        }

        let raw = backend.create_volume(size, "raw_density")?;
        let processed = match smoothing {
            Some(_) => match backend.create_volume(size, "processed_density") {
                Ok(id) => id,
                Err(e) => {
                    backend.release_volume(raw);
                    return Err(e);
                }
            },
            None => raw,
        };

        log::debug!(
            "Density field allocated: {}^3 samples, smoothing {:?}",
            size,
            smoothing
        );

        Ok(Self {
            size,
            raw: Some(raw),
            processed: Some(processed),
            blur_radius: smoothing,
        })
    }

    /// Samples per side
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn raw(&self) -> Result<VolumeId> {
        self.raw.ok_or_else(|| Error::Resource("Density field has been released".to_string()))
    }

    pub fn processed(&self) -> Result<VolumeId> {
        self.processed.ok_or_else(|| Error::Resource("Density field has been released".to_string()))
    }

    /// Whether processed is a separate smoothed volume
    pub fn is_smoothed(&self) -> bool {
        self.blur_radius.is_some()
    }

    /// Blur half-width, zero when smoothing is off
    pub fn blur_radius(&self) -> u32 {
        self.blur_radius.unwrap_or(0)
    }

    /// Fill raw from the density function, then smooth the whole volume
    pub fn generate<B: ComputeBackend>(&mut self, backend: &mut B, settings: &DensitySettings) -> Result<()> {
        let raw = self.raw()?;
        let params = KernelParams::Density(DensityParams {
            texture_size: self.size,
            planet_size: settings.bounds_size,
            noise_scale: settings.noise_scale,
            noise_height_multiplier: settings.noise_height_multiplier,
            seed: settings.seed,
            _pad: [0; 3],
        });
        backend.dispatch(&params, &Bindings::new().target(raw), UVec3::splat(self.size))?;
        self.reprocess(backend, SampleRegion::full(self.size))?;
        backend.wait_idle()
    }

    /// Add a weighted sphere of `sample_radius` around `centre` to raw
    pub fn stamp<B: ComputeBackend>(
        &mut self,
        backend: &mut B,
        centre: IVec3,
        sample_radius: u32,
        weight: f32,
        delta_time: f32,
    ) -> Result<()> {
        let raw = self.raw()?;
        // Only the part of the brush cube inside the volume is dispatched
        let region = SampleRegion::around(centre, sample_radius).clamped(self.size);
        if region.is_empty() {
            return Ok(());
        }
        let mut edit = EditParams::new(centre, sample_radius, self.size, weight, delta_time);
        edit.dispatch_origin = region.min.to_array();
        backend.dispatch(&KernelParams::Edit(edit), &Bindings::new().target(raw), region.extent())
    }

    /// Re-run smoothing over `region`; no-op without smoothing
    pub fn reprocess<B: ComputeBackend>(&mut self, backend: &mut B, region: SampleRegion) -> Result<()> {
        let Some(blur_radius) = self.blur_radius else {
            return Ok(());
        };
        let region = region.clamped(self.size);
        if region.is_empty() {
            return Ok(());
        }

        let params = KernelParams::Blur(BlurParams {
            region_origin: region.min.to_array(),
            blur_radius: blur_radius as i32,
            texture_size: self.size as i32,
            _pad: [0; 3],
        });
        let bindings = Bindings::new().source(self.raw()?).target(self.processed()?);
        backend.dispatch(&params, &bindings, region.extent())
    }

    /// Region touched by an edit of `sample_radius` once smoothing spreads it
    pub fn padded_region(&self, centre: IVec3, sample_radius: u32) -> SampleRegion {
        SampleRegion::around(centre, sample_radius.saturating_add(self.blur_radius()))
    }

    /// Free both volumes. Safe to call more than once.
    pub fn release<B: ComputeBackend>(&mut self, backend: &mut B) {
        let raw = self.raw.take();
        let processed = self.processed.take();
        if let Some(raw) = raw {
            backend.release_volume(raw);
        }
        if let Some(processed) = processed {
            if Some(processed) != raw {
                backend.release_volume(processed);
            }
        }
    }

    pub fn is_released(&self) -> bool {
        self.raw.is_none()
    }
}
