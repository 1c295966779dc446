//! Integer boxes in density-volume sample space

use crate::core::types::{IVec3, UVec3};

/// Inclusive box of sample indices `[min, max]` on every axis
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleRegion {
    pub min: IVec3,
    pub max: IVec3,
}

impl SampleRegion {
    /// Region covering a whole cubic volume of side `size`
    pub fn full(size: u32) -> Self {
        Self {
            min: IVec3::ZERO,
            max: IVec3::splat(size as i32 - 1),
        }
    }

    /// Cube of half-width `half_width` around `centre` (side `2 * half_width + 1`)
    pub fn around(centre: IVec3, half_width: u32) -> Self {
        let h = IVec3::splat(half_width.min(i32::MAX as u32) as i32);
        Self {
            min: centre.saturating_sub(h),
            max: centre.saturating_add(h),
        }
    }

    /// Intersect with a cubic volume of side `size`
    pub fn clamped(&self, size: u32) -> Self {
        let upper = IVec3::splat(size as i32 - 1);
        Self {
            min: self.min.max(IVec3::ZERO),
            max: self.max.min(upper),
        }
    }

    /// True when the region contains no samples
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    /// Number of samples along each axis
    pub fn extent(&self) -> UVec3 {
        if self.is_empty() {
            UVec3::ZERO
        } else {
            (self.max - self.min + IVec3::ONE).as_uvec3()
        }
    }
}
