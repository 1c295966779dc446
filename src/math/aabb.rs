//! Axis-aligned bounding box

use crate::core::types::Vec3;

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create a cube centred on `center` with side length `size`
    pub fn cube(center: Vec3, size: f32) -> Self {
        let half = Vec3::splat(size * 0.5);
        Self {
            min: center - half,
            max: center + half,
        }
    }

    /// Check if a sphere touches or overlaps the box.
    ///
    /// A sphere whose surface exactly touches a face, edge or corner counts
    /// as intersecting.
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        center.clamp(self.min, self.max).distance_squared(center) <= radius * radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube() {
        let aabb = Aabb::cube(Vec3::new(2.0, 0.0, -2.0), 4.0);
        assert_eq!(aabb.min, Vec3::new(0.0, -2.0, -4.0));
        assert_eq!(aabb.max, Vec3::new(4.0, 2.0, 0.0));
    }

    #[test]
    fn test_sphere_inside_and_outside() {
        let aabb = Aabb::cube(Vec3::ZERO, 2.0);
        assert!(aabb.intersects_sphere(Vec3::ZERO, 0.1));
        assert!(aabb.intersects_sphere(Vec3::new(1.5, 0.0, 0.0), 0.75));
        assert!(!aabb.intersects_sphere(Vec3::new(3.0, 0.0, 0.0), 1.5));
    }

    #[test]
    fn test_sphere_touching_face_counts() {
        let aabb = Aabb::cube(Vec3::ZERO, 2.0);
        // Face at x = 1, sphere surface lands exactly on it
        assert!(aabb.intersects_sphere(Vec3::new(3.0, 0.0, 0.0), 2.0));
    }

    #[test]
    fn test_sphere_near_corner() {
        let aabb = Aabb::cube(Vec3::ZERO, 2.0);
        // Corner (1,1,1) is sqrt(3) * 1 away from (2,2,2)
        let center = Vec3::splat(2.0);
        assert!(!aabb.intersects_sphere(center, 1.7));
        assert!(aabb.intersects_sphere(center, 1.75));
    }
}
