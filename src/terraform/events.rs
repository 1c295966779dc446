//! Notifications published by the terraform tool

use crate::core::types::Vec3;

/// Something collaborators may want to react to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TerrainEvent {
    /// The terrain changed this frame
    Modified,
    /// Material was added around `point`; anything standing there may now
    /// be embedded in terrain
    MaterialAdded { point: Vec3, radius: f32 },
}
