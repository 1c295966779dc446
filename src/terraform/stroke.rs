//! Brush strokes: one continuous press of the terraform tool

use crate::core::types::{Quat, Vec3};

/// What a stroke does to the terrain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrushMode {
    /// Deposit material (negative edit weight)
    Add,
    /// Carve material away (positive edit weight)
    Remove,
}

impl BrushMode {
    /// Signed edit weight for a tool of `strength`
    pub fn weight(&self, strength: f32) -> f32 {
        match self {
            BrushMode::Add => -strength,
            BrushMode::Remove => strength,
        }
    }
}

/// An active gesture.
///
/// The last hit is kept relative to the view orientation, so when the
/// pointer loses the terrain mid-stroke the brush keeps working at the same
/// spot in front of the viewer.
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    mode: BrushMode,
    anchor_local: Option<Vec3>,
    edits: u32,
}

impl Stroke {
    pub fn new(mode: BrushMode) -> Self {
        Self {
            mode,
            anchor_local: None,
            edits: 0,
        }
    }

    pub fn mode(&self) -> BrushMode {
        self.mode
    }

    /// Edits applied so far
    pub fn edits(&self) -> u32 {
        self.edits
    }

    /// Remember `point` as the latest edit, seen from `view`
    pub fn record(&mut self, point: Vec3, view: Quat) {
        self.anchor_local = Some(view.inverse() * point);
        self.edits += 1;
    }

    /// Last edit point re-expressed for the current `view`
    pub fn replay_point(&self, view: Quat) -> Option<Vec3> {
        self.anchor_local.map(|local| view * local)
    }
}
