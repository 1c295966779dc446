//! Terraform tool: turns pointer gestures into world edits.
//!
//! A [`Terraformer`] holds at most one [`Stroke`]. Hosts either drive
//! strokes explicitly (`begin_stroke` / `continue_stroke` / `end_stroke`)
//! or hand it one [`ToolInput`] per frame through [`Terraformer::update`].

pub mod config;
pub mod events;
pub mod stroke;

pub use config::ToolConfig;
pub use events::TerrainEvent;
pub use stroke::{BrushMode, Stroke};

use crate::compute::ComputeBackend;
use crate::core::types::{Quat, Result, Vec3};
use crate::world::{TerrainWorld, TerraformReport};

/// Input state for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolInput {
    /// Where the view ray met the terrain this frame, if anywhere
    pub hit: Option<Vec3>,
    /// Add button held
    pub add_held: bool,
    /// Remove button held
    pub remove_held: bool,
    /// Current view orientation
    pub view_rotation: Quat,
}

impl Default for ToolInput {
    fn default() -> Self {
        Self {
            hit: None,
            add_held: false,
            remove_held: false,
            view_rotation: Quat::IDENTITY,
        }
    }
}

/// Terraform tool state
#[derive(Debug)]
pub struct Terraformer {
    config: ToolConfig,
    stroke: Option<Stroke>,
    events: Vec<TerrainEvent>,
    edited_last_frame: bool,
}

impl Terraformer {
    pub fn new(config: ToolConfig) -> Self {
        Self {
            config,
            stroke: None,
            events: Vec::new(),
            edited_last_frame: false,
        }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    pub fn stroke(&self) -> Option<&Stroke> {
        self.stroke.as_ref()
    }

    /// Start a stroke at `point`, ending any stroke in progress
    pub fn begin_stroke<B: ComputeBackend>(
        &mut self,
        world: &mut TerrainWorld<B>,
        point: Vec3,
        mode: BrushMode,
        view: Quat,
    ) -> Result<Option<TerraformReport>> {
        self.end_stroke();
        self.stroke = Some(Stroke::new(mode));
        log::debug!("Begin {:?} stroke at {}", mode, point);
        self.apply(world, point, view)
    }

    /// Apply the active stroke at `hit`, or at the remembered point when
    /// there is no hit. Does nothing without an active stroke.
    pub fn continue_stroke<B: ComputeBackend>(
        &mut self,
        world: &mut TerrainWorld<B>,
        hit: Option<Vec3>,
        view: Quat,
    ) -> Result<Option<TerraformReport>> {
        let Some(stroke) = &self.stroke else {
            return Ok(None);
        };
        let point = hit.or_else(|| stroke.replay_point(view));
        match point {
            Some(point) => self.apply(world, point, view),
            None => Ok(None),
        }
    }

    /// Finish the active stroke, returning it
    pub fn end_stroke(&mut self) -> Option<Stroke> {
        let stroke = self.stroke.take();
        if let Some(s) = &stroke {
            log::debug!("End {:?} stroke after {} edits", s.mode(), s.edits());
        }
        stroke
    }

    /// Per-frame driver.
    ///
    /// Add takes priority over remove. A frame with a button held but no hit
    /// repeats the last edit only if the previous frame edited.
    pub fn update<B: ComputeBackend>(
        &mut self,
        world: &mut TerrainWorld<B>,
        input: &ToolInput,
    ) -> Result<Option<TerraformReport>> {
        let edited_last_frame = std::mem::take(&mut self.edited_last_frame);

        let mode = if input.add_held && self.config.allow_adding {
            Some(BrushMode::Add)
        } else if input.remove_held {
            Some(BrushMode::Remove)
        } else {
            None
        };
        let Some(mode) = mode else {
            self.end_stroke();
            return Ok(None);
        };

        let view = input.view_rotation;
        let continuing = self.stroke.as_ref().is_some_and(|s| s.mode() == mode);
        if !continuing {
            let replay = self
                .stroke
                .as_ref()
                .and_then(|s| s.replay_point(view))
                .filter(|_| edited_last_frame);
            return match input.hit.or(replay) {
                Some(point) => self.begin_stroke(world, point, mode, view),
                None => {
                    self.end_stroke();
                    Ok(None)
                }
            };
        }

        if input.hit.is_none() && !edited_last_frame {
            return Ok(None);
        }
        self.continue_stroke(world, input.hit, view)
    }

    /// Take the events published since the last call.
    ///
    /// Hosts drain once per frame: however many edits landed in between,
    /// the batch holds a single [`TerrainEvent::Modified`].
    pub fn drain_events(&mut self) -> Vec<TerrainEvent> {
        std::mem::take(&mut self.events)
    }

    fn apply<B: ComputeBackend>(
        &mut self,
        world: &mut TerrainWorld<B>,
        point: Vec3,
        view: Quat,
    ) -> Result<Option<TerraformReport>> {
        let Some(stroke) = self.stroke.as_mut() else {
            return Ok(None);
        };
        let mode = stroke.mode();
        if mode == BrushMode::Add && !self.config.allow_adding {
            return Ok(None);
        }

        let report = world.terraform(point, mode.weight(self.config.strength), self.config.radius)?;
        stroke.record(point, view);
        self.edited_last_frame = true;

        if !self.events.contains(&TerrainEvent::Modified) {
            self.events.push(TerrainEvent::Modified);
        }
        if mode == BrushMode::Add {
            self.events.push(TerrainEvent::MaterialAdded {
                point,
                radius: self.config.radius,
            });
        }
        Ok(Some(report))
    }
}

impl Default for Terraformer {
    fn default() -> Self {
        Self::new(ToolConfig::default())
    }
}
