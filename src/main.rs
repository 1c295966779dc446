//! Headless terraform demo.
//!
//! Builds a terrain world, then carves a ring of strokes through it and
//! logs what each edit rebuilt.
//!
//! Usage: cargo run --release -- [OPTIONS]
//!
//! Options:
//!   --config <PATH>   World config JSON (default: built-in defaults)
//!   --software        Use the CPU backend instead of the GPU
//!   --frames <N>      Frames of terraforming to simulate (default: 60)
//!   --radius <R>      Brush radius in world units (default: 5.0)

use std::path::PathBuf;
use std::time::Instant;

use isoterra::compute::{ComputeBackend, GpuBackend, SoftwareBackend};
use isoterra::core::logging;
use isoterra::core::time::FrameTimer;
use isoterra::core::types::{Quat, Result, Vec3};
use isoterra::terraform::{TerrainEvent, Terraformer, ToolConfig, ToolInput};
use isoterra::world::{TerrainWorld, WorldConfig};

fn main() {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = parse_str_arg(&args, "--config").map(PathBuf::from);
    let software = args.iter().any(|a| a == "--software");
    let frames = parse_u32_arg(&args, "--frames").unwrap_or(60);
    let radius = parse_f32_arg(&args, "--radius").unwrap_or(5.0);

    if let Err(e) = start(config_path, software, frames, radius) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn start(config_path: Option<PathBuf>, software: bool, frames: u32, radius: f32) -> Result<()> {
    let config = match config_path {
        Some(path) => WorldConfig::from_json_file(&path)?,
        None => WorldConfig::default(),
    };
    let tool = ToolConfig { radius, ..ToolConfig::default() };
    tool.validate()?;

    if software {
        return run(config, SoftwareBackend::new(), tool, frames);
    }
    match GpuBackend::new() {
        Ok(backend) => run(config, backend, tool, frames),
        Err(e) => {
            log::warn!("GPU backend unavailable ({}), falling back to software", e);
            run(config, SoftwareBackend::new(), tool, frames)
        }
    }
}

fn run<B: ComputeBackend>(config: WorldConfig, backend: B, tool: ToolConfig, frames: u32) -> Result<()> {
    let start = Instant::now();
    let mut world = TerrainWorld::new(config, backend)?;
    let vertices: usize = world.chunks().iter().map(|c| c.mesh().vertex_count()).sum();
    let triangles: usize = world.chunks().iter().map(|c| c.mesh().triangle_count()).sum();
    log::info!(
        "Built {} chunks ({} vertices, {} triangles) in {:.1}ms",
        world.chunks().len(),
        vertices,
        triangles,
        start.elapsed().as_secs_f64() * 1000.0
    );

    let mut terraformer = Terraformer::new(tool);
    let mut timer = FrameTimer::new();
    let orbit = world.config().bounds_size * 0.25;

    for frame in 0..frames {
        timer.tick();
        world.set_frame_delta(timer.delta_secs());

        // Sweep a ring, dropping the hit every fourth frame to exercise replay
        let angle = frame as f32 / frames.max(1) as f32 * std::f32::consts::TAU;
        let view_rotation = Quat::from_rotation_y(angle);
        let hit = (frame % 4 != 3).then(|| view_rotation * Vec3::new(0.0, 0.0, -orbit));
        let input = ToolInput {
            hit,
            add_held: frame >= frames / 2,
            remove_held: frame < frames / 2,
            view_rotation,
        };

        if let Some(report) = terraformer.update(&mut world, &input)? {
            log::info!(
                "Frame {}: edit at sample {} rebuilt {} chunks, {} triangles",
                frame,
                report.target.sample,
                report.regenerated.len(),
                report.triangles
            );
        }
        for event in terraformer.drain_events() {
            if let TerrainEvent::MaterialAdded { point, radius } = event {
                log::debug!("Material added at {} (r={})", point, radius);
            }
        }
    }
    terraformer.end_stroke();

    let stats = world.stats();
    log::info!(
        "Done: {} edits, {} chunk rebuilds in {:.1}ms",
        stats.edits,
        stats.chunk_regenerations,
        start.elapsed().as_secs_f64() * 1000.0
    );
    world.shutdown();
    Ok(())
}

fn parse_f32_arg(args: &[String], flag: &str) -> Option<f32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
