//! CPU implementations of the terrain kernels.
//!
//! Each kernel mirrors its WGSL counterpart thread-for-thread: it receives
//! a thread id, bounds-checks it, and touches at most the samples that id
//! owns. The density kernel is evaluated slice-parallel with rayon since it
//! always covers the whole volume.

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rayon::prelude::*;

use crate::compute::tables::{CORNER_OFFSETS, EDGE_CORNERS, TRI_TABLE};
use crate::compute::types::{BlurParams, DensityParams, EditParams, MarchParams, Vertex};
use crate::core::types::{IVec3, UVec3, Vec3};

const NOISE_OCTAVES: usize = 6;

/// Linear index of a sample in a cubic volume of side `size`
#[inline]
pub fn sample_index(p: UVec3, size: u32) -> usize {
    let s = size as usize;
    p.x as usize + p.y as usize * s + p.z as usize * s * s
}

/// World-space position of sample coordinate `coord`
#[inline]
pub fn sample_to_world(coord: Vec3, size: u32, planet_size: f32) -> Vec3 {
    (coord / (size - 1) as f32 - 0.5) * planet_size
}

/// Returns `Some(sample)` when `p` lies inside the volume
#[inline]
fn in_volume(p: IVec3, size: i32) -> Option<UVec3> {
    if p.cmpge(IVec3::ZERO).all() && p.cmplt(IVec3::splat(size)).all() {
        Some(p.as_uvec3())
    } else {
        None
    }
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Density kernel over every thread in `threads` (padded dispatch range)
pub fn density(params: &DensityParams, data: &mut [f32], threads: UVec3) {
    let size = params.texture_size;
    if size < 2 {
        return;
    }
    let slice_len = size as usize * size as usize;
    let fbm = (params.noise_height_multiplier != 0.0)
        .then(|| Fbm::<Perlin>::new(params.seed).set_octaves(NOISE_OCTAVES));

    let half = params.planet_size * 0.5;
    let max_dist = Vec3::splat(half).length();
    let fudge = 1.0;

    data.par_chunks_mut(slice_len)
        .enumerate()
        .filter(|(z, _)| (*z as u32) < threads.z)
        .for_each(|(z, slice)| {
            for y in 0..size.min(threads.y) {
                for x in 0..size.min(threads.x) {
                    let coord = UVec3::new(x, y, z as u32);
                    let world = sample_to_world(coord.as_vec3(), size, params.planet_size);
                    let mut d = world.length() / (max_dist + fudge) - 0.5;
                    if let Some(fbm) = &fbm {
                        let p = (world * params.noise_scale).as_dvec3();
                        d += fbm.get(p.to_array()) as f32 * params.noise_height_multiplier;
                    }
                    slice[(x + y * size) as usize] = d;
                }
            }
        });
}

/// Edit kernel for a single thread
pub fn edit(params: &EditParams, data: &mut [f32], id: UVec3) {
    let size = params.texture_size;
    let Some(sample) = in_volume(IVec3::from_array(params.dispatch_origin) + id.as_ivec3(), size) else {
        return;
    };

    let offset = sample.as_ivec3() - IVec3::from_array(params.brush_centre);
    let sqr_dst = offset.length_squared() as f32;
    let radius = params.brush_radius as f32;
    if sqr_dst > radius * radius {
        return;
    }

    let brush_weight = if radius <= 0.0 {
        1.0
    } else {
        1.0 - smoothstep(radius * 0.7, radius, sqr_dst.sqrt())
    };
    data[sample_index(sample, size as u32)] += params.weight * params.delta_time * brush_weight;
}

/// Blur kernel for a single thread: box average of `source` into `target`
pub fn blur(params: &BlurParams, source: &[f32], target: &mut [f32], id: UVec3) {
    let size = params.texture_size;
    let Some(sample) = in_volume(IVec3::from_array(params.region_origin) + id.as_ivec3(), size) else {
        return;
    };

    let r = params.blur_radius.max(0);
    let lo = (sample.as_ivec3() - IVec3::splat(r)).max(IVec3::ZERO);
    let hi = (sample.as_ivec3() + IVec3::splat(r)).min(IVec3::splat(size - 1));

    let mut sum = 0.0f32;
    let mut count = 0u32;
    for z in lo.z..=hi.z {
        for y in lo.y..=hi.y {
            for x in lo.x..=hi.x {
                sum += source[sample_index(UVec3::new(x as u32, y as u32, z as u32), size as u32)];
                count += 1;
            }
        }
    }

    target[sample_index(sample, size as u32)] = sum / count as f32;
}

/// March kernel for a single thread. Calls `emit` once per triangle.
pub fn march(params: &MarchParams, source: &[f32], id: UVec3, mut emit: impl FnMut([Vertex; 3])) {
    let cells = (params.num_points_per_axis - 1).max(0) as u32;
    if id.x >= cells || id.y >= cells || id.z >= cells {
        return;
    }

    let size = params.texture_size as u32;
    let base = IVec3::from_array(params.chunk_origin) + id.as_ivec3();
    if base.cmplt(IVec3::ZERO).any() || (base + IVec3::ONE).cmpge(IVec3::splat(size as i32)).any() {
        return;
    }
    let base = base.as_uvec3();

    let corners: [UVec3; 8] = std::array::from_fn(|i| base + UVec3::from_array(CORNER_OFFSETS[i]));
    let mut config = 0usize;
    for (i, corner) in corners.iter().enumerate() {
        if source[sample_index(*corner, size)] < params.iso_level {
            config |= 1 << i;
        }
    }

    for tri in TRI_TABLE[config].chunks_exact(3).take_while(|t| t[0] >= 0) {
        let verts: [Vertex; 3] = std::array::from_fn(|k| {
            let [a, b] = EDGE_CORNERS[tri[k] as usize];
            edge_vertex(params, source, corners[a], corners[b])
        });
        emit(verts);
    }
}

/// Interpolate the surface crossing on the edge between samples `a` and `b`.
///
/// The endpoints are ordered by linear index first so neighbouring chunks,
/// which walk a shared edge from opposite cell corners, produce bit-identical
/// vertices on their common face.
fn edge_vertex(params: &MarchParams, source: &[f32], a: UVec3, b: UVec3) -> Vertex {
    let size = params.texture_size as u32;
    let (ia, ib) = (sample_index(a, size), sample_index(b, size));
    let (a, b, ia, ib) = if ia <= ib { (a, b, ia, ib) } else { (b, a, ib, ia) };

    let (va, vb) = (source[ia], source[ib]);
    let denom = vb - va;
    let t = if denom.abs() > f32::EPSILON {
        ((params.iso_level - va) / denom).clamp(0.0, 1.0)
    } else {
        0.5
    };

    let pa = sample_to_world(a.as_vec3(), size, params.planet_size);
    let pb = sample_to_world(b.as_vec3(), size, params.planet_size);
    let position = pa + t * (pb - pa);
    let normal = gradient(source, a, size)
        .lerp(gradient(source, b, size), t)
        .normalize_or_zero();

    Vertex {
        position: position.to_array(),
        normal: normal.to_array(),
        edge: [ia as u32, ib as u32],
    }
}

/// Central-difference density gradient, clamped at the volume border
fn gradient(source: &[f32], p: UVec3, size: u32) -> Vec3 {
    let max = size - 1;
    let at = |q: UVec3| source[sample_index(q, size)];
    let dx = at(UVec3::new((p.x + 1).min(max), p.y, p.z)) - at(UVec3::new(p.x.saturating_sub(1), p.y, p.z));
    let dy = at(UVec3::new(p.x, (p.y + 1).min(max), p.z)) - at(UVec3::new(p.x, p.y.saturating_sub(1), p.z));
    let dz = at(UVec3::new(p.x, p.y, (p.z + 1).min(max))) - at(UVec3::new(p.x, p.y, p.z.saturating_sub(1)));
    Vec3::new(dx, dy, dz).normalize_or_zero()
}
