//! Isoterra - chunked marching-cubes terrain with incremental terraforming

pub mod core;
pub mod math;
pub mod compute;
pub mod field;
pub mod chunk;
pub mod world;
pub mod terraform;
