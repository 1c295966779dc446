//! Error types for the terrain pipeline

use thiserror::Error;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Binding error: {kernel} kernel has no {slot} binding")]
    Binding {
        kernel: &'static str,
        slot: &'static str,
    },

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Readback error: {0}")]
    Readback(String),

    #[error("Chunk error: {0}")]
    Chunk(String),

    #[error("Edit error: {0}")]
    Edit(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
