//! Logging initialization

/// Initialize the logging system
///
/// Uses env_logger with default filter level of `info`.
/// Override with RUST_LOG environment variable, e.g.
/// `RUST_LOG=isoterra=debug` to see per-edit chunk selection.
///
/// # Example
/// ```
/// isoterra::core::logging::init();
/// log::info!("Terrain tool started");
/// ```
pub fn init() {
    // try_init so doc tests and repeated calls don't panic
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    )
    .format_timestamp_millis()
    .try_init();
}
