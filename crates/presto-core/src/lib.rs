// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

/// Installs the global `tracing` subscriber. Filtering follows `RUST_LOG`
/// (default `info`). Calling it twice is harmless.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// True when TRACE events are enabled. The binary checks it before building
/// per-frame diagnostics.
pub fn verbose_frames() -> bool {
    tracing::enabled!(tracing::Level::TRACE)
}
