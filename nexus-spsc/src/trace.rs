//! Structured logging for queue lifecycle events.
//!
//! Enable with `--features tracing`. All trace macros become no-ops when
//! the feature is disabled, so a default build carries no logging code at
//! all. Nothing is ever logged on the push/pop path, only at construction
//! and destruction.

/// Initialize a `tracing` subscriber that prints queue lifecycle events.
///
/// Honors `RUST_LOG`; defaults to `nexus_spsc=debug`. Intended for tests,
/// benchmarks and small binaries that don't install their own subscriber.
/// Does nothing if the `tracing` feature is not enabled, and does nothing
/// if a global subscriber is already set.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nexus_spsc=debug"));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_file(false)
                .with_line_number(false)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .try_init();
}

/// Initialize a `tracing` subscriber (no-op without the `tracing` feature).
#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, trace, warn};

#[cfg(not(feature = "tracing"))]
macro_rules! debug_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use debug_noop as debug;
#[cfg(not(feature = "tracing"))]
pub(crate) use trace_noop as trace;
#[cfg(not(feature = "tracing"))]
pub(crate) use warn_noop as warn;
