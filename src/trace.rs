//! Logging shim.
//!
//! Built with `--features tracing` the macros below forward to the
//! `tracing` crate; without it they compile to nothing, so the hot paths
//! carry no logging cost in release deployments.

/// Installs a `tracing` subscriber suitable for binaries and tests.
///
/// Honors `RUST_LOG` when set, otherwise logs the crate at debug level.
/// A no-op when the `tracing` feature is disabled.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lockstride=debug"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing"))]
macro_rules! noop {
    ($($arg:tt)*) => {
        ()
    };
}

#[cfg(not(feature = "tracing"))]
pub(crate) use noop as debug;
#[cfg(not(feature = "tracing"))]
pub(crate) use noop as error;
#[cfg(not(feature = "tracing"))]
pub(crate) use noop as info;
#[cfg(not(feature = "tracing"))]
pub(crate) use noop as trace;
#[cfg(not(feature = "tracing"))]
pub(crate) use noop as warn;
