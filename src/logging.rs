use tracing_subscriber::EnvFilter;

use crate::config::PrintLevel;

/// Installs a `tracing_subscriber` using `TAILSCAN_LOG` first, then `RUST_LOG`,
/// then the filter implied by `level`.
///
/// Log fields used across the crate: `id` for the scanned ID, `worker` for the
/// worker index and `tailmax` for range manager progress.
pub fn init(level: PrintLevel) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .try_init();
}

pub fn env_filter(level: PrintLevel) -> EnvFilter {
    EnvFilter::try_from_env("TAILSCAN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()))
}
