//! Sets up structured logging for Diago binaries.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize a JSON-formatted tracing subscriber reading its filter
/// from `RUST_LOG`, falling back to `info` (or `debug` when
/// `Conf::debug` is set). Grounded on the teacher's `utils::trace`
/// setup, minus the Jaeger/OTLP exporters that this workspace has no
/// use for (Diago has no distributed-tracing collector to export to).
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = fmt().with_env_filter(filter).json().finish();
    // a second call to init() (e.g. in tests) is a no-op rather than a panic
    let _ = tracing::subscriber::set_global_default(subscriber);
}
