//! Tracing subscriber setup for the binaries.

use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};

/// Installs a stderr formatter filtered by `RUST_LOG` (default `paperrag=info`).
///
/// Calling it twice is harmless; the second install is ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "paperrag=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
