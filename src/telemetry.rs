use tracing_subscriber::{fmt, EnvFilter};

/// Installs the JSON log subscriber. `RUST_LOG` overrides the default `info` level.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed, e.g. by a test harness.
    let _ = fmt().with_env_filter(filter).json().try_init();
}
