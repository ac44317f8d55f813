//! Logging setup. Mirrors `original_source/.../_common.py`'s
//! `configure_logging`: pipeline milestones at INFO, per-entry detail at
//! DEBUG, third-party crates muted unless overridden via `RUST_LOG`.

use tracing_subscriber::{fmt, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ota_image_builder=info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
