//! Tracing-subscriber initialization. The library itself never installs a
//! subscriber — only `bin/namd_sim.rs` calls `init()` — so embedding
//! applications keep control of their own logging setup.

use tracing_subscriber::EnvFilter;

/// Installs a human-readable `fmt` subscriber honoring `RUST_LOG`,
/// defaulting to `info` when unset.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
