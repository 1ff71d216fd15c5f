use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber reading `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"flowgraph_core=info"`) when unset.
pub fn init_logging(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}
