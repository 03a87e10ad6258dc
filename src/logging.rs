use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `FORGE_LOG=forge_reload=debug`.
pub const LOG_ENV: &str = "FORGE_LOG";

/// Install the stderr subscriber. Stdout belongs to the console.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    // a subscriber may already be set by an embedding program
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
