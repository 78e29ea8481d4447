//! Tracing subscriber setup for the CLI.

use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. `RUST_LOG` wins over the verbosity
/// flag; the default level is `info`.
pub fn init(verbose: bool) {
    let fallback = if verbose { "labrig=debug" } else { "labrig=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
