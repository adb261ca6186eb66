/// Tracing subscriber setup
///
/// Both initializers are idempotent: once a global subscriber is installed,
/// later calls leave it in place and return false.

use crate::config::CentralSettings;
use tracing_subscriber::EnvFilter;

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install a human readable subscriber. `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_filter))
        .try_init()
        .is_ok()
}

/// Install a JSON subscriber for log collection
pub fn init_tracing_json(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter(default_filter))
        .try_init()
        .is_ok()
}

/// Install a human readable subscriber filtered by `settings.log_filter`
pub fn init_tracing_from_settings(settings: &CentralSettings) -> bool {
    init_tracing(&settings.log_filter)
}
