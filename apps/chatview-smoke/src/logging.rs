//! Tracing bootstrap for the smoke driver.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,chatview_smoke=debug,chatview_core=debug";
const FALLBACK_VARS: [&str; 2] = ["CHATVIEW_SMOKE_LOG", "CHATVIEW_LOG"];

/// Install the global subscriber.
///
/// Filter precedence: `RUST_LOG`, then `CHATVIEW_SMOKE_LOG`, then
/// `CHATVIEW_LOG`, then the built-in default.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_names(true)
        .with_env_filter(filter_from_env())
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    FALLBACK_VARS
        .iter()
        .filter_map(|key| env::var(key).ok())
        .filter(|value| !value.trim().is_empty())
        .find_map(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
