//! Process-wide `tracing` subscriber setup.

use std::sync::Once;

static INIT: Once = Once::new();

/// Filter used when neither a level nor `RUST_LOG` is given.
pub const DEFAULT_FILTER: &str = "warn";

/// Install a stderr subscriber once. An explicit `level` wins over
/// `RUST_LOG`; both fall back to [`DEFAULT_FILTER`].
pub fn init_with_level(level: Option<&str>) {
    INIT.call_once(|| {
        if tracing::dispatcher::has_been_set() {
            return;
        }

        let directive = resolve_filter(level, std::env::var("RUST_LOG").ok());
        let filter = tracing_subscriber::EnvFilter::try_new(&directive).unwrap_or_else(|e| {
            eprintln!("warning: invalid log filter '{directive}': {e}; falling back to '{DEFAULT_FILTER}'");
            tracing_subscriber::EnvFilter::new(DEFAULT_FILTER)
        });

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .without_time()
            .compact()
            .try_init();
    });
}

fn resolve_filter(level: Option<&str>, env: Option<String>) -> String {
    match level {
        Some(l) if !l.is_empty() => l.to_string(),
        _ => env
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
    }
}
