use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Parse a textual log level, falling back to `INFO` for unknown values.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}

/// Filter for the configured `log_level`. Directives in `RUST_LOG`, when
/// set, take precedence so individual crates can be tuned.
pub fn filter(log_level: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(parse_level(log_level)).into())
        .from_env_lossy()
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(log_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(log_level))
        .with_target(false)
        .try_init();
}
