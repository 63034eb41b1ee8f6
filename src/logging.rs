use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber. An unparsable filter falls back to `info`.
pub fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init();
}
