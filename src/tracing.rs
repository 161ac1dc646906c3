use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Sets up the global tracing subscriber with a fmt formatter and env filter.
///
/// `RUST_LOG` wins when set. Otherwise a bare `LOG_LEVEL` (e.g. `DEBUG`) is
/// honored for the crate's own targets, and `default_filter` is the last
/// resort.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| {
            crate::util::env::env_opt("LOG_LEVEL")
                .and_then(|lvl| EnvFilter::try_new(level_filter(&lvl)).ok())
        })
        .unwrap_or_else(|| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

fn level_filter(level: &str) -> String {
    format!("{},sqlx=warn", level.trim().to_ascii_lowercase())
}
