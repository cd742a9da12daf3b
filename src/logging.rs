use anyhow::Result;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initializes tracing: console output always, plus a plain-text file layer
/// when a log path is given. `RUST_LOG` overrides the configured level.
pub fn init_logging(log_level: &str, log_file: Option<&Path>) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true);

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            let file_layer = fmt::layer()
                .with_timer(UtcTime::rfc_3339())
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            registry
                .with(file_layer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;
        }
        None => {
            registry
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;
        }
    }

    Ok(())
}
