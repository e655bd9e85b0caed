pub mod collect;
pub mod show;

use tracing_subscriber::EnvFilter;

use crate::config::{CollectorConfig, LogFormat};

/// `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &CollectorConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // A second init (tests, embedding) is harmless.
    let _ = match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.with_target(false).try_init(),
    };
}
