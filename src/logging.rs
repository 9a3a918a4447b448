//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise `LOG_LEVEL` seeds the filter with
//! noisy dependencies turned down.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

fn default_directives(level: &str) -> String {
    format!(
        "{},numbr_backend={},sqlx=warn,hyper=warn,tower_http=info",
        level.to_lowercase(),
        level.to_lowercase()
    )
}

pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)))
}

/// Installs the global subscriber. Safe to call more than once; later calls are ignored.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = build_filter(config);
    let result = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Plain => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_lowercase_the_level() {
        let directives = default_directives("DEBUG");
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("numbr_backend=debug"));
        assert!(directives.contains("sqlx=warn"));
    }

    #[test]
    fn init_twice_does_not_panic() {
        let config = LoggingConfig {
            level: "INFO".to_string(),
            format: LogFormat::Plain,
        };
        init_tracing(&config);
        init_tracing(&config);
    }
}
