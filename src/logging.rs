//! Structured logging setup.
//!
//! Uses `tracing` with `tracing-subscriber`. The filter comes from
//! `WHATSBLITZ_LOG` (falling back to `RUST_LOG`), the output format from
//! `WHATSBLITZ_LOG_FORMAT` (`pretty`, `compact`, or `json`).
//!
//! ```bash
//! WHATSBLITZ_LOG=whatsblitz=debug,warn whatsblitz gateway run
//! WHATSBLITZ_LOG_FORMAT=json whatsblitz gateway run
//! ```

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "whatsblitz=info,warn";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable with colors.
    #[default]
    Pretty,
    /// Compact single-line output.
    Compact,
    /// JSON output for log aggregation.
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Initialize the global tracing subscriber from the environment.
///
/// Call once at program start; later calls are ignored.
pub fn init_from_env() {
    let filter = std::env::var("WHATSBLITZ_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    let format = std::env::var("WHATSBLITZ_LOG_FORMAT")
        .map(|s| LogFormat::parse(&s))
        .unwrap_or_default();
    init(&filter, format);
}

/// Initialize the global tracing subscriber with an explicit filter/format.
pub fn init(filter: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match format {
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_target(true));
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        LogFormat::Compact => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact().with_target(true));
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        LogFormat::Pretty => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(true));
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing_is_case_insensitive() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("anything-else"), LogFormat::Pretty);
    }
}
