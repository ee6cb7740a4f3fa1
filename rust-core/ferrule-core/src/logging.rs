//! # Logging
//!
//! `tracing` subscriber setup. `RUST_LOG` wins over the configured level;
//! `LOG_FORMAT=json` switches to one JSON object per line.

use tracing_subscriber::EnvFilter;

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// Read `LOG_FORMAT` from the environment
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT").map_or(Self::Pretty, |v| Self::parse(&v))
    }

    fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber
///
/// Returns `false` if one was already installed.
pub fn init(level: &str, format: LogFormat) -> bool {
    let builder = tracing_subscriber::fmt().with_env_filter(filter(level));
    match format {
        LogFormat::Json => builder.json().try_init().is_ok(),
        LogFormat::Pretty => builder.try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("text"), LogFormat::Pretty);
    }

    #[test]
    fn test_init_is_idempotent() {
        init("debug", LogFormat::Pretty);
        assert!(!init("debug", LogFormat::Json));
    }
}
