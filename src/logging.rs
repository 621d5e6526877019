//! Structured logging set-up for the driver.

use std::str::FromStr;
use std::sync::Once;

use thiserror::Error;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Raised when a log format name is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown log format '{0}', expected 'text' or 'json'")]
pub struct UnknownLogFormat(pub String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(UnknownLogFormat(other.to_owned())),
        }
    }
}

/// Installs the global subscriber. Events go to stderr so that command
/// output on stdout stays machine readable.
///
/// `RUST_LOG` takes precedence over `level`. Only the first call has any
/// effect.
pub fn init(level: &str, format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        // A subscriber installed by the embedding process wins.
        let installed = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init(),
            LogFormat::Text => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
                .try_init(),
        };
        installed.ok();
    });
}

/// Span wrapping one lifecycle operation on a resource.
#[must_use]
pub fn operation_span(operation: &'static str, resource: &str) -> Span {
    tracing::info_span!("lifecycle", op = operation, resource = resource)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("text", LogFormat::Text)]
    #[case("JSON", LogFormat::Json)]
    #[case(" pretty ", LogFormat::Text)]
    fn formats_parse(#[case] raw: &str, #[case] expected: LogFormat) {
        assert_eq!(raw.parse::<LogFormat>(), Ok(expected));
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = "yaml".parse::<LogFormat>().expect_err("yaml is not a format");
        assert_eq!(err, UnknownLogFormat("yaml".to_owned()));
    }

    #[test]
    fn init_is_idempotent() {
        init("debug", LogFormat::Text);
        init("debug", LogFormat::Json);
        let span = operation_span("create_volume", "vp_data");
        let _entered = span.enter();
        tracing::info!("message inside span");
    }
}
