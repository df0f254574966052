use std::sync::OnceLock;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt};

use crate::RagError;
use crate::config::LoggingConfig;

static TELEMETRY_GUARD: OnceLock<()> = OnceLock::new();

/// Crates whose debug output drowns the application's own events.
const NOISY_TARGETS: [&str; 6] = ["hyper", "hyper_util", "reqwest", "h2", "tonic", "qdrant_client"];

/// Configuration options when initialising telemetry.
#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    pub env_filter: Option<String>,
    pub json: bool,
    pub with_ansi: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            env_filter: None,
            json: false,
            with_ansi: true,
        }
    }
}

impl From<&LoggingConfig> for TelemetryOptions {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            env_filter: Some(config.level.clone()),
            json: config.json,
            with_ansi: !config.json,
        }
    }
}

/// Directive string: the base level followed by warn caps for noisy crates.
///
/// `RUST_LOG` wins over the configured level when present.
pub fn filter_directives(options: &TelemetryOptions) -> String {
    let base = std::env::var("RUST_LOG")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| options.env_filter.clone())
        .unwrap_or_else(|| "info".to_string());

    let mut directives = vec![base.to_ascii_lowercase()];
    directives.extend(NOISY_TARGETS.iter().map(|target| format!("{target}=warn")));
    directives.join(",")
}

/// Initialise the global tracing subscriber.
///
/// Safe to call multiple times; only the first invocation installs the subscriber.
pub fn init_telemetry(options: TelemetryOptions) -> Result<(), RagError> {
    if TELEMETRY_GUARD.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_new(filter_directives(&options))
        .map_err(|err| RagError::InvalidConfiguration(format!("invalid log filter: {err}")))?;

    let result = if options.json {
        fmt::Subscriber::builder()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_ansi(options.with_ansi)
            .with_writer(std::io::stderr)
            .try_init()
    };
    result.map_err(|err| {
        RagError::InvalidConfiguration(format!("telemetry init failed: {err}"))
    })?;

    TELEMETRY_GUARD.get_or_init(|| ());
    Ok(())
}

/// Span wrapping one CLI command; every event inside carries these fields.
pub fn cli_span(command: &str, graph: &str, session_id: &str) -> Span {
    tracing::info_span!(
        "cli",
        controller = "cli",
        command,
        graph,
        session_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_cap_noisy_crates() {
        let options = TelemetryOptions {
            env_filter: Some("DEBUG".to_string()),
            ..TelemetryOptions::default()
        };
        let directives = filter_directives(&options);
        if std::env::var("RUST_LOG").is_err() {
            assert!(directives.starts_with("debug,"));
        }
        assert!(directives.contains("reqwest=warn"));
        assert!(directives.contains("qdrant_client=warn"));
    }

    #[test]
    fn logging_config_maps_to_options() {
        let config = LoggingConfig {
            level: "warn".to_string(),
            json: true,
        };
        let options = TelemetryOptions::from(&config);
        assert_eq!(options.env_filter.as_deref(), Some("warn"));
        assert!(options.json);
        assert!(!options.with_ansi);
    }
}
