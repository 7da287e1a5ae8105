//! Subscriber construction.
//!
//! The filter comes from `RUST_LOG` and falls back to `info`. Engine events
//! carry `company_id` and the document ids as structured fields, so the JSON
//! output keeps them as keys rather than folding them into the message.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

pub const FORMAT_ENV: &str = "STOCKLEDGER_LOG_FORMAT";

const DEFAULT_FILTER: &str = "info";

static INIT: Once = Once::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }

    /// Format named by `STOCKLEDGER_LOG_FORMAT`, JSON when unset.
    pub fn from_env() -> Self {
        Self::from_var(std::env::var(FORMAT_ENV).ok().as_deref())
    }

    fn from_var(value: Option<&str>) -> Self {
        value.map(Self::parse).unwrap_or_default()
    }
}

/// Install the global subscriber in the format named by the environment.
/// Calling it again is a no-op.
pub fn init() {
    init_with(LogFormat::from_env());
}

pub fn init_with(format: LogFormat) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false);

        // another subscriber may already be installed by a host process
        let _ = match format {
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Pretty => builder.pretty().try_init(),
        };
    });
}
