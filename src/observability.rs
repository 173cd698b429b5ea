//! Observability utilities.

use crate::types::ObservabilityConfig;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Env var switching log output to JSON.
pub const LOG_FORMAT_ENV: &str = "EVIDENCE_BRIDGE_LOG_FORMAT";

/// Initialize tracing with default settings.
pub fn init_tracing() {
    init_tracing_with(&ObservabilityConfig::default());
}

/// Initialize tracing subscriber once for the process.
///
/// `RUST_LOG` wins over `config.log_level`. Output is compact text unless
/// `config.json_logs` is set or `EVIDENCE_BRIDGE_LOG_FORMAT=json`. Audit
/// records arrive on the `audit` target and can be filtered separately.
pub fn init_tracing_with(config: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
        let json = config.json_logs
            || std::env::var(LOG_FORMAT_ENV)
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false);

        let result = if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact())
                .try_init()
        };

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}
