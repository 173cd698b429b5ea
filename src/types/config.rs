//! Configuration structures.
//!
//! Loading these from a file is left to the embedding application; the crate
//! only defines the shape and defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Global connectivity-layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Where tool configuration documents are discovered.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Circuit breaker thresholds applied to every tool.
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Budget defaults for tools whose RBAC block omits them.
    #[serde(default)]
    pub budget: BudgetDefaults,

    /// Audit log configuration.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Discovery locations, highest precedence first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Environment variable naming an override location.
    pub override_env: String,

    /// Project-local directory (relative to the working directory).
    pub project_dir: PathBuf,

    /// User-global directory. `None` when no home directory is known.
    pub user_dir: Option<PathBuf>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            override_env: "EVIDENCE_BRIDGE_TOOLS_PATH".to_string(),
            project_dir: PathBuf::from(".evidence-bridge/tools"),
            user_dir: std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config/evidence-bridge/tools")),
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures within `failure_window` that open the breaker.
    pub failure_threshold: usize,

    #[serde(with = "humantime_serde")]
    pub failure_window: Duration,

    /// A successful call slower than this counts as a slow call.
    #[serde(with = "humantime_serde")]
    pub latency_threshold: Duration,

    /// Consecutive slow calls that open the breaker.
    pub slow_call_limit: usize,

    /// How long the breaker stays open before allowing a trial call.
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            latency_threshold: Duration::from_secs(5),
            slow_call_limit: 3,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Budget defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetDefaults {
    pub max_calls_per_minute: u32,
    pub max_concurrent_calls: u32,

    /// Trailing window for the rate limit.
    #[serde(with = "humantime_serde")]
    pub rate_window: Duration,
}

impl Default for BudgetDefaults {
    fn default() -> Self {
        Self {
            max_calls_per_minute: 60,
            max_concurrent_calls: 4,
            rate_window: Duration::from_secs(60),
        }
    }
}

/// Audit log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Append-only JSON-lines file. In-memory only when unset.
    pub path: Option<PathBuf>,

    /// Error messages longer than this are truncated in audit records.
    pub max_error_len: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_error_len: 256,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
