//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and carry
//! structured context (tool, role, limit, ...) rather than opaque strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// A tool configuration document failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct SchemaError {
    /// Dotted path of the offending field (`rbac.maxCallsPerMinute`).
    pub field: String,
    pub reason: String,
}

impl SchemaError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Why an authorization check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The role has no patterns configured for this tool.
    NoPatterns,
    /// The role has patterns, but none covers the capability.
    NoMatchingPattern,
    /// The tool does not advertise the requested capability.
    CapabilityNotOffered,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DenyReason::NoPatterns => "role has no capability patterns for this tool",
            DenyReason::NoMatchingPattern => "no pattern matches the capability",
            DenyReason::CapabilityNotOffered => "tool does not offer the capability",
        };
        f.write_str(text)
    }
}

/// Main error enum for the connectivity layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid tool configuration document.
    #[error("invalid tool config: {0}")]
    Schema(#[from] SchemaError),

    /// Two configs claim the same name within one admission scope.
    #[error("duplicate tool name: {name}")]
    DuplicateTool { name: String },

    #[error("tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("tool disabled: {name}")]
    ToolDisabled { name: String },

    #[error("permission denied: role '{role}' may not use '{capability}' on {tool} ({reason})")]
    PermissionDenied {
        role: String,
        tool: String,
        capability: String,
        reason: DenyReason,
    },

    #[error("rate limited: {tool} allows {limit} calls per minute")]
    RateLimited { tool: String, limit: u32 },

    #[error("concurrency limit exceeded: {tool} allows {limit} in-flight calls")]
    ConcurrencyLimitExceeded { tool: String, limit: u32 },

    #[error("token budget exceeded: {tool} call needs ~{estimated} tokens, limit is {limit}")]
    TokenBudgetExceeded {
        tool: String,
        estimated: u64,
        limit: u64,
    },

    /// Fast-fail: the tool's breaker is open, no transport attempt was made.
    #[error("circuit breaker open for {tool} (retry after {retry_after:?})")]
    BreakerOpen { tool: String, retry_after: Duration },

    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("call to {tool} timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    #[error("protocol error from {tool}: {detail}")]
    Protocol { tool: String, detail: String },

    #[error("transport closed for {tool}: {detail}")]
    TransportClosed { tool: String, detail: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Flat classification of [`Error`], used by audit records and health reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Schema,
    DuplicateTool,
    ToolNotFound,
    ToolDisabled,
    PermissionDenied,
    RateLimited,
    ConcurrencyLimitExceeded,
    TokenBudgetExceeded,
    BreakerOpen,
    Spawn,
    Timeout,
    Protocol,
    TransportClosed,
    Serialization,
    Io,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Schema => "schema",
            ErrorKind::DuplicateTool => "duplicate_tool",
            ErrorKind::ToolNotFound => "tool_not_found",
            ErrorKind::ToolDisabled => "tool_disabled",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ConcurrencyLimitExceeded => "concurrency_limit_exceeded",
            ErrorKind::TokenBudgetExceeded => "token_budget_exceeded",
            ErrorKind::BreakerOpen => "breaker_open",
            ErrorKind::Spawn => "spawn",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Protocol => "protocol",
            ErrorKind::TransportClosed => "transport_closed",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Schema(_) => ErrorKind::Schema,
            Error::DuplicateTool { .. } => ErrorKind::DuplicateTool,
            Error::ToolNotFound { .. } => ErrorKind::ToolNotFound,
            Error::ToolDisabled { .. } => ErrorKind::ToolDisabled,
            Error::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::ConcurrencyLimitExceeded { .. } => ErrorKind::ConcurrencyLimitExceeded,
            Error::TokenBudgetExceeded { .. } => ErrorKind::TokenBudgetExceeded,
            Error::BreakerOpen { .. } => ErrorKind::BreakerOpen,
            Error::Spawn { .. } => ErrorKind::Spawn,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Protocol { .. } => ErrorKind::Protocol,
            Error::TransportClosed { .. } => ErrorKind::TransportClosed,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Io(_) => ErrorKind::Io,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Errors worth another attempt under the tool's retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Spawn { .. } | Error::Timeout { .. } | Error::TransportClosed { .. }
        )
    }

    /// Errors that count against the tool's circuit breaker.
    pub fn is_transport_failure(&self) -> bool {
        self.is_transient() || matches!(self, Error::Protocol { .. })
    }

    /// Rejections decided before any transport attempt (audited as `denied`).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::ToolNotFound { .. }
                | Error::ToolDisabled { .. }
                | Error::PermissionDenied { .. }
                | Error::RateLimited { .. }
                | Error::ConcurrencyLimitExceeded { .. }
                | Error::TokenBudgetExceeded { .. }
        )
    }
}

// Convenience constructors
impl Error {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound { name: name.into() }
    }

    pub fn disabled(name: impl Into<String>) -> Self {
        Self::ToolDisabled { name: name.into() }
    }

    pub fn protocol(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Protocol {
            tool: tool.into(),
            detail: detail.into(),
        }
    }

    pub fn closed(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::TransportClosed {
            tool: tool.into(),
            detail: detail.into(),
        }
    }

    pub fn timeout(tool: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            tool: tool.into(),
            timeout,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
