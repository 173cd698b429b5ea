//! Tool configuration model.
//!
//! A [`ToolConfig`] is only ever built from a document that already passed
//! [`crate::tools::schema::validate`]; see [`crate::tools::schema::parse_document`].

use crate::tools::capability::CapabilityPattern;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// How the connectivity layer talks to a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Http => "http",
        }
    }
}

/// Delay schedule between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    None,
    Fixed,
    Exponential,
}

/// Bounded retry policy for transient transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: Backoff,
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,
}

fn default_base_delay() -> Duration {
    Duration::from_millis(200)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
            base_delay: default_base_delay(),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (1-based; the first attempt never waits).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let exp = (attempt - 2).min(16);
                self.base_delay.saturating_mul(1u32 << exp)
            }
        }
    }
}

/// Per-tool access and consumption policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RbacPolicy {
    /// role → allowed capability patterns.
    #[serde(default)]
    pub allowed_capabilities: BTreeMap<String, Vec<CapabilityPattern>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_calls_per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_calls: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens_per_call: Option<u64>,
}

/// A validated tool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub schema_version: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub transport: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub capabilities: Vec<CapabilityPattern>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub rbac: RbacPolicy,
}

fn default_enabled() -> bool {
    true
}

impl ToolConfig {
    /// Registry key: tool names are matched case-insensitively.
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    /// Replace `${VAR}` references in `env` values using `lookup`.
    ///
    /// Unknown variables expand to the empty string and are returned so the
    /// caller can report them.
    pub fn expand_env<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        for value in self.env.values_mut() {
            *value = expand_vars(value, &lookup, &mut missing);
        }
        missing.sort();
        missing.dedup();
        missing
    }
}

/// Expand `${VAR}` occurrences. An unterminated `${` is kept literally.
pub fn expand_vars<F>(input: &str, lookup: &F, missing: &mut Vec<String>) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                match lookup(var) {
                    Some(value) => out.push_str(&value),
                    None => missing.push(var.to_string()),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
