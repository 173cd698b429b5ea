//! Tool runtime state and health reporting.
//!
//! In-memory sliding-window execution samples per tool, plus the breaker that
//! derives the tool's health. The sample window feeds reporting (success rate,
//! latency, error patterns); availability decisions belong to the breaker.

use crate::tools::breaker::{BreakerState, CircuitBreaker};
use crate::types::{BreakerConfig, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Health as seen by status readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ready,
    Degraded,
    Offline,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Ready => "ready",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Offline => "offline",
        }
    }
}

/// Default number of samples kept per tool.
pub const DEFAULT_SAMPLE_WINDOW: usize = 100;

// =============================================================================
// Samples
// =============================================================================

/// Single execution sample.
#[derive(Debug, Clone)]
struct Sample {
    success: bool,
    latency: Duration,
    at: Instant,
    error: Option<ErrorKind>,
}

/// Fixed-size window of recent samples.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, success: bool, latency: Duration, error: Option<ErrorKind>, at: Instant) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            success,
            latency,
            at,
            error,
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn success_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let ok = self.samples.iter().filter(|s| s.success).count();
        ok as f64 / self.samples.len() as f64
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: u128 = self.samples.iter().map(|s| s.latency.as_millis()).sum();
        sum as f64 / self.samples.len() as f64
    }

    pub fn errors_since(&self, cutoff: Instant) -> usize {
        self.samples
            .iter()
            .filter(|s| !s.success && s.at >= cutoff)
            .count()
    }

    /// Error kinds by frequency, most common first.
    pub fn error_patterns(&self) -> Vec<(ErrorKind, usize)> {
        let mut counts: HashMap<ErrorKind, usize> = HashMap::new();
        for sample in self.samples.iter().filter(|s| !s.success) {
            *counts.entry(sample.error.unwrap_or(ErrorKind::Internal)).or_default() += 1;
        }
        let mut patterns: Vec<(ErrorKind, usize)> = counts.into_iter().collect();
        patterns.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
        patterns
    }
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_WINDOW)
    }
}

// =============================================================================
// Runtime state
// =============================================================================

/// Cumulative per-tool counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCounters {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub denied: u64,
    pub rate_limited: u64,
    pub health_checks: u64,
}

/// Mutable runtime state owned by one registry entry.
#[derive(Debug, Clone)]
pub struct ToolRuntimeState {
    pub breaker: CircuitBreaker,
    pub samples: SampleWindow,
    pub counters: ToolCounters,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
}

impl ToolRuntimeState {
    pub fn new(breaker: BreakerConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(breaker),
            samples: SampleWindow::default(),
            counters: ToolCounters::default(),
            last_checked: None,
            last_used: None,
        }
    }

    pub fn health(&self) -> HealthStatus {
        self.breaker.health()
    }

    /// Snapshot for status readers.
    pub fn report(&self, tool_name: &str, now: Instant) -> ToolHealthReport {
        let mut issues = Vec::new();
        match self.breaker.state() {
            BreakerState::Open => issues.push(format!(
                "Circuit breaker open, retry in {}s",
                self.breaker.retry_after(now).as_secs()
            )),
            BreakerState::HalfOpen => {
                issues.push("Circuit breaker half-open, trial call pending".to_string())
            }
            BreakerState::Closed => {}
        }
        let recent = self.breaker.failure_count(now);
        if recent > 0 {
            issues.push(format!("{} recent failures in breaker window", recent));
        }

        ToolHealthReport {
            tool_name: tool_name.to_string(),
            status: self.health(),
            breaker_state: self.breaker.state(),
            success_rate: self.samples.success_rate(),
            avg_latency_ms: self.samples.avg_latency_ms(),
            last_latency_ms: self.breaker.last_latency().map(|d| d.as_millis() as u64),
            sample_count: self.samples.len(),
            recent_failures: recent,
            error_patterns: self.samples.error_patterns(),
            counters: self.counters.clone(),
            last_checked: self.last_checked,
            last_used: self.last_used,
            issues,
        }
    }
}

// =============================================================================
// Health report
// =============================================================================

/// Health report for a single tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolHealthReport {
    pub tool_name: String,
    pub status: HealthStatus,
    pub breaker_state: BreakerState,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub last_latency_ms: Option<u64>,
    pub sample_count: usize,
    pub recent_failures: usize,
    pub error_patterns: Vec<(ErrorKind, usize)>,
    pub counters: ToolCounters,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub issues: Vec<String>,
}

/// Counts by health status across the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub ready: usize,
    pub degraded: usize,
    pub offline: usize,
}

impl HealthSummary {
    pub fn add(&mut self, status: HealthStatus) {
        match status {
            HealthStatus::Ready => self.ready += 1,
            HealthStatus::Degraded => self.degraded += 1,
            HealthStatus::Offline => self.offline += 1,
        }
    }

    /// Worst status present; Ready when empty.
    pub fn overall(&self) -> HealthStatus {
        if self.offline > 0 {
            HealthStatus::Offline
        } else if self.degraded > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ready
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window() {
        let window = SampleWindow::default();
        assert!(window.is_empty());
        assert_eq!(window.success_rate(), 0.0);
        assert_eq!(window.avg_latency_ms(), 0.0);
    }

    #[test]
    fn test_success_rate_and_latency() {
        let mut window = SampleWindow::new(10);
        let now = Instant::now();
        for _ in 0..8 {
            window.record(true, Duration::from_millis(100), None, now);
        }
        for _ in 0..2 {
            window.record(false, Duration::from_millis(300), Some(ErrorKind::Timeout), now);
        }
        assert!((window.success_rate() - 0.8).abs() < f64::EPSILON);
        assert!((window.avg_latency_ms() - 140.0).abs() < f64::EPSILON);
        assert_eq!(window.errors_since(now), 2);
    }

    #[test]
    fn test_sliding_window_eviction() {
        let mut window = SampleWindow::new(5);
        let now = Instant::now();
        for _ in 0..5 {
            window.record(false, Duration::ZERO, Some(ErrorKind::Spawn), now);
        }
        for _ in 0..5 {
            window.record(true, Duration::ZERO, None, now);
        }
        assert_eq!(window.len(), 5);
        assert!((window.success_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_patterns_sorted_by_frequency() {
        let mut window = SampleWindow::default();
        let now = Instant::now();
        window.record(false, Duration::ZERO, Some(ErrorKind::Timeout), now);
        window.record(false, Duration::ZERO, Some(ErrorKind::Timeout), now);
        window.record(false, Duration::ZERO, Some(ErrorKind::Protocol), now);

        let patterns = window.error_patterns();
        assert_eq!(patterns[0], (ErrorKind::Timeout, 2));
        assert_eq!(patterns[1], (ErrorKind::Protocol, 1));
    }

    #[test]
    fn test_report_reflects_breaker() {
        let mut state = ToolRuntimeState::new(BreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let now = Instant::now();
        let (admission, _) = state.breaker.try_acquire(now).unwrap();
        state.breaker.record_failure(admission, now, None);

        let report = state.report("aws", now);
        assert_eq!(report.status, HealthStatus::Offline);
        assert_eq!(report.breaker_state, BreakerState::Open);
        assert!(report.issues[0].contains("Circuit breaker open"));
    }

    #[test]
    fn test_summary_overall() {
        let mut summary = HealthSummary::default();
        assert_eq!(summary.overall(), HealthStatus::Ready);
        summary.add(HealthStatus::Ready);
        summary.add(HealthStatus::Degraded);
        assert_eq!(summary.overall(), HealthStatus::Degraded);
        summary.add(HealthStatus::Offline);
        assert_eq!(summary.overall(), HealthStatus::Offline);
    }

    #[test]
    fn test_health_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&HealthStatus::Offline).unwrap(), "\"offline\"");
    }
}
