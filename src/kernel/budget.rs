//! Per-tool consumption budgets.
//!
//! Three limits, checked in order once authorization has passed:
//! token estimate per call, calls per trailing rate window, and live
//! in-flight calls. A granted call holds a [`BudgetPermit`]; dropping it
//! releases the concurrency slot on every exit path.

use crate::tools::config::ToolConfig;
use crate::types::{BudgetDefaults, Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Sliding window of admitted-call timestamps.
#[derive(Debug)]
struct RateWindow {
    timestamps: VecDeque<Instant>,
    window: Duration,
}

impl RateWindow {
    fn new(window: Duration) -> Self {
        Self {
            timestamps: VecDeque::new(),
            window,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&ts) = self.timestamps.front() {
            if now.saturating_duration_since(ts) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.timestamps.len()
    }
}

/// Held for the duration of one granted call.
#[derive(Debug)]
pub struct BudgetPermit {
    _slot: OwnedSemaphorePermit,
}

/// Configured limits, for status readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetLimits {
    pub max_calls_per_minute: u32,
    pub max_concurrent_calls: u32,
    pub max_tokens_per_call: Option<u64>,
}

/// Rate and concurrency ledger for one tool.
#[derive(Debug)]
pub struct ToolBudget {
    tool: String,
    limits: BudgetLimits,
    rate: Mutex<RateWindow>,
    slots: Arc<Semaphore>,
}

impl ToolBudget {
    pub fn new(tool: impl Into<String>, limits: BudgetLimits, rate_window: Duration) -> Self {
        let limits = BudgetLimits {
            max_calls_per_minute: limits.max_calls_per_minute.max(1),
            max_concurrent_calls: limits.max_concurrent_calls.max(1),
            ..limits
        };
        Self {
            tool: tool.into(),
            limits,
            rate: Mutex::new(RateWindow::new(rate_window)),
            slots: Arc::new(Semaphore::new(limits.max_concurrent_calls as usize)),
        }
    }

    pub fn from_config(config: &ToolConfig, defaults: &BudgetDefaults) -> Self {
        let limits = BudgetLimits {
            max_calls_per_minute: config
                .rbac
                .max_calls_per_minute
                .unwrap_or(defaults.max_calls_per_minute),
            max_concurrent_calls: config
                .rbac
                .max_concurrent_calls
                .unwrap_or(defaults.max_concurrent_calls),
            max_tokens_per_call: config.rbac.max_tokens_per_call,
        };
        Self::new(config.name.clone(), limits, defaults.rate_window)
    }

    pub fn limits(&self) -> BudgetLimits {
        self.limits
    }

    /// Check every limit and, if all pass, take a rate slot and a concurrency slot.
    ///
    /// The rate check and the slot acquisition happen under one lock, so two
    /// racing callers cannot both take the last slot.
    pub fn acquire(&self, args: &Value, now: Instant) -> Result<BudgetPermit> {
        if let Some(limit) = self.limits.max_tokens_per_call {
            let estimated = estimate_tokens(args);
            if estimated > limit {
                return Err(Error::TokenBudgetExceeded {
                    tool: self.tool.clone(),
                    estimated,
                    limit,
                });
            }
        }

        let mut rate = self.rate.lock().unwrap_or_else(PoisonError::into_inner);
        if rate.count(now) >= self.limits.max_calls_per_minute as usize {
            return Err(Error::RateLimited {
                tool: self.tool.clone(),
                limit: self.limits.max_calls_per_minute,
            });
        }

        let slot = self
            .slots
            .clone()
            .try_acquire_owned()
            .map_err(|_| Error::ConcurrencyLimitExceeded {
                tool: self.tool.clone(),
                limit: self.limits.max_concurrent_calls,
            })?;

        rate.timestamps.push_back(now);
        Ok(BudgetPermit { _slot: slot })
    }

    /// Calls currently holding a slot.
    pub fn in_flight(&self) -> usize {
        (self.limits.max_concurrent_calls as usize).saturating_sub(self.slots.available_permits())
    }

    /// Calls admitted inside the trailing window.
    pub fn calls_in_window(&self, now: Instant) -> usize {
        self.rate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .count(now)
    }
}

/// Rough token estimate for a call's arguments: serialized bytes / 4, rounded up.
pub fn estimate_tokens(args: &Value) -> u64 {
    let bytes = serde_json::to_string(args).map(|s| s.len()).unwrap_or(0) as u64;
    bytes.div_ceil(4)
}
