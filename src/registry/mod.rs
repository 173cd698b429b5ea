//! Tool registry.
//!
//! An explicit instance, constructed once and shared by reference. Each entry
//! ([`ToolHandle`]) owns its config, compiled access policy, budget ledger,
//! breaker/runtime state and at most one transport. Per-tool state sits behind
//! per-tool locks; the map lock is only held to look entries up or swap them,
//! so a slow or broken tool never blocks calls to another.

pub mod discovery;

pub use discovery::{DiscoveredTool, DiscoveryIssue, DiscoveryPaths, DiscoveryReport};

use crate::kernel::budget::ToolBudget;
use crate::tools::access::{RbacDecision, ToolAccessPolicy};
use crate::tools::breaker::{Admission, BreakerState, Transition};
use crate::tools::config::{ToolConfig, TransportKind};
use crate::tools::health::{HealthStatus, HealthSummary, ToolCounters, ToolHealthReport, ToolRuntimeState};
use crate::tools::schema::validate;
use crate::transport::codec::METHOD_PING;
use crate::transport::{DefaultTransportFactory, Transport, TransportFactory};
use crate::types::{BreakerConfig, BudgetDefaults, Config, Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

// =============================================================================
// Tool handle
// =============================================================================

/// One registered tool.
#[derive(Debug)]
pub struct ToolHandle {
    config: ToolConfig,
    source: Option<PathBuf>,
    enabled: AtomicBool,
    policy: ToolAccessPolicy,
    budget: ToolBudget,
    state: Mutex<ToolRuntimeState>,
    factory: Arc<dyn TransportFactory>,
    transport: tokio::sync::Mutex<Option<Arc<dyn Transport>>>,
}

impl ToolHandle {
    fn new(
        config: ToolConfig,
        source: Option<PathBuf>,
        breaker: &BreakerConfig,
        budget: &BudgetDefaults,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            policy: ToolAccessPolicy::from_config(&config),
            budget: ToolBudget::from_config(&config, budget),
            state: Mutex::new(ToolRuntimeState::new(breaker.clone())),
            factory,
            transport: tokio::sync::Mutex::new(None),
            source,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> &ToolAccessPolicy {
        &self.policy
    }

    pub fn budget(&self) -> &ToolBudget {
        &self.budget
    }

    fn state(&self) -> MutexGuard<'_, ToolRuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Breaker-derived health; a disabled tool is offline.
    pub fn health(&self) -> HealthStatus {
        if !self.is_enabled() {
            return HealthStatus::Offline;
        }
        self.state().health()
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.state().breaker.state()
    }

    pub fn counters(&self) -> ToolCounters {
        self.state().counters.clone()
    }

    pub fn report(&self) -> ToolHealthReport {
        let mut report = self.state().report(&self.config.name, Instant::now());
        if !self.is_enabled() {
            report.status = HealthStatus::Offline;
            report.issues.insert(0, "Tool disabled".to_string());
        }
        report
    }

    /// Ask the breaker for permission to place one transport attempt.
    pub fn admit(&self, now: Instant) -> Result<Admission> {
        let mut state = self.state();
        match state.breaker.try_acquire(now) {
            Ok((admission, transition)) => {
                drop(state);
                self.log_transition(transition);
                Ok(admission)
            }
            Err(retry_after) => Err(Error::BreakerOpen {
                tool: self.config.name.clone(),
                retry_after,
            }),
        }
    }

    /// Feed one attempt's outcome into the breaker and sample window.
    ///
    /// Only transport-level failures count against the breaker.
    pub fn record_attempt(&self, admission: Admission, latency: Duration, result: &Result<Value>) {
        let now = Instant::now();
        let mut state = self.state();
        state.counters.calls += 1;
        state.last_used = Some(Utc::now());
        let transition = match result {
            Ok(_) => {
                state.counters.successes += 1;
                state.samples.record(true, latency, None, now);
                state.breaker.record_success(admission, now, latency)
            }
            Err(e) => {
                state.counters.failures += 1;
                state.samples.record(false, latency, Some(e.kind()), now);
                if e.is_transport_failure() {
                    state.breaker.record_failure(admission, now, Some(latency))
                } else {
                    state.breaker.release(admission);
                    None
                }
            }
        };
        drop(state);
        self.log_transition(transition);
    }

    /// Count a call rejected before the transport stage.
    pub fn record_rejection(&self, error: &Error) {
        let mut state = self.state();
        match error {
            Error::RateLimited { .. } | Error::ConcurrencyLimitExceeded { .. } => {
                state.counters.rate_limited += 1
            }
            Error::BreakerOpen { .. } => state.counters.failures += 1,
            _ => state.counters.denied += 1,
        }
    }

    fn log_transition(&self, transition: Option<Transition>) {
        if let Some(t) = transition {
            match t.to {
                BreakerState::Open => tracing::warn!(
                    tool = %self.config.name,
                    from = ?t.from,
                    "circuit breaker opened"
                ),
                _ => tracing::info!(
                    tool = %self.config.name,
                    from = ?t.from,
                    to = ?t.to,
                    "circuit breaker transition"
                ),
            }
        }
    }

    /// The tool's transport, created on first use and opened if needed.
    ///
    /// Disabled tools get no transport. The enabled flag is read under the
    /// slot lock, and the open happens under it too, so a concurrent
    /// `disconnect` either sees the opened transport or prevents it.
    pub async fn connect(&self) -> Result<Arc<dyn Transport>> {
        let mut slot = self.transport.lock().await;
        if !self.is_enabled() {
            return Err(Error::disabled(&self.config.name));
        }
        let transport = match slot.as_ref() {
            Some(existing) => existing.clone(),
            None => {
                let created = self.factory.create(&self.config)?;
                *slot = Some(created.clone());
                created
            }
        };
        if !transport.is_open() {
            transport.open().await?;
        }
        Ok(transport)
    }

    /// Close and drop the transport, if any.
    pub async fn disconnect(&self) {
        let transport = self.transport.lock().await.take();
        if let Some(transport) = transport {
            transport.close().await;
        }
    }

    /// Handshake (when closed) or ping (when open) through the breaker.
    ///
    /// With the breaker open this only refreshes the timestamps; no transport
    /// is touched and nothing is spawned.
    pub async fn health_check(&self) -> ToolHealthReport {
        {
            let mut state = self.state();
            state.counters.health_checks += 1;
            state.last_checked = Some(Utc::now());
        }

        let admission = match self.admit(Instant::now()) {
            Ok(admission) => admission,
            Err(e) => {
                tracing::debug!(tool = %self.config.name, "health check skipped: {}", e);
                return self.report();
            }
        };

        let started = Instant::now();
        let result = self.probe().await;
        let latency = started.elapsed();
        {
            let mut state = self.state();
            let now = Instant::now();
            let transition = match &result {
                Ok(_) => {
                    state.samples.record(true, latency, None, now);
                    state.breaker.record_success(admission, now, latency)
                }
                Err(e) => {
                    state.samples.record(false, latency, Some(e.kind()), now);
                    if e.is_transport_failure() {
                        state.breaker.record_failure(admission, now, Some(latency))
                    } else {
                        state.breaker.release(admission);
                        None
                    }
                }
            };
            drop(state);
            self.log_transition(transition);
        }
        if let Err(e) = &result {
            tracing::warn!(tool = %self.config.name, "health check failed: {}", e);
        }
        self.report()
    }

    async fn probe(&self) -> Result<()> {
        let was_open = {
            let slot = self.transport.lock().await;
            slot.as_ref().is_some_and(|t| t.is_open())
        };
        let transport = self.connect().await?;
        if was_open {
            transport
                .call(METHOD_PING, json!({}), self.config.timeout)
                .await?;
        }
        Ok(())
    }
}

// =============================================================================
// Summaries
// =============================================================================

/// Listing entry for status readers.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: Option<String>,
    pub transport: TransportKind,
    pub enabled: bool,
    /// Roles with at least one capability grant.
    pub roles: Vec<String>,
    pub health: HealthStatus,
    pub breaker_state: BreakerState,
    pub counters: ToolCounters,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub source: Option<PathBuf>,
}

/// Registry-wide health.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub overall: HealthStatus,
    pub summary: HealthSummary,
    pub tools: Vec<ToolHealthReport>,
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug)]
pub struct Registry {
    tools: RwLock<HashMap<String, Arc<ToolHandle>>>,
    factory: Arc<dyn TransportFactory>,
    breaker: BreakerConfig,
    budget: BudgetDefaults,
}

impl Registry {
    pub fn new(config: &Config) -> Self {
        Self::with_factory(config, Arc::new(DefaultTransportFactory::new()))
    }

    pub fn with_factory(config: &Config, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            factory,
            breaker: config.breaker.clone(),
            budget: config.budget.clone(),
        }
    }

    fn handle_for(&self, config: ToolConfig, source: Option<PathBuf>) -> Arc<ToolHandle> {
        Arc::new(ToolHandle::new(
            config,
            source,
            &self.breaker,
            &self.budget,
            self.factory.clone(),
        ))
    }

    /// Admit one config built in code. The config is revalidated.
    pub async fn register(&self, config: ToolConfig) -> Result<Arc<ToolHandle>> {
        validate(&serde_json::to_value(&config)?)?;
        let key = config.key();
        let mut tools = self.tools.write().await;
        if tools.contains_key(&key) {
            return Err(Error::DuplicateTool { name: config.name });
        }
        let handle = self.handle_for(config, None);
        tools.insert(key, handle.clone());
        tracing::info!(tool = %handle.name(), "tool registered");
        Ok(handle)
    }

    /// Scan `paths` and admit every valid config. Entries with the same name
    /// are replaced and their transports closed; other entries are kept.
    pub async fn discover(&self, paths: &DiscoveryPaths) -> DiscoveryReport {
        let (found, report) = discovery::load(paths);

        let mut replaced = Vec::new();
        {
            let mut tools = self.tools.write().await;
            for tool in found {
                let key = tool.config.key();
                let handle = self.handle_for(tool.config, Some(tool.source));
                if let Some(old) = tools.insert(key, handle) {
                    replaced.push(old);
                }
            }
        }
        for old in replaced {
            old.disconnect().await;
        }

        tracing::info!(
            loaded = report.loaded.len(),
            overridden = report.overridden.len(),
            errors = report.errors.len(),
            "tool discovery complete"
        );
        report
    }

    pub async fn get(&self, name: &str) -> Result<Arc<ToolHandle>> {
        self.tools
            .read()
            .await
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| Error::not_found(name))
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(&name.to_lowercase())
    }

    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }

    async fn handles(&self) -> Vec<Arc<ToolHandle>> {
        let mut handles: Vec<_> = self.tools.read().await.values().cloned().collect();
        handles.sort_by(|a, b| a.config.key().cmp(&b.config.key()));
        handles
    }

    /// All tools, sorted by name, with current health.
    pub async fn list(&self) -> Vec<ToolSummary> {
        self.handles()
            .await
            .into_iter()
            .map(|h| {
                let state = h.state();
                let summary = ToolSummary {
                    name: h.config.name.clone(),
                    description: h.config.description.clone(),
                    transport: h.config.transport,
                    enabled: h.is_enabled(),
                    roles: h.policy.roles(),
                    health: if h.is_enabled() {
                        state.health()
                    } else {
                        HealthStatus::Offline
                    },
                    breaker_state: state.breaker.state(),
                    counters: state.counters.clone(),
                    last_checked: state.last_checked,
                    last_used: state.last_used,
                    source: h.source.clone(),
                };
                drop(state);
                summary
            })
            .collect()
    }

    pub async fn enable(&self, name: &str) -> Result<()> {
        let handle = self.get(name).await?;
        handle.enabled.store(true, Ordering::SeqCst);
        tracing::info!(tool = %handle.name(), "tool enabled");
        Ok(())
    }

    /// Disable a tool and tear its transport down.
    pub async fn disable(&self, name: &str) -> Result<()> {
        let handle = self.get(name).await?;
        handle.enabled.store(false, Ordering::SeqCst);
        handle.disconnect().await;
        tracing::info!(tool = %handle.name(), "tool disabled");
        Ok(())
    }

    /// Check whether `role` may invoke `capability` on `tool`.
    pub async fn authorize(&self, role: &str, tool: &str, capability: &str) -> Result<RbacDecision> {
        let handle = self.get(tool).await?;
        Ok(handle.policy.authorize(role, capability))
    }

    /// Probe one tool. Disabled tools are rejected.
    pub async fn health_check(&self, name: &str) -> Result<ToolHealthReport> {
        let handle = self.get(name).await?;
        if !handle.is_enabled() {
            return Err(Error::disabled(handle.name()));
        }
        Ok(handle.health_check().await)
    }

    pub async fn system_health(&self) -> SystemHealth {
        let mut summary = HealthSummary::default();
        let mut tools = Vec::new();
        for handle in self.handles().await {
            let report = handle.report();
            summary.add(report.status);
            tools.push(report);
        }
        SystemHealth {
            overall: summary.overall(),
            summary,
            tools,
        }
    }

    /// Close every transport. Entries stay registered.
    pub async fn shutdown(&self) {
        for handle in self.handles().await {
            handle.disconnect().await;
        }
        tracing::info!("registry shut down");
    }
}
