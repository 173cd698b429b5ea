//! Invocation orchestration.
//!
//! One invocation runs, short-circuiting on the first failure:
//!   - resolve the tool, reject unknown or disabled tools
//!   - RBAC authorize (the method is the capability)
//!   - acquire the budget (token estimate, rate slot, concurrency slot)
//!   - breaker-guarded transport call, retried per the tool's retry policy
//!     for transient errors only
//!   - release the budget (drop, on every path)
//!   - append one audit record with outcome and latency
//!
//! Budget and authorization failures are never retried here; neither is a
//! breaker fast-fail.

use crate::kernel::audit::{AuditLog, AuditOutcome, AuditRecord};
use crate::registry::{Registry, ToolHandle};
use crate::types::{AuditId, Error, InvocationId, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Successful invocation.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationResult {
    pub invocation_id: InvocationId,
    pub tool: String,
    pub method: String,
    pub payload: Value,
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
    pub attempts: u32,
}

/// One entry of a fan-out batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub role: String,
    pub tool: String,
    pub method: String,
    #[serde(default)]
    pub args: Value,
}

impl InvocationRequest {
    pub fn new(role: &str, tool: &str, method: &str, args: Value) -> Self {
        Self {
            role: role.to_string(),
            tool: tool.to_string(),
            method: method.to_string(),
            args,
        }
    }
}

/// Contract exposed to the evidence-collection engine. Every error is
/// reportable; none is fatal.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke_tool(
        &self,
        role: &str,
        tool: &str,
        method: &str,
        args: Value,
    ) -> Result<InvocationResult>;
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Arc<Registry>,
    audit: Arc<AuditLog>,
}

impl Orchestrator {
    pub fn new(registry: Arc<Registry>, audit: Arc<AuditLog>) -> Self {
        Self { registry, audit }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub async fn invoke(
        &self,
        role: &str,
        tool: &str,
        method: &str,
        args: Value,
    ) -> Result<InvocationResult> {
        let invocation_id = InvocationId::new();
        let started = Instant::now();
        let mut attempts = 0u32;

        tracing::debug!(%invocation_id, tool, method, role, "invocation started");
        let (display_name, result) = self.run(role, tool, method, args, &mut attempts).await;
        let latency = started.elapsed();

        let (outcome, error_kind, error) = match &result {
            Ok(_) => (AuditOutcome::Success, None, None),
            Err(e) if e.is_rejection() => (AuditOutcome::Denied, Some(e.kind()), Some(e.to_string())),
            Err(e) => (AuditOutcome::Failure, Some(e.kind()), Some(e.to_string())),
        };
        self.audit.append(AuditRecord {
            id: AuditId::new(),
            timestamp: Utc::now(),
            tool: display_name.clone(),
            role: role.to_string(),
            method: method.to_string(),
            outcome,
            latency_ms: latency.as_millis() as u64,
            attempts,
            error_kind,
            error,
        });

        let payload = result?;
        Ok(InvocationResult {
            invocation_id,
            tool: display_name,
            method: method.to_string(),
            payload,
            latency,
            attempts,
        })
    }

    /// Resolve and execute. Returns the tool's display name (or the requested
    /// name when unknown) alongside the outcome.
    async fn run(
        &self,
        role: &str,
        tool: &str,
        method: &str,
        args: Value,
        attempts: &mut u32,
    ) -> (String, Result<Value>) {
        let handle = match self.registry.get(tool).await {
            Ok(handle) => handle,
            Err(e) => return (tool.to_string(), Err(e)),
        };
        let result = self.execute(&handle, role, method, args, attempts).await;
        if let Err(e) = &result {
            if *attempts == 0 {
                handle.record_rejection(e);
            }
        }
        (handle.name().to_string(), result)
    }

    async fn execute(
        &self,
        handle: &ToolHandle,
        role: &str,
        method: &str,
        args: Value,
        attempts: &mut u32,
    ) -> Result<Value> {
        if !handle.is_enabled() {
            return Err(Error::disabled(handle.name()));
        }

        let decision = handle.policy().authorize(role, method).into_result()?;
        tracing::debug!(
            tool = %handle.name(),
            role,
            method,
            pattern = ?decision.matched_pattern,
            "authorized"
        );

        let _permit = handle.budget().acquire(&args, Instant::now())?;

        let retry = &handle.config().retry_policy;
        let max_attempts = retry.max_attempts.max(1);
        loop {
            // Disable may land while a retry is sleeping.
            if !handle.is_enabled() {
                return Err(Error::disabled(handle.name()));
            }
            let admission = handle.admit(Instant::now())?;
            *attempts += 1;

            let attempt_started = Instant::now();
            let result = self.attempt(handle, method, args.clone()).await;
            handle.record_attempt(admission, attempt_started.elapsed(), &result);

            match result {
                Ok(payload) => return Ok(payload),
                Err(e) if e.is_transient() && *attempts < max_attempts => {
                    let delay = retry.delay_before(*attempts + 1);
                    tracing::warn!(
                        tool = %handle.name(),
                        method,
                        attempt = *attempts,
                        ?delay,
                        "transient failure, retrying: {}",
                        e
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, handle: &ToolHandle, method: &str, args: Value) -> Result<Value> {
        let transport = handle.connect().await?;
        transport.call(method, args, handle.config().timeout).await
    }

    /// Run every request as an independent task. Results come back in
    /// request order; one failure never cancels the others.
    pub async fn invoke_many(&self, requests: Vec<InvocationRequest>) -> Vec<Result<InvocationResult>> {
        let tasks: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let orchestrator = self.clone();
                tokio::spawn(async move {
                    orchestrator
                        .invoke(&request.role, &request.tool, &request.method, request.args)
                        .await
                })
            })
            .collect();

        join_all(tasks)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(Error::internal(format!("invocation task failed: {}", e)))
                })
            })
            .collect()
    }
}

#[async_trait]
impl AgentInvoker for Orchestrator {
    async fn invoke_tool(
        &self,
        role: &str,
        tool: &str,
        method: &str,
        args: Value,
    ) -> Result<InvocationResult> {
        self.invoke(role, tool, method, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Config, ErrorKind};
    use serde_json::json;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            Arc::new(Registry::new(&Config::default())),
            Arc::new(AuditLog::in_memory()),
        )
    }

    #[tokio::test]
    async fn test_unknown_tool_is_audited_as_denied() {
        let orch = orchestrator();
        let err = orch
            .invoke("viewer", "nowhere", "read:list", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolNotFound { .. }));

        let records = orch.audit().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AuditOutcome::Denied);
        assert_eq!(records[0].error_kind, Some(ErrorKind::ToolNotFound));
        assert_eq!(records[0].attempts, 0);
    }

    #[test]
    fn test_request_args_default_to_null() {
        let request: InvocationRequest =
            serde_json::from_value(json!({"role": "r", "tool": "t", "method": "m"})).unwrap();
        assert_eq!(request.args, Value::Null);
    }
}
