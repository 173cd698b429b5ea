//! Kernel - invocation control plane.
//!
//! The orchestrator composes authorization, budgets, the breaker-guarded
//! transport call and the audit log into one invocation. Budgets and the audit
//! log are plain structs; per-tool instances live in registry entries.

pub mod audit;
pub mod budget;
pub mod orchestrator;

pub use audit::{AuditLog, AuditOutcome, AuditRecord, AuditSink, JsonlAuditSink};
pub use budget::{estimate_tokens, BudgetLimits, BudgetPermit, ToolBudget};
pub use orchestrator::{AgentInvoker, InvocationRequest, InvocationResult, Orchestrator};
