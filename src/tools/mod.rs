//! Tool model: configuration, validation, access control, health.
//!
//! Everything here is synchronous and transport-agnostic; the registry wraps
//! these pieces with per-tool locking.

pub mod access;
pub mod breaker;
pub mod capability;
pub mod config;
pub mod health;
pub mod schema;

pub use access::{RbacDecision, ToolAccessPolicy};
pub use breaker::{Admission, BreakerState, CircuitBreaker, Transition};
pub use capability::CapabilityPattern;
pub use config::{Backoff, RbacPolicy, RetryPolicy, ToolConfig, TransportKind};
pub use health::{HealthStatus, HealthSummary, ToolCounters, ToolHealthReport, ToolRuntimeState};
pub use schema::{parse_document, validate, validate_all};
