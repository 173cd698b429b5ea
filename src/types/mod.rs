//! Core types for the connectivity layer.
//!
//! - **IDs**: Strongly-typed identifiers (InvocationId, AuditId)
//! - **Errors**: Structured error enum with thiserror derives
//! - **Config**: Discovery, breaker, budget, audit and logging settings

mod config;
mod errors;
mod ids;

pub use config::{
    AuditConfig, BreakerConfig, BudgetDefaults, Config, DiscoveryConfig, ObservabilityConfig,
};
pub use errors::{DenyReason, Error, ErrorKind, Result, SchemaError};
pub use ids::{AuditId, InvocationId};
