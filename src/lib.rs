//! # Evidence Bridge - Tool Connectivity Layer
//!
//! Lets an evidence-collection engine pull live data from external tools
//! (cloud consoles, issue trackers, chat platforms, source hosts) over a
//! JSON-RPC tool protocol:
//! - Discovery and validation of tool configuration documents
//! - Stdio (subprocess) and HTTP transports with handshake and per-call deadlines
//! - Per-tool circuit breaker deriving ready / degraded / offline health
//! - Role-based capability authorization with prefix-wildcard patterns
//! - Rate, concurrency and token budgets per tool
//! - Append-only audit log of every invocation
//!
//! ## Architecture
//!
//! Calls flow one way; results and errors flow back and are always audited:
//! ```text
//!                    ┌──────────────────────────────────────┐
//!   invoke_tool  →   │            Orchestrator              │ → AuditLog
//!                    └──────────────────┬───────────────────┘
//!                                       │ Registry::get
//!                    ┌──────────────────▼───────────────────┐
//!                    │ ToolHandle (one per tool)            │
//!                    │  ┌──────────┐ ┌────────┐ ┌─────────┐ │
//!                    │  │  Access  │→│ Budget │→│ Breaker │ │
//!                    │  │  Policy  │ │        │ │         │ │
//!                    │  └──────────┘ └────────┘ └────┬────┘ │
//!                    └───────────────────────────────┼──────┘
//!                                       ┌────────────▼────────────┐
//!                                       │ Transport (stdio│http)  │ → tool
//!                                       └─────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod kernel;
pub mod registry;
pub mod tools;
pub mod transport;
pub mod types;

// Internal utilities
pub mod observability;

pub use kernel::{AgentInvoker, AuditLog, InvocationRequest, InvocationResult, Orchestrator};
pub use registry::{DiscoveryPaths, DiscoveryReport, Registry, ToolHandle, ToolSummary};
pub use tools::{HealthStatus, ToolConfig};
pub use types::{Config, Error, ErrorKind, Result};
