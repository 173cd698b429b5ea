//! Role-based tool access control.
//!
//! Controls which roles may invoke which capabilities of a tool. Patterns are
//! compiled once when the tool is admitted. If no patterns are configured for
//! a role, it has access to nothing.

use crate::tools::capability::{first_match, CapabilityPattern};
use crate::tools::config::ToolConfig;
use crate::types::{DenyReason, Error};
use serde::Serialize;
use std::collections::HashMap;

/// Outcome of one authorization check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RbacDecision {
    pub role: String,
    pub tool: String,
    pub capability: String,
    pub allowed: bool,
    /// Pattern that granted access, when allowed.
    pub matched_pattern: Option<String>,
    /// Why access was refused, when denied.
    pub reason: Option<DenyReason>,
}

impl RbacDecision {
    fn allow(role: &str, tool: &str, capability: &str, pattern: &CapabilityPattern) -> Self {
        Self {
            role: role.to_string(),
            tool: tool.to_string(),
            capability: capability.to_string(),
            allowed: true,
            matched_pattern: Some(pattern.to_string()),
            reason: None,
        }
    }

    fn deny(role: &str, tool: &str, capability: &str, reason: DenyReason) -> Self {
        Self {
            role: role.to_string(),
            tool: tool.to_string(),
            capability: capability.to_string(),
            allowed: false,
            matched_pattern: None,
            reason: Some(reason),
        }
    }

    /// Convert a denial into [`Error::PermissionDenied`].
    pub fn into_result(self) -> crate::types::Result<Self> {
        match self.reason {
            Some(reason) if !self.allowed => Err(Error::PermissionDenied {
                role: self.role,
                tool: self.tool,
                capability: self.capability,
                reason,
            }),
            _ => Ok(self),
        }
    }
}

/// Role → capability-pattern policy for a single tool.
#[derive(Debug, Clone, Default)]
pub struct ToolAccessPolicy {
    tool: String,
    /// Capabilities the tool itself advertises; empty = unrestricted.
    offered: Vec<CapabilityPattern>,
    /// role → allowed patterns
    grants: HashMap<String, Vec<CapabilityPattern>>,
}

impl ToolAccessPolicy {
    pub fn new(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
            offered: Vec::new(),
            grants: HashMap::new(),
        }
    }

    /// Build the compiled policy for a validated config.
    pub fn from_config(config: &ToolConfig) -> Self {
        let mut policy = Self::new(&config.name);
        policy.offered = config.capabilities.clone();
        for (role, patterns) in &config.rbac.allowed_capabilities {
            policy.grant_many(role, patterns);
        }
        policy
    }

    pub fn grant_many(&mut self, role: &str, patterns: &[CapabilityPattern]) {
        self.grants
            .entry(role.to_string())
            .or_default()
            .extend(patterns.iter().cloned());
    }

    /// Decide whether `role` may use `capability` on this tool.
    pub fn authorize(&self, role: &str, capability: &str) -> RbacDecision {
        if !self.offered.is_empty() && first_match(&self.offered, capability).is_none() {
            return RbacDecision::deny(
                role,
                &self.tool,
                capability,
                DenyReason::CapabilityNotOffered,
            );
        }

        let patterns = match self.grants.get(role) {
            Some(patterns) if !patterns.is_empty() => patterns,
            _ => return RbacDecision::deny(role, &self.tool, capability, DenyReason::NoPatterns),
        };

        match first_match(patterns, capability) {
            Some(pattern) => RbacDecision::allow(role, &self.tool, capability, pattern),
            None => RbacDecision::deny(
                role,
                &self.tool,
                capability,
                DenyReason::NoMatchingPattern,
            ),
        }
    }

    /// Roles with at least one grant, sorted.
    pub fn roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = self
            .grants
            .iter()
            .filter(|(_, patterns)| !patterns.is_empty())
            .map(|(role, _)| role.clone())
            .collect();
        roles.sort();
        roles
    }
}
