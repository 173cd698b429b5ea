//! Append-only audit log.
//!
//! One record per invocation request, written in resolution order. Records
//! are kept in memory for status readers and optionally mirrored to a
//! JSON-lines file. Nothing is ever rewritten.

use crate::types::{AuditConfig, AuditId, ErrorKind, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Rejected before any transport attempt (unknown, disabled, RBAC, budget).
    Denied,
    Success,
    /// Transport attempted (or breaker fast-failed) without a result.
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditId,
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    pub role: String,
    pub method: String,
    pub outcome: AuditOutcome,
    pub latency_ms: u64,
    /// Transport attempts made; zero when rejected up front.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Destination for audit records besides the in-memory list.
pub trait AuditSink: Send + Sync + fmt::Debug {
    fn write(&self, record: &AuditRecord) -> Result<()>;
}

/// Appends one JSON object per line.
#[derive(Debug)]
pub struct JsonlAuditSink {
    file: Mutex<File>,
}

impl JsonlAuditSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for JsonlAuditSink {
    fn write(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct AuditLog {
    records: Mutex<Vec<AuditRecord>>,
    sink: Option<Box<dyn AuditSink>>,
    max_error_len: usize,
}

impl AuditLog {
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            sink: None,
            max_error_len: AuditConfig::default().max_error_len,
        }
    }

    pub fn with_sink(sink: Box<dyn AuditSink>, max_error_len: usize) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            sink: Some(sink),
            max_error_len,
        }
    }

    /// Build from config: file-backed when a path is set.
    pub fn from_config(config: &AuditConfig) -> Result<Self> {
        match &config.path {
            Some(path) => Ok(Self::with_sink(
                Box::new(JsonlAuditSink::open(path)?),
                config.max_error_len,
            )),
            None => Ok(Self {
                max_error_len: config.max_error_len,
                ..Self::in_memory()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AuditRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record. Sink failures are logged, never surfaced to the caller.
    pub fn append(&self, mut record: AuditRecord) {
        if let Some(error) = record.error.take() {
            record.error = Some(truncate(&error, self.max_error_len));
        }

        tracing::info!(
            target: "audit",
            audit_id = %record.id,
            tool = %record.tool,
            role = %record.role,
            method = %record.method,
            outcome = ?record.outcome,
            latency_ms = record.latency_ms,
            attempts = record.attempts,
            error_kind = ?record.error_kind,
            "tool invocation"
        );

        // Sink write and in-memory push under one lock keep both in the same order.
        let mut records = self.lock();
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.write(&record) {
                tracing::error!("audit sink write failed: {}", e);
            }
        }
        records.push(record);
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.lock().clone()
    }

    pub fn records_for(&self, tool: &str) -> Vec<AuditRecord> {
        self.lock()
            .iter()
            .filter(|r| r.tool.eq_ignore_ascii_case(tool))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Truncate on a char boundary, marking the cut.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn record(tool: &str, outcome: AuditOutcome, error: Option<&str>) -> AuditRecord {
        AuditRecord {
            id: AuditId::new(),
            timestamp: Utc::now(),
            tool: tool.to_string(),
            role: "auditor".to_string(),
            method: "iam:ListUsers".to_string(),
            outcome,
            latency_ms: 12,
            attempts: 1,
            error_kind: error.map(|_| ErrorKind::Timeout),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_append_preserves_order() {
        let log = AuditLog::in_memory();
        log.append(record("aws", AuditOutcome::Success, None));
        log.append(record("jira", AuditOutcome::Denied, Some("denied")));
        log.append(record("aws", AuditOutcome::Failure, Some("timeout")));

        let records = log.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].tool, "jira");
        assert_eq!(log.records_for("AWS").len(), 2);
    }

    #[test]
    fn test_error_truncated() {
        let log = AuditLog {
            max_error_len: 8,
            ..AuditLog::in_memory()
        };
        log.append(record("aws", AuditOutcome::Failure, Some("0123456789abcdef")));
        assert_eq!(log.records()[0].error.as_deref(), Some("01234567…"));
    }

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit/log.jsonl");
        let log = AuditLog::from_config(&AuditConfig {
            path: Some(path.clone()),
            max_error_len: 256,
        })
        .unwrap();
        log.append(record("aws", AuditOutcome::Success, None));
        log.append(record("aws", AuditOutcome::Denied, Some("no")));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.outcome, AuditOutcome::Denied);
    }

    #[test]
    #[traced_test]
    fn test_append_emits_audit_event() {
        let log = AuditLog::in_memory();
        log.append(record("aws", AuditOutcome::Success, None));
        assert!(logs_contain("tool invocation"));
    }
}
