use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of a single compliance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComplianceStatus {
    Pass,
    Fail,
}

impl ComplianceStatus {
    pub fn from_passed(passed: bool) -> Self {
        if passed {
            ComplianceStatus::Pass
        } else {
            ComplianceStatus::Fail
        }
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComplianceStatus::Pass => write!(f, "PASS"),
            ComplianceStatus::Fail => write!(f, "FAIL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceLogEntry {
    /// Position in the log, starting at 1.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub rule: String,
    pub status: ComplianceStatus,
    pub details: String,
}

/// Append-only record of compliance checks and gate decisions.
///
/// `append` is the only mutator; sequence numbers are assigned under the
/// write lock so they match insertion order.
#[derive(Debug, Default)]
pub struct ComplianceLog {
    entries: RwLock<Vec<ComplianceLogEntry>>,
}

impl ComplianceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry and return its sequence number.
    pub fn append(
        &self,
        rule: impl Into<String>,
        status: ComplianceStatus,
        details: impl Into<String>,
    ) -> u64 {
        let mut entries = self.entries.write();
        let sequence = entries.len() as u64 + 1;
        entries.push(ComplianceLogEntry {
            sequence,
            timestamp: Utc::now(),
            rule: rule.into(),
            status,
            details: details.into(),
        });
        sequence
    }

    pub fn entries(&self) -> Vec<ComplianceLogEntry> {
        self.entries.read().clone()
    }

    /// Entries with a sequence strictly greater than `sequence`.
    pub fn entries_since(&self, sequence: u64) -> Vec<ComplianceLogEntry> {
        let entries = self.entries.read();
        let start = (sequence as usize).min(entries.len());
        entries[start..].to_vec()
    }

    pub fn failures(&self) -> Vec<ComplianceLogEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.status == ComplianceStatus::Fail)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
