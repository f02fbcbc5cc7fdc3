//! # Pass Reports
//!
//! Structured outcome of one sync pass. Per-record and per-page problems
//! are collected here instead of being thrown out of the pass.

use serde::{Deserialize, Serialize};
use std::fmt;
use wms_core::{EntityKind, Source};

/// What went wrong with one record or page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// The record (or whole page) could not be decoded.
    Malformed,
    /// Store or validation failure for one record.
    Record,
    /// Deterministic id already held by another external key.
    Collision,
    /// Stale version token on a push.
    Conflict,
    /// A page request failed after its retry.
    Page,
    /// The pass stopped early and the local data may be partial.
    Incomplete,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IssueKind::Malformed => "malformed",
            IssueKind::Record => "record",
            IssueKind::Collision => "collision",
            IssueKind::Conflict => "conflict",
            IssueKind::Page => "page",
            IssueKind::Incomplete => "incomplete",
        };
        f.write_str(label)
    }
}

/// One accumulated error or warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncIssue {
    pub kind: IssueKind,
    /// 1-based page number the issue was seen on.
    pub page: u32,
    pub external_id: Option<String>,
    pub message: String,
}

impl SyncIssue {
    pub fn new(kind: IssueKind, page: u32, message: impl Into<String>) -> Self {
        SyncIssue {
            kind,
            page,
            external_id: None,
            message: message.into(),
        }
    }

    pub fn for_record(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

impl fmt::Display for SyncIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.external_id {
            Some(id) => write!(f, "[{} p{}] {}: {}", self.kind, self.page, id, self.message),
            None => write!(f, "[{} p{}] {}", self.kind, self.page, self.message),
        }
    }
}

/// Result of one `sync_entity` pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub failed: u32,
    pub errors: Vec<SyncIssue>,
    /// Pages fetched and processed.
    pub pages: u32,
    /// Set when the page ceiling was hit or a cursor could not advance.
    pub incomplete: bool,
    pub cancelled: bool,
}

impl PassReport {
    /// Records seen, whatever their outcome.
    pub fn processed(&self) -> u32 {
        self.created + self.updated + self.unchanged + self.failed
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.errors.is_empty() && !self.incomplete && !self.cancelled
    }

    pub(crate) fn record_failure(&mut self, issue: SyncIssue) {
        self.failed += 1;
        self.errors.push(issue);
    }

    /// One log line: `QuickBooks inventory: 1 created, 0 updated, 0 failed`.
    pub fn summary(&self, source: Source, entity: EntityKind) -> String {
        let mut line = format!(
            "{source} {entity}: {} created, {} updated, {} failed",
            self.created, self.updated, self.failed
        );
        if self.incomplete {
            line.push_str(" (possibly incomplete)");
        }
        if self.cancelled {
            line.push_str(" (cancelled)");
        }
        line
    }
}
