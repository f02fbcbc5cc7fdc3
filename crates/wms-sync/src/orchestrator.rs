//! # Sync Orchestrator
//!
//! Runs a full refresh: every supported entity of every connected source,
//! aggregated into one log and one status.
//!
//! ## Refresh Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  refresh_all(trigger)                                                   │
//! │     │                                                                   │
//! │     ├── Scheduled and last success < staleness threshold ──► Skipped    │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  ┌──────────────── Shopify ───────────────┐  ┌──────── QuickBooks ───┐  │
//! │  │ ensure_valid                           │  │ ensure_valid          │  │
//! │  │ inventory ──► customers ──► orders     │  │ inventory ──► ...     │  │
//! │  └────────────────────────────────────────┘  └───────────────────────┘  │
//! │        sequential by default, concurrent with `concurrent_sources`      │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  AggregateResult { status, log, passes }  ──► sync_runs table           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sources are isolated. A source that fails outright (missing credentials,
//! reconnect required) becomes a log line and the other source still runs.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;
use wms_core::{EntityKind, Source};
use wms_db::{Database, SyncRunRow};

use crate::config::SyncConfig;
use crate::credentials::{CredentialManager, DbCredentialStore};
use crate::engine::{PushOutcome, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::progress::{CancelHandle, CancelToken, ProgressSink};
use crate::report::PassReport;
use crate::sources::{ExternalSource, QuickBooksSource, ShopifySource};

// =============================================================================
// Run Types
// =============================================================================

/// What started a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// User-initiated. Always runs and is never cancelled.
    Manual,
    /// Timer-initiated. Skipped while data is fresh, cancellable.
    Scheduled,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Manual => "manual",
            Trigger::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall outcome of a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every pass finished cleanly.
    Success,
    /// Some passes finished, some failed or reported problems.
    Partial,
    /// No pass finished.
    Failure,
    /// Scheduled refresh skipped because the data is fresh.
    Skipped,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failure => "failure",
            RunStatus::Skipped => "skipped",
        }
    }
}

/// One pass, or one source that could not start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassOutcome {
    pub source: Source,
    /// `None` when the whole source failed before any pass.
    pub entity: Option<EntityKind>,
    /// Counts, including partial counts of an aborted pass.
    pub report: Option<PassReport>,
    pub error: Option<String>,
}

impl PassOutcome {
    fn finished(source: Source, entity: EntityKind, report: PassReport) -> Self {
        PassOutcome {
            source,
            entity: Some(entity),
            report: Some(report),
            error: None,
        }
    }

    fn failed(source: Source, entity: Option<EntityKind>, error: SyncError) -> Self {
        match error {
            SyncError::PassAborted { report, cause } => PassOutcome {
                source,
                entity,
                report: Some(*report),
                error: Some(cause.to_string()),
            },
            other => PassOutcome {
                source,
                entity,
                report: None,
                error: Some(other.to_string()),
            },
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Log line for this outcome.
    pub fn line(&self) -> String {
        match (&self.entity, &self.report, &self.error) {
            (Some(entity), Some(report), None) => report.summary(self.source, *entity),
            (Some(entity), Some(report), Some(error)) => {
                format!("{} (aborted: {error})", report.summary(self.source, *entity))
            }
            (Some(entity), None, Some(error)) => format!("{} {entity}: failed: {error}", self.source),
            (None, _, Some(error)) => format!("{}: skipped: {error}", self.source),
            _ => format!("{}: no result", self.source),
        }
    }
}

/// Result of one `refresh_all` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub trigger: Trigger,
    pub status: RunStatus,
    /// Ordered, human-readable outcome lines.
    pub log: Vec<String>,
    pub passes: Vec<PassOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AggregateResult {
    fn totals(&self) -> (u32, u32, u32) {
        self.passes
            .iter()
            .filter_map(|p| p.report.as_ref())
            .fold((0, 0, 0), |(c, u, f), r| (c + r.created, u + r.updated, f + r.failed))
    }

    pub fn created(&self) -> u32 {
        self.totals().0
    }

    pub fn updated(&self) -> u32 {
        self.totals().1
    }

    pub fn failed(&self) -> u32 {
        self.totals().2
    }
}

fn overall_status(passes: &[PassOutcome]) -> RunStatus {
    if passes.iter().all(|p| p.succeeded() && p.report.as_ref().is_some_and(PassReport::is_clean)) {
        RunStatus::Success
    } else if passes.iter().any(PassOutcome::succeeded) {
        RunStatus::Partial
    } else {
        RunStatus::Failure
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// A connected source and its token holder.
#[derive(Clone)]
pub struct SourceBinding {
    pub source: Arc<dyn ExternalSource>,
    pub credentials: Arc<CredentialManager>,
}

impl SourceBinding {
    pub fn new(source: Arc<dyn ExternalSource>, credentials: Arc<CredentialManager>) -> Self {
        SourceBinding {
            source,
            credentials,
        }
    }
}

impl fmt::Debug for SourceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceBinding")
            .field("source", &self.source.source())
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// Sequences sync passes across sources.
#[derive(Debug)]
pub struct SyncOrchestrator {
    db: Database,
    engine: SyncEngine,
    config: SyncConfig,
    bindings: Vec<SourceBinding>,
    progress: ProgressSink,
    /// Shared by every scheduled run in flight. Replaced after a cancel.
    scheduled: Mutex<CancelHandle>,
}

impl SyncOrchestrator {
    pub fn new(db: Database, config: SyncConfig, bindings: Vec<SourceBinding>) -> Self {
        let (scheduled, _) = CancelHandle::new();
        SyncOrchestrator {
            engine: SyncEngine::new(db.clone(), config.sync.clone()),
            db,
            config,
            bindings,
            progress: ProgressSink::Disabled,
            scheduled: Mutex::new(scheduled),
        }
    }

    /// Builds the enabled sources from `config`, with credentials kept in
    /// the local store.
    pub async fn from_config(db: Database, config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let timeout = config.sync.request_timeout();
        let store = Arc::new(DbCredentialStore::new(&db));
        let lead = config.credentials.refresh_lead();

        let mut sources: Vec<Arc<dyn ExternalSource>> = Vec::new();
        if config.shopify.enabled {
            sources.push(Arc::new(ShopifySource::new(&config.shopify, timeout)?));
        }
        if config.quickbooks.enabled {
            sources.push(Arc::new(QuickBooksSource::new(&config.quickbooks, timeout)?));
        }

        let mut bindings = Vec::with_capacity(sources.len());
        for source in sources {
            let credentials =
                CredentialManager::open(source.clone(), store.clone(), lead).await?;
            bindings.push(SourceBinding::new(source, Arc::new(credentials)));
        }
        info!(sources = bindings.len(), "Sync orchestrator configured");
        Ok(Self::new(db, config, bindings))
    }

    /// Sends progress events of every pass to `sink`.
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = sink;
        self
    }

    pub fn credentials(&self, source: Source) -> Option<&Arc<CredentialManager>> {
        self.binding(source).map(|b| &b.credentials)
    }

    fn binding(&self, source: Source) -> Option<&SourceBinding> {
        self.bindings.iter().find(|b| b.source.source() == source)
    }

    /// Runs every pass of every source.
    ///
    /// Only a failure to read or record run history is returned as an
    /// error. Everything that goes wrong inside a pass is in the result.
    pub async fn refresh_all(&self, trigger: Trigger) -> SyncResult<AggregateResult> {
        let started_at = Utc::now();

        if trigger == Trigger::Scheduled {
            if let Some(last) = self.db.sync_runs().last_finished_with("success").await? {
                let threshold = self.config.sync.staleness_threshold();
                if started_at - last < threshold {
                    info!(last_success = %last, "Data is fresh, skipping scheduled refresh");
                    let result = AggregateResult {
                        trigger,
                        status: RunStatus::Skipped,
                        log: vec![format!(
                            "Skipped: last successful refresh at {}",
                            last.format("%Y-%m-%d %H:%M:%S UTC")
                        )],
                        passes: Vec::new(),
                        started_at,
                        finished_at: Utc::now(),
                    };
                    self.record(&result).await?;
                    return Ok(result);
                }
            }
        }

        let cancel = match trigger {
            Trigger::Manual => CancelToken::never(),
            Trigger::Scheduled => self.scheduled.lock().await.token(),
        };

        info!(trigger = %trigger, sources = self.bindings.len(), "Starting refresh");
        let per_source: Vec<Vec<PassOutcome>> = if self.config.sync.concurrent_sources {
            join_all(self.bindings.iter().map(|b| self.run_source(b, &cancel))).await
        } else {
            let mut all = Vec::with_capacity(self.bindings.len());
            for binding in &self.bindings {
                all.push(self.run_source(binding, &cancel).await);
            }
            all
        };

        let passes: Vec<PassOutcome> = per_source.into_iter().flatten().collect();
        let mut log: Vec<String> = passes.iter().map(PassOutcome::line).collect();
        if self.bindings.is_empty() {
            log.push("No sources are configured".to_string());
        }
        let result = AggregateResult {
            trigger,
            status: overall_status(&passes),
            log,
            passes,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            trigger = %trigger,
            status = result.status.as_str(),
            created = result.created(),
            updated = result.updated(),
            failed = result.failed(),
            "Refresh finished"
        );
        self.record(&result).await?;
        Ok(result)
    }

    /// All passes of one source, in entity order.
    async fn run_source(&self, binding: &SourceBinding, cancel: &CancelToken) -> Vec<PassOutcome> {
        let remote = binding.source.source();
        let mut outcomes = Vec::new();

        // Proactive refresh before the first page of any pass.
        if let Err(e) = binding.credentials.ensure_valid().await {
            warn!(source = %remote, error = %e, "Source cannot start");
            outcomes.push(PassOutcome::failed(remote, None, e));
            return outcomes;
        }

        for entity in EntityKind::SYNC_ORDER {
            if !binding.source.supports(entity) {
                continue;
            }
            if cancel.is_cancelled() {
                break;
            }
            let result = self
                .engine
                .sync_entity(
                    binding.source.as_ref(),
                    &binding.credentials,
                    entity,
                    self.config.sync.page_size,
                    &self.progress,
                    cancel,
                )
                .await;
            match result {
                Ok(report) => {
                    let cancelled = report.cancelled;
                    outcomes.push(PassOutcome::finished(remote, entity, report));
                    if cancelled {
                        break;
                    }
                }
                Err(e) if e.is_credential_error() => {
                    warn!(source = %remote, entity = %entity, error = %e, "Credentials lost, skipping remaining passes");
                    outcomes.push(PassOutcome::failed(remote, Some(entity), e));
                    break;
                }
                Err(e) => {
                    warn!(source = %remote, entity = %entity, error = %e, "Pass failed");
                    outcomes.push(PassOutcome::failed(remote, Some(entity), e));
                }
            }
        }
        outcomes
    }

    async fn record(&self, result: &AggregateResult) -> SyncResult<()> {
        let row = SyncRunRow {
            id: Uuid::new_v4().to_string(),
            trigger_kind: result.trigger.as_str().to_string(),
            status: result.status.as_str().to_string(),
            started_at: result.started_at,
            finished_at: result.finished_at,
            created: i64::from(result.created()),
            updated: i64::from(result.updated()),
            failed: i64::from(result.failed()),
            log: SyncRunRow::encode_log(&result.log)?,
        };
        self.db.sync_runs().record(&row).await?;
        Ok(())
    }

    /// Cancels scheduled refreshes in flight at their next page boundary.
    /// Manual refreshes are unaffected, and later scheduled refreshes start
    /// normally.
    pub async fn cancel_scheduled(&self) {
        let mut handle = self.scheduled.lock().await;
        handle.cancel();
        *handle = CancelHandle::new().0;
        info!("Cancelled scheduled refreshes");
    }

    /// Pushes one inventory record to `source`. See
    /// [`SyncEngine::push_inventory`].
    pub async fn push_inventory(&self, source: Source, id: i32) -> SyncResult<PushOutcome> {
        let binding = self.binding(source).ok_or(SyncError::NotConnected(source))?;
        self.engine
            .push_inventory(binding.source.as_ref(), &binding.credentials, id)
            .await
    }

    /// Most recent runs, newest first.
    pub async fn history(&self, limit: u32) -> SyncResult<Vec<SyncRunRow>> {
        Ok(self.db.sync_runs().recent(limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{IssueKind, SyncIssue};

    fn clean(created: u32) -> PassReport {
        PassReport {
            created,
            pages: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_status_from_outcomes() {
        let ok = PassOutcome::finished(Source::Shopify, EntityKind::Inventory, clean(2));
        let failed = PassOutcome::failed(
            Source::QuickBooks,
            None,
            SyncError::NotConnected(Source::QuickBooks),
        );
        let mut noisy = clean(1);
        noisy.record_failure(SyncIssue::new(IssueKind::Record, 1, "bad sku"));
        let with_errors = PassOutcome::finished(Source::Shopify, EntityKind::Customer, noisy);

        assert_eq!(overall_status(&[ok.clone()]), RunStatus::Success);
        assert_eq!(overall_status(&[ok.clone(), failed.clone()]), RunStatus::Partial);
        assert_eq!(overall_status(&[with_errors]), RunStatus::Partial);
        assert_eq!(overall_status(&[failed]), RunStatus::Failure);
    }

    #[test]
    fn test_aborted_pass_keeps_partial_counts() {
        let mut report = clean(3);
        report.pages = 2;
        let outcome = PassOutcome::failed(
            Source::QuickBooks,
            Some(EntityKind::Order),
            SyncError::PassAborted {
                report: Box::new(report),
                cause: Box::new(SyncError::Timeout(30)),
            },
        );
        assert!(!outcome.succeeded());
        assert_eq!(outcome.report.as_ref().unwrap().created, 3);
        assert_eq!(
            outcome.line(),
            "QuickBooks orders: 3 created, 0 updated, 0 failed (aborted: Request timed out after 30 seconds)"
        );
    }

    #[test]
    fn test_source_level_failure_line() {
        let outcome = PassOutcome::failed(
            Source::Shopify,
            None,
            SyncError::NotConnected(Source::Shopify),
        );
        assert_eq!(outcome.line(), "Shopify: skipped: Shopify is not connected");
    }
}
