//! # Paginated Sync Engine
//!
//! Runs one sync pass: one entity kind against one external source.
//!
//! ## Pass Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          sync_entity()                                  │
//! │                                                                         │
//! │   ┌──► cancelled? ───────────────────────────► stop (cancelled)         │
//! │   │    page ceiling reached? ────────────────► stop (incomplete)        │
//! │   │         │                                                           │
//! │   │         ▼                                                           │
//! │   │    ensure_valid() ──► fetch_page()                                  │
//! │   │                          │ 401 ──► force_refresh() ──► same page    │
//! │   │                          │ transient ──► backoff ──► same page      │
//! │   │                          │ second failure ──► PassAborted           │
//! │   │                          ▼                                          │
//! │   │    upsert each record (failures counted, never fatal)               │
//! │   │         │                                                           │
//! │   │         ▼                                                           │
//! │   │    progress event                                                   │
//! │   │         │                                                           │
//! │   └── more? (has_more / full page)                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Pages are strictly sequential: page N+1 is not requested until every
//! record of page N has been written. Each record is committed on its own.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use tracing::{debug, info, warn};
use wms_core::validation::validate_page_size;
use wms_core::{EntityKind, Source};
use wms_db::{Database, DbError};

use crate::config::SyncSettings;
use crate::credentials::CredentialManager;
use crate::error::{SyncError, SyncResult};
use crate::matcher::{RecordMatcher, UpsertAction};
use crate::progress::{CancelToken, ProgressEvent, ProgressSink, ProgressTotals};
use crate::report::{IssueKind, PassReport, SyncIssue};
use crate::sources::{ExternalSource, Page, PageRequest, Pagination, PushReceipt};

/// Consecutive undecodable pages tolerated before an offset pass gives up.
const MAX_MALFORMED_PAGES: u32 = 2;

/// Outcome of pushing one inventory record.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Pushed(PushReceipt),
    /// Rejected as stale. The local record is untouched and flagged.
    Conflict(SyncIssue),
}

/// Drives sync passes against any [`ExternalSource`].
#[derive(Debug, Clone)]
pub struct SyncEngine {
    db: Database,
    matcher: RecordMatcher,
    settings: SyncSettings,
}

impl SyncEngine {
    pub fn new(db: Database, settings: SyncSettings) -> Self {
        SyncEngine {
            matcher: RecordMatcher::new(db.clone()),
            db,
            settings,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Pages through `entity` in `source` and reconciles every record.
    ///
    /// ## Errors
    /// - Credential errors (`NotConnected`, `ReconnectRequired`) end the pass
    ///   immediately.
    /// - `PassAborted` after a page failed twice in a row. It carries the
    ///   report of everything completed before the abort.
    ///
    /// Record-level failures and malformed pages never surface here; they
    /// are counted in the returned [`PassReport`].
    pub async fn sync_entity(
        &self,
        source: &dyn ExternalSource,
        credentials: &CredentialManager,
        entity: EntityKind,
        page_size: u32,
        progress: &ProgressSink,
        cancel: &CancelToken,
    ) -> SyncResult<PassReport> {
        validate_page_size(page_size)?;
        let remote = source.source();
        if !source.supports(entity) {
            return Err(SyncError::Unsupported {
                remote,
                operation: "this entity",
            });
        }

        let size = page_size.min(source.max_page_size());
        let pagination = source.pagination();
        let mut request = PageRequest::first(pagination, size);
        let mut report = PassReport::default();
        let mut malformed_streak = 0;

        info!(source = %remote, entity = %entity, page_size = size, "Starting sync pass");

        loop {
            if cancel.is_cancelled() {
                info!(source = %remote, entity = %entity, page = request.page, "Sync pass cancelled");
                report.cancelled = true;
                break;
            }
            if report.pages >= self.settings.max_pages {
                warn!(
                    source = %remote,
                    entity = %entity,
                    max_pages = self.settings.max_pages,
                    "Page ceiling reached, stopping pass"
                );
                report.incomplete = true;
                report.errors.push(SyncIssue::new(
                    IssueKind::Incomplete,
                    request.page,
                    format!(
                        "stopped after {} pages, more data may exist",
                        self.settings.max_pages
                    ),
                ));
                break;
            }

            let page = match self.fetch_with_retry(source, credentials, entity, &request).await {
                Ok(page) => page,
                Err(e @ (SyncError::NotConnected(_) | SyncError::ReconnectRequired { .. })) => {
                    return Err(e);
                }
                Err(SyncError::MalformedResponse(message)) => {
                    warn!(source = %remote, entity = %entity, page = request.page, %message, "Skipping malformed page");
                    report.pages += 1;
                    report.errors.push(SyncIssue::new(IssueKind::Malformed, request.page, message));
                    malformed_streak += 1;
                    self.emit(progress, remote, entity, request.page, &report);

                    match pagination {
                        Pagination::Offset { .. } if malformed_streak < MAX_MALFORMED_PAGES => {
                            request.offset += size;
                            request.page += 1;
                            continue;
                        }
                        _ => {
                            report.incomplete = true;
                            report.errors.push(SyncIssue::new(
                                IssueKind::Incomplete,
                                request.page,
                                "cannot continue past an unreadable page",
                            ));
                            break;
                        }
                    }
                }
                Err(cause) => {
                    warn!(source = %remote, entity = %entity, page = request.page, error = %cause, "Page failed, aborting pass");
                    report
                        .errors
                        .push(SyncIssue::new(IssueKind::Page, request.page, cause.to_string()));
                    return Err(SyncError::PassAborted {
                        report: Box::new(report),
                        cause: Box::new(cause),
                    });
                }
            };
            malformed_streak = 0;
            report.pages += 1;

            if let Err(cause) = self.apply_page(remote, &page, request.page, &mut report).await {
                report
                    .errors
                    .push(SyncIssue::new(IssueKind::Page, request.page, cause.to_string()));
                return Err(SyncError::PassAborted {
                    report: Box::new(report),
                    cause: Box::new(cause),
                });
            }
            self.emit(progress, remote, entity, request.page, &report);

            let received = page.received() as u32;
            let more = received > 0 && page.has_more.unwrap_or(received >= size);
            if !more {
                break;
            }
            match pagination {
                Pagination::Offset { .. } => request.offset += received,
                Pagination::Cursor => match page.next_cursor {
                    Some(cursor) => request.cursor = Some(cursor),
                    None => {
                        warn!(source = %remote, entity = %entity, page = request.page, "More data signalled without a cursor");
                        report.incomplete = true;
                        report.errors.push(SyncIssue::new(
                            IssueKind::Incomplete,
                            request.page,
                            "source signalled more data but sent no cursor",
                        ));
                        break;
                    }
                },
            }
            request.page += 1;
        }

        info!(
            source = %remote,
            entity = %entity,
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            failed = report.failed,
            pages = report.pages,
            incomplete = report.incomplete,
            "Sync pass finished"
        );
        Ok(report)
    }

    /// Fetches one page: one forced refresh on 401, one backoff retry on a
    /// transient failure.
    async fn fetch_with_retry(
        &self,
        source: &dyn ExternalSource,
        credentials: &CredentialManager,
        entity: EntityKind,
        request: &PageRequest,
    ) -> SyncResult<Page> {
        let mut lease = credentials.ensure_valid().await?;
        let mut refreshed = false;
        let mut retried = false;
        let mut backoff = self.backoff();

        loop {
            debug!(source = %source.source(), entity = %entity, page = request.page, offset = request.offset, "Fetching page");
            match source.fetch_page(entity, request, &lease.credentials).await {
                Ok(page) => return Ok(page),
                Err(SyncError::Unauthorized(remote)) if !refreshed => {
                    info!(source = %remote, page = request.page, "Token rejected, forcing refresh");
                    refreshed = true;
                    lease = credentials.force_refresh(lease.generation).await?;
                }
                Err(e) if e.is_transient() && !retried => {
                    retried = true;
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| self.settings.retry_backoff());
                    warn!(source = %source.source(), page = request.page, error = %e, ?delay, "Page request failed, retrying once");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Upserts every record of a page. Only a store-wide failure is
    /// returned; everything else is counted in `report`.
    async fn apply_page(
        &self,
        remote: Source,
        page: &Page,
        page_no: u32,
        report: &mut PassReport,
    ) -> SyncResult<()> {
        for rejected in &page.rejected {
            let mut issue = SyncIssue::new(IssueKind::Malformed, page_no, rejected.reason.clone());
            if let Some(id) = &rejected.external_id {
                issue = issue.for_record(id.clone());
            }
            report.record_failure(issue);
        }

        let synced_at = Utc::now();
        for record in &page.records {
            match self.matcher.upsert(remote, record, synced_at).await {
                Ok(upserted) => match upserted.action {
                    UpsertAction::Created => report.created += 1,
                    UpsertAction::Updated => report.updated += 1,
                    UpsertAction::Unchanged => report.unchanged += 1,
                },
                Err(e) if e.is_record_level() => {
                    let kind = match &e {
                        SyncError::Store(DbError::IdCollision { .. }) => IssueKind::Collision,
                        SyncError::ModifiedElsewhere { .. } => IssueKind::Conflict,
                        SyncError::MalformedResponse(_) => IssueKind::Malformed,
                        _ => IssueKind::Record,
                    };
                    warn!(source = %remote, external_id = %record.external_id(), error = %e, "Record failed");
                    report.record_failure(
                        SyncIssue::new(kind, page_no, e.to_string()).for_record(record.external_id()),
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn emit(
        &self,
        progress: &ProgressSink,
        remote: Source,
        entity: EntityKind,
        page: u32,
        report: &PassReport,
    ) {
        progress.emit(ProgressEvent {
            source: remote,
            entity,
            page,
            message: format!(
                "{remote} {entity}: page {page}, {} created, {} updated, {} failed",
                report.created, report.updated, report.failed
            ),
            totals: ProgressTotals {
                created: report.created,
                updated: report.updated,
                unchanged: report.unchanged,
                failed: report.failed,
            },
        });
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.settings.retry_backoff(),
            max_interval: self.settings.max_backoff(),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    // =========================================================================
    // Push
    // =========================================================================

    /// Writes one local inventory record back to `source`.
    ///
    /// A stale-token rejection is not an error here: the record is flagged
    /// `needs_reconciliation` and the conflict comes back as
    /// [`PushOutcome::Conflict`].
    pub async fn push_inventory(
        &self,
        source: &dyn ExternalSource,
        credentials: &CredentialManager,
        id: i32,
    ) -> SyncResult<PushOutcome> {
        let remote = source.source();
        let repo = self.db.inventory();
        let record = repo.require(id).await?;
        let Some(external_id) = record.external_id(remote).map(str::to_string) else {
            return Err(SyncError::NotLinked { remote, id });
        };

        let lease = credentials.ensure_valid().await?;
        let result = match source.push_inventory(&record, &lease.credentials).await {
            Err(SyncError::Unauthorized(_)) => {
                let lease = credentials.force_refresh(lease.generation).await?;
                source.push_inventory(&record, &lease.credentials).await
            }
            other => other,
        };

        match result {
            Ok(receipt) => {
                match (remote, receipt.sync_token.as_deref()) {
                    (Source::QuickBooks, Some(token)) => {
                        repo.record_quickbooks_push(id, token).await?
                    }
                    (Source::QuickBooks, None) => {
                        repo.mark_synced(id, remote, Utc::now()).await?
                    }
                    (Source::Shopify, _) => repo.record_shopify_push(id).await?,
                }
                info!(id, source = %remote, external_id = %external_id, "Pushed inventory");
                Ok(PushOutcome::Pushed(receipt))
            }
            Err(e) if e.is_conflict() => {
                warn!(id, source = %remote, external_id = %external_id, "Push rejected as stale, flagging for reconciliation");
                repo.set_needs_reconciliation(id, true).await?;
                Ok(PushOutcome::Conflict(
                    SyncIssue::new(IssueKind::Conflict, 0, e.to_string()).for_record(external_id),
                ))
            }
            Err(e) => Err(e),
        }
    }
}
