//! Sync pass behavior against scripted sources.

mod common;

use chrono::Duration as ChronoDuration;
use common::*;
use std::sync::Arc;
use std::time::Duration;
use wms_core::{
    deterministic_id, EntityKind, IdSpace, NewInventoryItem, Quantity, Source,
};
use wms_sync::{
    CancelHandle, CancelToken, ExternalCustomer, ExternalRecord, IssueKind, ProgressSink,
    PushOutcome, Rejected, SyncEngine, SyncError, SyncSettings,
};

async fn run(
    engine: &SyncEngine,
    source: &Arc<FixtureSource>,
    entity: EntityKind,
    page_size: u32,
) -> Result<wms_sync::PassReport, SyncError> {
    let credentials = connected(source).await;
    engine
        .sync_entity(
            source.as_ref(),
            &credentials,
            entity,
            page_size,
            &ProgressSink::Disabled,
            &CancelToken::never(),
        )
        .await
}

// =============================================================================
// Create vs update
// =============================================================================

#[tokio::test]
async fn test_first_sync_creates_and_second_updates() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());

    let first = Arc::new(
        FixtureSource::new(Source::QuickBooks)
            .with_records(EntityKind::Inventory, vec![item("Q1", "ABC", 10)]),
    );
    let report = run(&engine, &first, EntityKind::Inventory, 100).await.unwrap();
    assert_eq!((report.created, report.updated, report.failed), (1, 0, 0));

    let id = deterministic_id(IdSpace::QuickBooksItem, "Q1").unwrap();
    let stored = db.inventory().require(id).await.unwrap();
    assert_eq!(stored.sku, "ABC");
    assert_eq!(stored.quantity_on_hand, Quantity::from_units(10));

    let second = Arc::new(
        FixtureSource::new(Source::QuickBooks)
            .with_records(EntityKind::Inventory, vec![item("Q1", "ABC", 15)]),
    );
    let report = run(&engine, &second, EntityKind::Inventory, 100).await.unwrap();
    assert_eq!((report.created, report.updated, report.failed), (0, 1, 0));

    let stored = db.inventory().require(id).await.unwrap();
    assert_eq!(stored.quantity_on_hand, Quantity::from_units(15));
    assert_eq!(db.inventory().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_rerun_over_many_pages_changes_nothing() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let source = Arc::new(
        FixtureSource::new(Source::QuickBooks).with_records(EntityKind::Inventory, items("Q", 250)),
    );

    let first = run(&engine, &source, EntityKind::Inventory, 100).await.unwrap();
    assert_eq!(first.created, 250);
    assert_eq!(first.pages, 3);

    let second = run(&engine, &source, EntityKind::Inventory, 100).await.unwrap();
    assert_eq!((second.created, second.updated, second.unchanged), (0, 0, 250));
    assert!(second.is_clean());
    assert_eq!(db.inventory().count().await.unwrap(), 250);
}

#[tokio::test]
async fn test_cursor_paging_stops_on_last_page() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let source = Arc::new(
        FixtureSource::new(Source::Shopify).with_records(EntityKind::Inventory, items("S", 200)),
    );

    let report = run(&engine, &source, EntityKind::Inventory, 100).await.unwrap();
    assert_eq!(report.created, 200);
    assert_eq!(report.pages, 2);
    assert_eq!(source.fetches(), 2);
}

#[tokio::test]
async fn test_secondary_key_links_local_item() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let local = db
        .inventory()
        .create_local(NewInventoryItem {
            sku: "ABC".into(),
            name: "Widget".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let source = Arc::new(
        FixtureSource::new(Source::QuickBooks)
            .with_records(EntityKind::Inventory, vec![item("Q1", "ABC", 4)]),
    );
    let report = run(&engine, &source, EntityKind::Inventory, 100).await.unwrap();
    assert_eq!((report.created, report.updated), (0, 1));
    assert_eq!(db.inventory().count().await.unwrap(), 1);

    let linked = db.inventory().require(local.id).await.unwrap();
    assert_eq!(linked.quickbooks_item_id.as_deref(), Some("Q1"));
}

// =============================================================================
// Paging limits and failures
// =============================================================================

#[tokio::test]
async fn test_page_ceiling_marks_pass_incomplete() {
    let db = db().await;
    let engine = SyncEngine::new(
        db.clone(),
        SyncSettings {
            max_pages: 3,
            ..settings()
        },
    );
    let source = Arc::new(FixtureSource::new(Source::Shopify).endless());

    let report = run(&engine, &source, EntityKind::Inventory, 10).await.unwrap();
    assert!(report.incomplete);
    assert_eq!(report.pages, 3);
    assert_eq!(report.created, 30);
    assert_eq!(source.fetches(), 3);
    assert!(report.errors.iter().any(|e| e.kind == IssueKind::Incomplete));
}

#[tokio::test]
async fn test_unauthorized_page_refreshes_once() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let source = Arc::new(
        FixtureSource::new(Source::QuickBooks)
            .with_records(EntityKind::Inventory, items("Q", 5))
            .revoking("access-0"),
    );
    let credentials = connected(&source).await;

    let report = engine
        .sync_entity(
            source.as_ref(),
            &credentials,
            EntityKind::Inventory,
            100,
            &ProgressSink::Disabled,
            &CancelToken::never(),
        )
        .await
        .unwrap();
    assert_eq!(report.created, 5);
    assert_eq!(source.refreshes(), 1);
    assert_eq!(source.fetches(), 2);
    assert_eq!(credentials.ensure_valid().await.unwrap().credentials.access_token, "fresh-1");
}

#[tokio::test]
async fn test_transient_failure_is_retried_once() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let source = Arc::new(
        FixtureSource::new(Source::QuickBooks)
            .with_records(EntityKind::Inventory, items("Q", 3))
            .failing(1, SyncError::Timeout(30)),
    );

    let report = run(&engine, &source, EntityKind::Inventory, 100).await.unwrap();
    assert_eq!(report.created, 3);
    assert_eq!(source.fetches(), 2);
}

#[tokio::test]
async fn test_second_failure_aborts_with_partial_report() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let server_error = || SyncError::ServerError {
        remote: Source::QuickBooks,
        status: 503,
        body: "unavailable".into(),
    };
    let source = Arc::new(
        FixtureSource::new(Source::QuickBooks)
            .with_records(EntityKind::Inventory, items("Q", 150))
            .failing(2, server_error())
            .failing(2, server_error()),
    );

    let err = run(&engine, &source, EntityKind::Inventory, 100).await.unwrap_err();
    match err {
        SyncError::PassAborted { report, cause } => {
            assert_eq!(report.created, 100);
            assert_eq!(report.pages, 1);
            assert_eq!(report.errors.last().unwrap().kind, IssueKind::Page);
            assert!(matches!(*cause, SyncError::ServerError { status: 503, .. }));
        }
        other => panic!("expected PassAborted, got {other:?}"),
    }
    // Committed records stay committed.
    assert_eq!(db.inventory().count().await.unwrap(), 100);
}

#[tokio::test]
async fn test_malformed_offset_page_is_skipped() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let source = Arc::new(
        FixtureSource::new(Source::QuickBooks)
            .with_records(EntityKind::Inventory, items("Q", 250))
            .failing(2, SyncError::MalformedResponse("missing QueryResponse".into())),
    );

    let report = run(&engine, &source, EntityKind::Inventory, 100).await.unwrap();
    assert_eq!(report.created, 150);
    assert_eq!(report.pages, 3);
    assert!(!report.incomplete);
    assert!(report.errors.iter().any(|e| e.kind == IssueKind::Malformed && e.page == 2));
}

#[tokio::test]
async fn test_malformed_cursor_page_stops_pass() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let source = Arc::new(
        FixtureSource::new(Source::Shopify)
            .with_records(EntityKind::Inventory, items("S", 250))
            .failing(2, SyncError::MalformedResponse("missing products.edges".into())),
    );

    let report = run(&engine, &source, EntityKind::Inventory, 100).await.unwrap();
    assert_eq!(report.created, 100);
    assert!(report.incomplete);
    assert_eq!(source.fetches(), 2);
}

#[tokio::test]
async fn test_rejected_entries_count_as_failures() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let source = Arc::new(
        FixtureSource::new(Source::QuickBooks)
            .with_records(EntityKind::Inventory, items("Q", 2))
            .with_rejected(
                1,
                Rejected {
                    external_id: Some("Q9".into()),
                    reason: "invalid amount \"abc\"".into(),
                },
            ),
    );

    let report = run(&engine, &source, EntityKind::Inventory, 100).await.unwrap();
    assert_eq!((report.created, report.failed), (2, 1));
    let issue = &report.errors[0];
    assert_eq!(issue.kind, IssueKind::Malformed);
    assert_eq!(issue.external_id.as_deref(), Some("Q9"));
}

#[tokio::test]
async fn test_invalid_record_does_not_stop_page() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let source = Arc::new(FixtureSource::new(Source::QuickBooks).with_records(
        EntityKind::Inventory,
        vec![item("Q1", "A", 1), item("Q2", "B", -3), item("Q3", "C", 2)],
    ));

    let report = run(&engine, &source, EntityKind::Inventory, 100).await.unwrap();
    assert_eq!((report.created, report.failed), (2, 1));
    assert_eq!(report.errors[0].external_id.as_deref(), Some("Q2"));
}

#[tokio::test]
async fn test_page_size_is_validated() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let source = Arc::new(
        FixtureSource::new(Source::QuickBooks).with_records(EntityKind::Inventory, items("Q", 1)),
    );

    assert!(run(&engine, &source, EntityKind::Inventory, 0).await.is_err());
    assert_eq!(source.fetches(), 0);
}

// =============================================================================
// Progress, cancellation, credentials
// =============================================================================

#[tokio::test]
async fn test_progress_event_per_page() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let source = Arc::new(
        FixtureSource::new(Source::QuickBooks).with_records(EntityKind::Inventory, items("Q", 250)),
    );
    let credentials = connected(&source).await;
    let (sink, mut rx) = ProgressSink::channel();

    engine
        .sync_entity(
            source.as_ref(),
            &credentials,
            EntityKind::Inventory,
            100,
            &sink,
            &CancelToken::never(),
        )
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.iter().map(|e| e.page).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(events[2].totals.created, 250);
    assert_eq!(events[0].message, "QuickBooks inventory: page 1, 100 created, 0 updated, 0 failed");
}

#[tokio::test]
async fn test_cancel_before_first_page() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let source = Arc::new(FixtureSource::new(Source::Shopify).endless());
    let credentials = connected(&source).await;
    let (handle, token) = CancelHandle::new();
    handle.cancel();

    let report = engine
        .sync_entity(
            source.as_ref(),
            &credentials,
            EntityKind::Inventory,
            10,
            &ProgressSink::Disabled,
            &token,
        )
        .await
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.pages, 0);
    assert_eq!(source.fetches(), 0);
}

#[tokio::test]
async fn test_cancel_stops_at_page_boundary() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let source = Arc::new(
        FixtureSource::new(Source::Shopify)
            .endless()
            .with_delay(Duration::from_millis(20)),
    );
    let credentials = connected(&source).await;
    let (handle, token) = CancelHandle::new();
    let (sink, mut rx) = ProgressSink::channel();

    let pass = engine.sync_entity(
        source.as_ref(),
        &credentials,
        EntityKind::Inventory,
        10,
        &sink,
        &token,
    );
    let canceller = async {
        rx.recv().await;
        handle.cancel();
    };
    let (report, ()) = tokio::join!(pass, canceller);

    let report = report.unwrap();
    assert!(report.cancelled);
    assert!(report.pages >= 1 && report.pages < 5);
    // Every fetched page was fully written.
    assert_eq!(report.created, report.pages * 10);
}

#[tokio::test]
async fn test_not_connected_fails_pass() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let source = Arc::new(
        FixtureSource::new(Source::Shopify).with_records(EntityKind::Inventory, items("S", 1)),
    );
    let credentials = disconnected(&source).await;

    let err = engine
        .sync_entity(
            source.as_ref(),
            &credentials,
            EntityKind::Inventory,
            10,
            &ProgressSink::Disabled,
            &CancelToken::never(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotConnected(Source::Shopify)));
    assert_eq!(source.fetches(), 0);
}

#[tokio::test]
async fn test_concurrent_passes_share_one_refresh() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let customers = (0..3)
        .map(|i| {
            ExternalRecord::Customer(ExternalCustomer {
                external_id: format!("C{i}"),
                display_name: format!("Customer {i}"),
                ..Default::default()
            })
        })
        .collect();
    let source = Arc::new(
        FixtureSource::new(Source::QuickBooks)
            .with_records(EntityKind::Inventory, items("Q", 3))
            .with_records(EntityKind::Customer, customers),
    );
    // Inside the five-minute lead window.
    let credentials = connected_with(&source, creds("access-0", ChronoDuration::minutes(1))).await;

    let cancel = CancelToken::never();
    let (a, b) = tokio::join!(
        engine.sync_entity(
            source.as_ref(),
            &credentials,
            EntityKind::Inventory,
            100,
            &ProgressSink::Disabled,
            &cancel,
        ),
        engine.sync_entity(
            source.as_ref(),
            &credentials,
            EntityKind::Customer,
            100,
            &ProgressSink::Disabled,
            &cancel,
        ),
    );
    assert_eq!(a.unwrap().created, 3);
    assert_eq!(b.unwrap().created, 3);
    assert_eq!(source.refreshes(), 1);
}

// =============================================================================
// Push
// =============================================================================

#[tokio::test]
async fn test_push_records_new_sync_token() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let source = Arc::new(
        FixtureSource::new(Source::QuickBooks)
            .with_records(EntityKind::Inventory, vec![item("Q1", "ABC", 10)]),
    );
    run(&engine, &source, EntityKind::Inventory, 100).await.unwrap();
    let id = deterministic_id(IdSpace::QuickBooksItem, "Q1").unwrap();

    let credentials = connected(&source).await;
    let outcome = engine
        .push_inventory(source.as_ref(), &credentials, id)
        .await
        .unwrap();
    assert!(matches!(outcome, PushOutcome::Pushed(_)));
    let stored = db.inventory().require(id).await.unwrap();
    assert_eq!(stored.quickbooks_sync_token.as_deref(), Some("8"));
    assert!(!stored.needs_reconciliation);
}

#[tokio::test]
async fn test_stale_push_flags_record() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let source = Arc::new(
        FixtureSource::new(Source::QuickBooks)
            .with_records(EntityKind::Inventory, vec![item("Q1", "ABC", 10)])
            .with_push_conflict(),
    );
    run(&engine, &source, EntityKind::Inventory, 100).await.unwrap();
    let id = deterministic_id(IdSpace::QuickBooksItem, "Q1").unwrap();
    let before = db.inventory().require(id).await.unwrap();

    let credentials = connected(&source).await;
    let outcome = engine
        .push_inventory(source.as_ref(), &credentials, id)
        .await
        .unwrap();
    match outcome {
        PushOutcome::Conflict(issue) => {
            assert_eq!(issue.kind, IssueKind::Conflict);
            assert_eq!(issue.external_id.as_deref(), Some("Q1"));
        }
        other => panic!("expected a conflict, got {other:?}"),
    }
    let after = db.inventory().require(id).await.unwrap();
    assert!(after.needs_reconciliation);
    assert_eq!(after.quickbooks_sync_token, before.quickbooks_sync_token);
    assert_eq!(after.quantity_on_hand, before.quantity_on_hand);
}

#[tokio::test]
async fn test_push_requires_link() {
    let db = db().await;
    let engine = SyncEngine::new(db.clone(), settings());
    let local = db
        .inventory()
        .create_local(NewInventoryItem {
            sku: "LOCAL-1".into(),
            name: "Local only".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let source = Arc::new(FixtureSource::new(Source::QuickBooks));
    let credentials = connected(&source).await;

    let err = engine
        .push_inventory(source.as_ref(), &credentials, local.id)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotLinked { id, .. } if id == local.id));
}
