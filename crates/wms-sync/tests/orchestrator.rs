//! Whole-refresh behavior: isolation between sources, staleness, history.

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use wms_core::{EntityKind, Source};
use wms_sync::{
    RunStatus, SourceBinding, SyncConfig, SyncError, SyncOrchestrator, SyncSettings, Trigger,
};

fn config(sync: SyncSettings) -> SyncConfig {
    SyncConfig {
        sync,
        ..SyncConfig::default()
    }
}

async fn bind(source: &Arc<FixtureSource>) -> SourceBinding {
    SourceBinding::new(source.clone(), connected(source).await)
}

#[tokio::test]
async fn test_failing_source_does_not_block_the_other() {
    let db = db().await;
    let shopify = Arc::new(
        FixtureSource::new(Source::Shopify).with_records(EntityKind::Inventory, items("S", 2)),
    );
    let quickbooks = Arc::new(
        FixtureSource::new(Source::QuickBooks).with_records(EntityKind::Inventory, items("Q", 2)),
    );
    let bindings = vec![
        SourceBinding::new(shopify.clone(), disconnected(&shopify).await),
        bind(&quickbooks).await,
    ];
    let orchestrator = SyncOrchestrator::new(db.clone(), config(settings()), bindings);

    let result = orchestrator.refresh_all(Trigger::Manual).await.unwrap();
    assert_eq!(result.status, RunStatus::Partial);
    assert_eq!(result.created(), 2);
    assert_eq!(
        result.log,
        vec![
            "Shopify: skipped: Shopify is not connected".to_string(),
            "QuickBooks inventory: 2 created, 0 updated, 0 failed".to_string(),
        ]
    );
    assert_eq!(shopify.fetches(), 0);
    assert_eq!(db.inventory().count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_aborted_pass_continues_with_next_entity() {
    let db = db().await;
    let server_error = || SyncError::ServerError {
        remote: Source::QuickBooks,
        status: 500,
        body: String::new(),
    };
    let customers = vec![wms_sync::ExternalRecord::Customer(wms_sync::ExternalCustomer {
        external_id: "C1".into(),
        display_name: "Acme".into(),
        ..Default::default()
    })];
    // Both passes request page 1; the scripted failures hit whichever asks
    // first, which is inventory.
    let quickbooks = Arc::new(
        FixtureSource::new(Source::QuickBooks)
            .with_records(EntityKind::Inventory, items("Q", 2))
            .with_records(EntityKind::Customer, customers)
            .failing(1, server_error())
            .failing(1, server_error()),
    );
    let orchestrator =
        SyncOrchestrator::new(db.clone(), config(settings()), vec![bind(&quickbooks).await]);

    let result = orchestrator.refresh_all(Trigger::Manual).await.unwrap();
    assert_eq!(result.status, RunStatus::Partial);
    assert_eq!(result.passes.len(), 2);
    assert!(result.log[0].starts_with("QuickBooks inventory: 0 created, 0 updated, 0 failed (aborted:"));
    assert_eq!(result.log[1], "QuickBooks customers: 1 created, 0 updated, 0 failed");
    assert_eq!(db.customers().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_scheduled_refresh_skips_fresh_data() {
    let db = db().await;
    let quickbooks = Arc::new(
        FixtureSource::new(Source::QuickBooks).with_records(EntityKind::Inventory, items("Q", 3)),
    );
    let orchestrator =
        SyncOrchestrator::new(db.clone(), config(settings()), vec![bind(&quickbooks).await]);

    let manual = orchestrator.refresh_all(Trigger::Manual).await.unwrap();
    assert_eq!(manual.status, RunStatus::Success);
    let fetches = quickbooks.fetches();

    let scheduled = orchestrator.refresh_all(Trigger::Scheduled).await.unwrap();
    assert_eq!(scheduled.status, RunStatus::Skipped);
    assert!(scheduled.passes.is_empty());
    assert_eq!(quickbooks.fetches(), fetches);

    let history = orchestrator.history(10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, "skipped");
    assert_eq!(history[0].trigger_kind, "scheduled");
    assert_eq!(history[1].status, "success");
    assert_eq!(history[1].created, 3);
    assert_eq!(
        history[1].log_lines().unwrap(),
        vec!["QuickBooks inventory: 3 created, 0 updated, 0 failed".to_string()]
    );
}

#[tokio::test]
async fn test_zero_threshold_always_runs() {
    let db = db().await;
    let quickbooks = Arc::new(
        FixtureSource::new(Source::QuickBooks).with_records(EntityKind::Inventory, items("Q", 1)),
    );
    let orchestrator = SyncOrchestrator::new(
        db.clone(),
        config(SyncSettings {
            staleness_threshold_mins: 0,
            ..settings()
        }),
        vec![bind(&quickbooks).await],
    );

    orchestrator.refresh_all(Trigger::Manual).await.unwrap();
    let scheduled = orchestrator.refresh_all(Trigger::Scheduled).await.unwrap();
    assert_eq!(scheduled.status, RunStatus::Success);
    assert_eq!(scheduled.updated(), 0);
    assert_eq!(scheduled.passes.len(), 1);
}

#[tokio::test]
async fn test_failed_run_does_not_count_as_fresh() {
    let db = db().await;
    let shopify = Arc::new(
        FixtureSource::new(Source::Shopify).with_records(EntityKind::Inventory, items("S", 1)),
    );
    let orchestrator = SyncOrchestrator::new(
        db.clone(),
        config(settings()),
        vec![SourceBinding::new(shopify.clone(), disconnected(&shopify).await)],
    );

    let first = orchestrator.refresh_all(Trigger::Manual).await.unwrap();
    assert_eq!(first.status, RunStatus::Failure);

    let scheduled = orchestrator.refresh_all(Trigger::Scheduled).await.unwrap();
    assert_eq!(scheduled.status, RunStatus::Failure);
}

#[tokio::test]
async fn test_no_sources_configured() {
    let db = db().await;
    let orchestrator = SyncOrchestrator::new(db.clone(), config(settings()), Vec::new());

    let result = orchestrator.refresh_all(Trigger::Manual).await.unwrap();
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.log, vec!["No sources are configured".to_string()]);
}

#[tokio::test]
async fn test_concurrent_sources() {
    let db = db().await;
    let shopify = Arc::new(
        FixtureSource::new(Source::Shopify).with_records(EntityKind::Inventory, items("S", 4)),
    );
    let quickbooks = Arc::new(
        FixtureSource::new(Source::QuickBooks).with_records(EntityKind::Inventory, items("Q", 3)),
    );
    let orchestrator = SyncOrchestrator::new(
        db.clone(),
        config(SyncSettings {
            concurrent_sources: true,
            ..settings()
        }),
        vec![bind(&shopify).await, bind(&quickbooks).await],
    );

    let result = orchestrator.refresh_all(Trigger::Manual).await.unwrap();
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.created(), 7);
    assert_eq!(db.inventory().count().await.unwrap(), 7);
}

#[tokio::test]
async fn test_cancel_scheduled_refresh() {
    let db = db().await;
    let shopify = Arc::new(
        FixtureSource::new(Source::Shopify)
            .endless()
            .with_delay(Duration::from_millis(25)),
    );
    let orchestrator = SyncOrchestrator::new(
        db.clone(),
        config(SyncSettings {
            page_size: 5,
            max_pages: 4,
            ..settings()
        }),
        vec![bind(&shopify).await],
    );

    let run = orchestrator.refresh_all(Trigger::Scheduled);
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(60)).await;
        orchestrator.cancel_scheduled().await;
    };
    let (result, ()) = tokio::join!(run, cancel);
    let result = result.unwrap();
    assert_eq!(result.passes.len(), 1);
    assert!(result.passes[0].report.as_ref().unwrap().cancelled);
    assert!(result.log[0].ends_with("(cancelled)"));
    assert_eq!(result.status, RunStatus::Partial);

    // The next scheduled refresh starts with a fresh token.
    let next = orchestrator.refresh_all(Trigger::Scheduled).await.unwrap();
    assert_eq!(next.passes.len(), 3);
    assert!(next
        .passes
        .iter()
        .all(|p| !p.report.as_ref().unwrap().cancelled));
}

#[tokio::test]
async fn test_push_needs_a_configured_source() {
    let db = db().await;
    let orchestrator = SyncOrchestrator::new(db.clone(), config(settings()), Vec::new());

    let err = orchestrator.push_inventory(Source::Shopify, 1).await.unwrap_err();
    assert!(matches!(err, SyncError::NotConnected(Source::Shopify)));
}
