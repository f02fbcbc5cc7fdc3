//! Shared fixtures for the engine and orchestrator tests.
//!
//! [`FixtureSource`] serves records from memory, paging them the way the
//! real source it stands in for would, and can be scripted to fail.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wms_core::{Credentials, EntityKind, InventoryRecord, Money, Quantity, Source};
use wms_db::{Database, DbConfig};
use wms_sync::{
    AuthHeader, CredentialManager, ExternalItem, ExternalRecord, ExternalSource,
    MemoryCredentialStore, Page, PageRequest, Pagination, PushReceipt, Rejected, SyncError,
    SyncResult, SyncSettings,
};

/// In-memory stand-in for a remote system.
pub struct FixtureSource {
    source: Source,
    pagination: Pagination,
    records: HashMap<EntityKind, Vec<ExternalRecord>>,
    /// Serve full pages forever.
    endless: bool,
    /// Errors returned before a page is served, keyed by page number.
    failures: Mutex<HashMap<u32, VecDeque<SyncError>>>,
    /// Undecodable entries appended to a page, keyed by page number.
    rejected: HashMap<u32, Vec<Rejected>>,
    /// Access token the remote answers 401 for.
    revoked_token: Mutex<Option<String>>,
    delay: Option<Duration>,
    push_conflict: bool,
    fetches: AtomicU32,
    refreshes: AtomicU32,
}

impl FixtureSource {
    pub fn new(source: Source) -> Self {
        let pagination = match source {
            Source::Shopify => Pagination::Cursor,
            Source::QuickBooks => Pagination::Offset { first: 1 },
        };
        FixtureSource {
            source,
            pagination,
            records: HashMap::new(),
            endless: false,
            failures: Mutex::new(HashMap::new()),
            rejected: HashMap::new(),
            revoked_token: Mutex::new(None),
            delay: None,
            push_conflict: false,
            fetches: AtomicU32::new(0),
            refreshes: AtomicU32::new(0),
        }
    }

    pub fn with_records(mut self, entity: EntityKind, records: Vec<ExternalRecord>) -> Self {
        self.records.insert(entity, records);
        self
    }

    pub fn endless(mut self) -> Self {
        self.endless = true;
        self
    }

    pub fn failing(self, page: u32, error: SyncError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .entry(page)
            .or_default()
            .push_back(error);
        self
    }

    pub fn with_rejected(mut self, page: u32, rejected: Rejected) -> Self {
        self.rejected.entry(page).or_default().push(rejected);
        self
    }

    pub fn revoking(self, access_token: &str) -> Self {
        *self.revoked_token.lock().unwrap() = Some(access_token.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_push_conflict(mut self) -> Self {
        self.push_conflict = true;
        self
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn slice(&self, entity: EntityKind, request: &PageRequest) -> Page {
        let all = self.records.get(&entity).map(Vec::as_slice).unwrap_or(&[]);
        let start = match self.pagination {
            Pagination::Offset { first } => request.offset.saturating_sub(first) as usize,
            Pagination::Cursor => request
                .cursor
                .as_deref()
                .and_then(|c| c.parse::<usize>().ok())
                .unwrap_or(0),
        };
        let start = start.min(all.len());
        let end = (start + request.size as usize).min(all.len());

        let mut page = Page {
            records: all[start..end].to_vec(),
            ..Page::default()
        };
        if self.pagination == Pagination::Cursor {
            page.has_more = Some(end < all.len());
            page.next_cursor = Some(end.to_string());
        }
        page
    }

    fn endless_page(&self, request: &PageRequest) -> Page {
        let records = (0..request.size)
            .map(|i| {
                let n = (request.page - 1) * request.size + i;
                item(&format!("endless-{n}"), &format!("END-{n}"), 1)
            })
            .collect();
        Page {
            records,
            rejected: Vec::new(),
            next_cursor: Some(format!("page-{}", request.page)),
            has_more: Some(true),
        }
    }
}

#[async_trait]
impl ExternalSource for FixtureSource {
    fn source(&self) -> Source {
        self.source
    }

    fn pagination(&self) -> Pagination {
        self.pagination
    }

    fn supports(&self, entity: EntityKind) -> bool {
        self.endless || self.records.contains_key(&entity)
    }

    fn auth_header(&self, credentials: &Credentials) -> AuthHeader {
        AuthHeader::Bearer(credentials.access_token.clone())
    }

    async fn fetch_page(
        &self,
        entity: EntityKind,
        request: &PageRequest,
        credentials: &Credentials,
    ) -> SyncResult<Page> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let revoked = self.revoked_token.lock().unwrap().clone();
        if revoked.as_deref() == Some(credentials.access_token.as_str()) {
            return Err(SyncError::Unauthorized(self.source));
        }
        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&request.page)
            .and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            return Err(error);
        }

        let mut page = if self.endless {
            self.endless_page(request)
        } else {
            self.slice(entity, request)
        };
        if let Some(rejected) = self.rejected.get(&request.page) {
            page.rejected.extend(rejected.iter().cloned());
        }
        Ok(page)
    }

    async fn refresh(&self, credentials: &Credentials) -> SyncResult<Credentials> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(Credentials {
            access_token: format!("fresh-{n}"),
            refresh_token: format!("refresh-{n}"),
            expires_at: Utc::now() + ChronoDuration::hours(1),
            account_id: credentials.account_id.clone(),
        })
    }

    async fn push_inventory(
        &self,
        record: &InventoryRecord,
        _credentials: &Credentials,
    ) -> SyncResult<PushReceipt> {
        let external_id = record
            .external_id(self.source)
            .unwrap_or_default()
            .to_string();
        if self.push_conflict {
            return Err(SyncError::ModifiedElsewhere {
                remote: self.source,
                external_id,
            });
        }
        Ok(PushReceipt {
            external_id,
            sync_token: Some("8".to_string()),
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

pub async fn db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

pub fn creds(access_token: &str, expires_in: ChronoDuration) -> Credentials {
    Credentials {
        access_token: access_token.to_string(),
        refresh_token: "refresh-0".to_string(),
        expires_at: Utc::now() + expires_in,
        account_id: "realm-1".to_string(),
    }
}

/// A manager holding a valid, non-expiring token for the fixture's source.
pub async fn connected(source: &Arc<FixtureSource>) -> Arc<CredentialManager> {
    connected_with(source, creds("access-0", ChronoDuration::hours(1))).await
}

pub async fn connected_with(
    source: &Arc<FixtureSource>,
    credentials: Credentials,
) -> Arc<CredentialManager> {
    let store = Arc::new(MemoryCredentialStore::with(source.source(), credentials));
    Arc::new(
        CredentialManager::open(source.clone(), store, ChronoDuration::minutes(5))
            .await
            .unwrap(),
    )
}

pub async fn disconnected(source: &Arc<FixtureSource>) -> Arc<CredentialManager> {
    Arc::new(
        CredentialManager::open(
            source.clone(),
            Arc::new(MemoryCredentialStore::new()),
            ChronoDuration::minutes(5),
        )
        .await
        .unwrap(),
    )
}

/// Fast retries so failure tests stay quick.
pub fn settings() -> SyncSettings {
    SyncSettings {
        retry_backoff_ms: 5,
        max_backoff_secs: 1,
        ..SyncSettings::default()
    }
}

pub fn item(external_id: &str, sku: &str, units: i64) -> ExternalRecord {
    ExternalRecord::Item(ExternalItem {
        external_id: external_id.to_string(),
        sku: sku.to_string(),
        name: format!("Item {sku}"),
        quantity: Some(Quantity::from_units(units)),
        price: Some(Money::from_cents(1_000)),
        ..ExternalItem::default()
    })
}

pub fn items(prefix: &str, count: usize) -> Vec<ExternalRecord> {
    (0..count)
        .map(|i| item(&format!("{prefix}-{i}"), &format!("{prefix}-SKU-{i}"), i as i64))
        .collect()
}
