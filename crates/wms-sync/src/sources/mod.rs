//! # External Sources
//!
//! One [`ExternalSource`] implementation per system of record. The sync
//! engine only talks to this trait, so it has no Shopify or QuickBooks
//! branches of its own.
//!
//! ## Pagination Strategies
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Offset { first: 1 }   (QuickBooks)                                     │
//! │    page 1: STARTPOSITION 1   MAXRESULTS n                               │
//! │    page 2: STARTPOSITION 1+received                                     │
//! │    end:    fewer than n records received                                │
//! │                                                                         │
//! │  Cursor   (Shopify GraphQL)                                             │
//! │    page 1: first: n                                                     │
//! │    page 2: first: n, after: endCursor                                   │
//! │    end:    hasNextPage = false, or fewer than n nodes                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Payloads are decoded into typed records at this boundary. A record that
//! fails to decode becomes a [`Rejected`] entry on its page, so a single bad
//! record never hides the rest of the page.

pub mod quickbooks;
pub mod shopify;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use wms_core::validation::MAX_PAGE_SIZE;
use wms_core::{Credentials, EntityKind, InventoryRecord, Money, Quantity, Source};

use crate::error::{SyncError, SyncResult};

pub use quickbooks::QuickBooksSource;
pub use shopify::ShopifySource;

// =============================================================================
// Paging
// =============================================================================

/// How a source walks through a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// Position-based paging. `first` is the position of the first record.
    Offset { first: u32 },
    /// Opaque continuation cursor.
    Cursor,
}

/// Parameters for one page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number within the pass.
    pub page: u32,
    pub size: u32,
    /// Start position for offset paging.
    pub offset: u32,
    /// Continuation cursor for cursor paging. `None` on the first page.
    pub cursor: Option<String>,
}

impl PageRequest {
    /// The first page of a pass.
    pub fn first(pagination: Pagination, size: u32) -> Self {
        let offset = match pagination {
            Pagination::Offset { first } => first,
            Pagination::Cursor => 0,
        };
        PageRequest {
            page: 1,
            size,
            offset,
            cursor: None,
        }
    }
}

/// One decoded page.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<ExternalRecord>,
    /// Entries that were present but could not be decoded.
    pub rejected: Vec<Rejected>,
    pub next_cursor: Option<String>,
    /// Explicit end-of-data signal when the source provides one.
    pub has_more: Option<bool>,
}

impl Page {
    /// Entries the source returned, decodable or not.
    pub fn received(&self) -> usize {
        self.records.len() + self.rejected.len()
    }
}

/// A page entry that failed to decode.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub external_id: Option<String>,
    pub reason: String,
}

// =============================================================================
// Typed Records
// =============================================================================

/// A decoded external record of any entity kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalRecord {
    Item(ExternalItem),
    Customer(ExternalCustomer),
    Order(ExternalOrder),
}

impl ExternalRecord {
    pub fn external_id(&self) -> &str {
        match self {
            ExternalRecord::Item(item) => &item.external_id,
            ExternalRecord::Customer(customer) => &customer.external_id,
            ExternalRecord::Order(order) => &order.external_id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            ExternalRecord::Item(_) => EntityKind::Inventory,
            ExternalRecord::Customer(_) => EntityKind::Customer,
            ExternalRecord::Order(_) => EntityKind::Order,
        }
    }
}

/// A product (Shopify) or item (QuickBooks).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalItem {
    pub external_id: String,
    pub sku: String,
    pub name: String,
    pub description: String,
    /// `None` when the source has no barcode field.
    pub barcode: Option<String>,
    /// `None` when the source does not track stock for this item.
    pub quantity: Option<Quantity>,
    pub price: Option<Money>,
    pub cost: Option<Money>,
    pub sync_token: Option<String>,
    /// Last modification on the source side, when reported.
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalCustomer {
    pub external_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    /// Open balance. Only the accounting system reports one.
    pub balance: Option<Money>,
    pub sync_token: Option<String>,
}

/// An order (Shopify) or invoice (QuickBooks).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalOrder {
    pub external_id: String,
    pub order_number: String,
    pub customer_external_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub tax: Money,
    pub total: Money,
    pub amount_paid: Money,
    pub sync_token: Option<String>,
    pub lines: Vec<ExternalLine>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalLine {
    /// Product/item id in the same source, used to link local inventory.
    pub item_external_id: Option<String>,
    pub sku: String,
    pub description: String,
    pub quantity: Quantity,
    pub unit_price: Money,
}

/// Result of a successful push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReceipt {
    pub external_id: String,
    /// New version token, for sources that use one.
    pub sync_token: Option<String>,
}

// =============================================================================
// Auth
// =============================================================================

/// How a source wants the access token presented.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthHeader {
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// A source-specific header, e.g. `X-Shopify-Access-Token`.
    Custom { name: &'static str, value: String },
}

impl AuthHeader {
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            AuthHeader::Bearer(token) => request.bearer_auth(token),
            AuthHeader::Custom { name, value } => request.header(*name, value),
        }
    }
}

impl std::fmt::Debug for AuthHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthHeader::Bearer(_) => f.write_str("Bearer(***)"),
            AuthHeader::Custom { name, .. } => write!(f, "Custom({name}: ***)"),
        }
    }
}

// =============================================================================
// ExternalSource Trait
// =============================================================================

/// A system of record the engine can page through.
#[async_trait]
pub trait ExternalSource: Send + Sync {
    fn source(&self) -> Source;

    fn pagination(&self) -> Pagination;

    fn supports(&self, entity: EntityKind) -> bool;

    /// Largest page the remote accepts.
    fn max_page_size(&self) -> u32 {
        MAX_PAGE_SIZE
    }

    fn auth_header(&self, credentials: &Credentials) -> AuthHeader;

    async fn fetch_page(
        &self,
        entity: EntityKind,
        request: &PageRequest,
        credentials: &Credentials,
    ) -> SyncResult<Page>;

    /// Exchanges the refresh token for a fresh credential set.
    async fn refresh(&self, credentials: &Credentials) -> SyncResult<Credentials>;

    /// Writes local inventory edits back to the source.
    async fn push_inventory(
        &self,
        _record: &InventoryRecord,
        _credentials: &Credentials,
    ) -> SyncResult<PushReceipt> {
        Err(SyncError::Unsupported {
            remote: self.source(),
            operation: "inventory push",
        })
    }
}

// =============================================================================
// Shared HTTP Plumbing
// =============================================================================

/// reqwest client bound to one source and one timeout budget.
#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    client: reqwest::Client,
    source: Source,
    timeout: Duration,
}

impl HttpClient {
    pub(crate) fn new(source: Source, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("wms-suite/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(HttpClient {
            client,
            source,
            timeout,
        })
    }

    pub(crate) fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    pub(crate) fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url)
    }

    /// Sends a request under the timeout budget. Returns the response for
    /// 2xx and for 4xx statuses other than 401 and 429, which the caller
    /// inspects for a source-specific error body.
    pub(crate) async fn send(&self, request: RequestBuilder) -> SyncResult<Response> {
        let secs = self.timeout.as_secs();
        let response = match tokio::time::timeout(self.timeout, request.send()).await {
            Err(_) => return Err(SyncError::Timeout(secs)),
            Ok(Err(e)) if e.is_timeout() => return Err(SyncError::Timeout(secs)),
            Ok(result) => result?,
        };

        let status = response.status();
        debug!(source = %self.source, status = status.as_u16(), "HTTP response");

        if status == StatusCode::UNAUTHORIZED {
            return Err(SyncError::Unauthorized(self.source));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SyncError::RateLimited {
                remote: self.source,
            });
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::ServerError {
                remote: self.source,
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }
        Ok(response)
    }

    /// Reads a body as JSON, mapping decode failures to malformed-response.
    /// A 4xx with a non-JSON body (an HTML 403 or 404 page) is a rejection
    /// by the remote, not an unreadable page.
    pub(crate) async fn json_body(&self, response: Response) -> SyncResult<serde_json::Value> {
        let status = response.status();
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            if status.is_client_error() {
                SyncError::RemoteRejected {
                    remote: self.source,
                    message: format!("HTTP {}", status.as_u16()),
                }
            } else {
                SyncError::MalformedResponse(format!("{} body is not JSON: {e}", self.source))
            }
        })
    }

    pub(crate) fn source(&self) -> Source {
        self.source
    }
}

/// Decodes one JSON node into a typed payload, rejecting it on failure.
pub(crate) fn decode_node<T: serde::de::DeserializeOwned>(
    node: serde_json::Value,
    id_field: &str,
) -> Result<T, Rejected> {
    let external_id = node
        .get(id_field)
        .and_then(|v| v.as_str().map(str::to_string));
    serde_json::from_value(node).map_err(|e| Rejected {
        external_id,
        reason: e.to_string(),
    })
}

/// Parses a decimal string amount, as both APIs send money.
pub(crate) fn parse_money(text: &str) -> Result<Money, String> {
    Money::parse_decimal(text).map_err(|e| e.to_string())
}

/// Absolute expiry for a token that lives `expires_in` seconds from now.
pub(crate) fn expiry_after(expires_in: i64) -> SyncResult<DateTime<Utc>> {
    TimeDelta::try_seconds(expires_in)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| SyncError::MalformedResponse("token expiry out of range".into()))
}

pub(crate) fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_after() {
        let expiry = expiry_after(3600).unwrap();
        assert!(expiry > Utc::now() + TimeDelta::minutes(59));
        assert!(matches!(
            expiry_after(9_000_000_000_000),
            Err(SyncError::MalformedResponse(_))
        ));
        assert!(matches!(expiry_after(i64::MAX), Err(SyncError::MalformedResponse(_))));
    }

    #[test]
    fn test_first_page_request() {
        let offset = PageRequest::first(Pagination::Offset { first: 1 }, 100);
        assert_eq!(offset.offset, 1);
        assert_eq!(offset.page, 1);
        assert!(offset.cursor.is_none());

        let cursor = PageRequest::first(Pagination::Cursor, 50);
        assert_eq!(cursor.offset, 0);
        assert_eq!(cursor.size, 50);
    }

    #[test]
    fn test_decode_node_keeps_id_of_rejected_record() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Node {
            id: String,
            total: f64,
        }

        let bad = serde_json::json!({ "id": "gid://shopify/Order/7", "total": "abc" });
        let rejected = decode_node::<Node>(bad, "id").unwrap_err();
        assert_eq!(rejected.external_id.as_deref(), Some("gid://shopify/Order/7"));
    }

    #[test]
    fn test_auth_header_debug_hides_token() {
        let header = AuthHeader::Custom {
            name: "X-Shopify-Access-Token",
            value: "shpat_secret".into(),
        };
        assert!(!format!("{header:?}").contains("shpat_secret"));
        assert!(!format!("{:?}", AuthHeader::Bearer("abc".into())).contains("abc"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
