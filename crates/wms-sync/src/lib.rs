//! # wms-sync: Multi-Source Reconciliation for WMS Suite
//!
//! This crate keeps the local store in step with the Shopify storefront and
//! QuickBooks Online. It pages through each source, matches every incoming
//! record against local data and writes the result, without creating
//! duplicates on re-sync.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          wms-sync Architecture                          │
//! │                                                                         │
//! │  App / scheduler                                                        │
//! │       │ refresh_all(trigger)          push_inventory(source, id)        │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                      SyncOrchestrator                           │   │
//! │  │  staleness check • source isolation • run history              │   │
//! │  └────────────────────────────┬────────────────────────────────────┘   │
//! │                               │ per source, per entity                  │
//! │  ┌────────────────────────────▼────────────────────────────────────┐   │
//! │  │                        SyncEngine                               │   │
//! │  │  page loop • ceiling • retry/backoff • progress • cancellation │   │
//! │  └───────┬──────────────────────┬───────────────────────┬──────────┘   │
//! │          ▼                      ▼                       ▼              │
//! │  ┌────────────────┐  ┌────────────────────┐  ┌──────────────────────┐  │
//! │  │CredentialManager│ │  ExternalSource    │  │   RecordMatcher      │  │
//! │  │ lead-window    │  │  ShopifySource     │  │  fk ► natural key ►  │  │
//! │  │ refresh, one   │  │  (GraphQL cursor)  │  │  deterministic id    │  │
//! │  │ refresh at a   │  │  QuickBooksSource  │  │  resolution policy   │  │
//! │  │ time           │  │  (SQL offset)      │  │                      │  │
//! │  └────────────────┘  └────────────────────┘  └──────────┬───────────┘  │
//! │                                                          ▼              │
//! │                                                   wms-db (SQLite)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`orchestrator`] - `SyncOrchestrator`, `refresh_all`, run history
//! - [`engine`] - `SyncEngine`, one paginated pass, inventory push
//! - [`matcher`] - `RecordMatcher`, create-vs-update and field merging
//! - [`credentials`] - `CredentialManager` and credential stores
//! - [`sources`] - `ExternalSource` trait, Shopify and QuickBooks clients
//! - [`progress`] - Progress events and cancellation tokens
//! - [`report`] - Per-pass counts and accumulated issues
//! - [`config`] - TOML + environment configuration
//! - [`telemetry`] - tracing subscriber setup
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wms_db::{Database, DbConfig};
//! use wms_sync::{SyncConfig, SyncOrchestrator, Trigger};
//!
//! wms_sync::telemetry::init_tracing(wms_sync::telemetry::DEFAULT_FILTER);
//!
//! let db = Database::new(DbConfig::new("wms.db")).await?;
//! let config = SyncConfig::load_or_default(None);
//! let orchestrator = SyncOrchestrator::from_config(db, config).await?;
//!
//! let result = orchestrator.refresh_all(Trigger::Manual).await?;
//! for line in &result.log {
//!     println!("{line}");
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod orchestrator;
pub mod progress;
pub mod report;
pub mod sources;
pub mod telemetry;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{CredentialSettings, QuickBooksSettings, ShopifySettings, SyncConfig, SyncSettings};
pub use credentials::{
    CredentialManager, CredentialStatus, CredentialStore, DbCredentialStore, MemoryCredentialStore,
    TokenLease,
};
pub use engine::{PushOutcome, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use matcher::{LocalRecord, RecordMatcher, UpsertAction, Upserted};
pub use orchestrator::{AggregateResult, PassOutcome, RunStatus, SourceBinding, SyncOrchestrator, Trigger};
pub use progress::{CancelHandle, CancelToken, ProgressEvent, ProgressSink, ProgressTotals};
pub use report::{IssueKind, PassReport, SyncIssue};
pub use sources::{
    AuthHeader, ExternalCustomer, ExternalItem, ExternalLine, ExternalOrder, ExternalRecord,
    ExternalSource, Page, PageRequest, Pagination, PushReceipt, QuickBooksSource, Rejected,
    ShopifySource,
};
