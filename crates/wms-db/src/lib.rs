//! # wms-db: Local Store for WMS Suite
//!
//! This crate provides the local persistent store: SQLite through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        WMS Suite Data Flow                              │
//! │                                                                         │
//! │  Record Matcher (wms-sync)          App screens                        │
//! │       │                                  │                              │
//! │       ▼                                  ▼                              │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     wms-db (THIS CRATE)                         │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │ inventory     │    │  (embedded)  │  │   │
//! │  │   │ SqlitePool    │◄───│ orders        │    │ 001_init.sql │  │   │
//! │  │   │ local-id lock │    │ customers     │    │ store_meta   │  │   │
//! │  │   │               │    │ credentials   │    │              │  │   │
//! │  │   │               │    │ sync_runs     │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wms_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/wms.db")).await?;
//! let item = db.inventory().find_by_external(Source::QuickBooks, "Q1").await?;
//! ```

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use pool::{ClearReport, Database, DbConfig};

pub use repository::credential::CredentialRepository;
pub use repository::customer::CustomerRepository;
pub use repository::inventory::InventoryRepository;
pub use repository::order::OrderRepository;
pub use repository::sync_run::{SyncRunRepository, SyncRunRow};
