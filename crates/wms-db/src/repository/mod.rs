//! # Repository Module
//!
//! Database repository implementations for the WMS Suite local store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Record Matcher / App                                                  │
//! │       │                                                                 │
//! │       │  db.inventory().find_by_external(Source::QuickBooks, "Q1")     │
//! │       ▼                                                                 │
//! │  InventoryRepository                                                   │
//! │  ├── find_by_external / find_unlinked_by_sku   (matcher lookups)       │
//! │  ├── insert / update                           (matcher writes)        │
//! │  ├── create_local / apply_movement             (app operations)        │
//! │  └── clear_by_origin                                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`InventoryRepository`](inventory::InventoryRepository)
//! - [`OrderRepository`](order::OrderRepository) - orders and line items
//! - [`CustomerRepository`](customer::CustomerRepository)
//! - [`CredentialRepository`](credential::CredentialRepository)
//! - [`SyncRunRepository`](sync_run::SyncRunRepository)

pub mod credential;
pub mod customer;
pub mod inventory;
pub mod order;
pub mod sync_run;

use sqlx::SqliteConnection;
use wms_core::{next_local_id, RANGE_LOCAL_MAX};

use crate::error::DbResult;

/// Tables whose ids come from the sequential local range.
#[derive(Debug, Clone, Copy)]
pub(crate) enum LocalTable {
    Inventory,
    Customers,
    Orders,
}

impl LocalTable {
    fn name(self) -> &'static str {
        match self {
            LocalTable::Inventory => "inventory",
            LocalTable::Customers => "customers",
            LocalTable::Orders => "orders",
        }
    }
}

/// Reads the highest id in the local range and returns the next one.
///
/// Must be called on the connection of the transaction that performs the
/// insert, while holding the database's local-id lock.
pub(crate) async fn allocate_local_id(
    conn: &mut SqliteConnection,
    table: LocalTable,
) -> DbResult<i32> {
    let sql = format!(
        "SELECT MAX(id) FROM {} WHERE id >= 1 AND id < ?1",
        table.name()
    );
    let current: Option<i32> = sqlx::query_scalar(&sql)
        .bind(RANGE_LOCAL_MAX)
        .fetch_one(&mut *conn)
        .await?;
    Ok(next_local_id(current)?)
}
