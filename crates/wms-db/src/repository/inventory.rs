//! # Inventory Repository
//!
//! Database operations for inventory items.
//!
//! ## Key Operations
//! - Matcher lookups: by external id, then by SKU among unlinked rows
//! - Matcher writes: insert with a deterministic id, full-row update
//! - Local operations: create (sequential id), stock movements, manual
//!   price/cost/label edits
//!
//! ## Quantity Guard
//! ```text
//! apply_movement(id, Remove(12))
//!      │
//!      ├── BEGIN
//!      ├── SELECT row                      (on hand: 10)
//!      ├── validate_movement ──► Err(NegativeQuantity)   ── ROLLBACK
//!      └── UPDATE quantity_on_hand ─► COMMIT
//! ```

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use wms_core::validation::{validate_movement, validate_name, validate_sku};
use wms_core::{
    InventoryRecord, LabelEdit, Money, NewInventoryItem, Origin, Source, StockMovement,
    ValidationError, ValueSource,
};

use super::{allocate_local_id, LocalTable};
use crate::error::{DbError, DbResult};

const COLUMNS: &str = "id, origin, sku, name, description, barcode, label_source, \
    labels_updated_at, quantity_on_hand, quantity_source, quantity_updated_at, min_stock, \
    manual_price, shopify_price, quickbooks_price, manual_cost, quickbooks_cost, \
    shopify_product_id, quickbooks_item_id, quickbooks_sync_token, needs_reconciliation, \
    updated_at, last_synced_shopify, last_synced_quickbooks";

const INSERT: &str = "INSERT INTO inventory (id, origin, sku, name, description, barcode, \
    label_source, labels_updated_at, quantity_on_hand, quantity_source, quantity_updated_at, \
    min_stock, manual_price, shopify_price, quickbooks_price, manual_cost, quickbooks_cost, \
    shopify_product_id, quickbooks_item_id, quickbooks_sync_token, needs_reconciliation, \
    updated_at, last_synced_shopify, last_synced_quickbooks) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, \
    ?19, ?20, ?21, ?22, ?23, ?24)";

const UPDATE: &str = "UPDATE inventory SET origin = ?2, sku = ?3, name = ?4, \
    description = ?5, barcode = ?6, label_source = ?7, labels_updated_at = ?8, \
    quantity_on_hand = ?9, quantity_source = ?10, quantity_updated_at = ?11, min_stock = ?12, \
    manual_price = ?13, shopify_price = ?14, quickbooks_price = ?15, manual_cost = ?16, \
    quickbooks_cost = ?17, shopify_product_id = ?18, quickbooks_item_id = ?19, \
    quickbooks_sync_token = ?20, needs_reconciliation = ?21, updated_at = ?22, \
    last_synced_shopify = ?23, last_synced_quickbooks = ?24 WHERE id = ?1";

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Binds every column in `COLUMNS` order (`?1` .. `?24`).
fn bind_record<'q>(query: SqliteQuery<'q>, r: &'q InventoryRecord) -> SqliteQuery<'q> {
    query
        .bind(r.id)
        .bind(r.origin)
        .bind(&r.sku)
        .bind(&r.name)
        .bind(&r.description)
        .bind(&r.barcode)
        .bind(r.label_source)
        .bind(r.labels_updated_at)
        .bind(r.quantity_on_hand)
        .bind(r.quantity_source)
        .bind(r.quantity_updated_at)
        .bind(r.min_stock)
        .bind(r.manual_price)
        .bind(r.shopify_price)
        .bind(r.quickbooks_price)
        .bind(r.manual_cost)
        .bind(r.quickbooks_cost)
        .bind(&r.shopify_product_id)
        .bind(&r.quickbooks_item_id)
        .bind(&r.quickbooks_sync_token)
        .bind(r.needs_reconciliation)
        .bind(r.updated_at)
        .bind(r.last_synced_shopify)
        .bind(r.last_synced_quickbooks)
}

fn external_column(source: Source) -> &'static str {
    match source {
        Source::Shopify => "shopify_product_id",
        Source::QuickBooks => "quickbooks_item_id",
    }
}

fn synced_column(source: Source) -> &'static str {
    match source {
        Source::Shopify => "last_synced_shopify",
        Source::QuickBooks => "last_synced_quickbooks",
    }
}

/// Repository for inventory database operations.
#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
    local_ids: Arc<Mutex<()>>,
}

impl InventoryRepository {
    /// Creates a new InventoryRepository.
    pub fn new(pool: SqlitePool, local_ids: Arc<Mutex<()>>) -> Self {
        InventoryRepository { pool, local_ids }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets an item by its local id.
    pub async fn get(&self, id: i32) -> DbResult<Option<InventoryRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM inventory WHERE id = ?1");
        let record = sqlx::query_as::<_, InventoryRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Gets an item by id, failing with `NotFound` if it does not exist.
    pub async fn require(&self, id: i32) -> DbResult<InventoryRecord> {
        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Inventory", id))
    }

    /// Finds the item linked to `external_id` in `source`.
    pub async fn find_by_external(
        &self,
        source: Source,
        external_id: &str,
    ) -> DbResult<Option<InventoryRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM inventory WHERE {} = ?1",
            external_column(source)
        );
        let record = sqlx::query_as::<_, InventoryRecord>(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Finds an item with this SKU that is not yet linked to `source`.
    ///
    /// Empty SKUs never match. The lowest id wins when several rows share a
    /// SKU.
    pub async fn find_unlinked_by_sku(
        &self,
        source: Source,
        sku: &str,
    ) -> DbResult<Option<InventoryRecord>> {
        if sku.trim().is_empty() {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {COLUMNS} FROM inventory WHERE sku = ?1 AND {} IS NULL ORDER BY id LIMIT 1",
            external_column(source)
        );
        let record = sqlx::query_as::<_, InventoryRecord>(&sql)
            .bind(sku)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Finds any item with this SKU (lowest id first).
    pub async fn find_by_sku(&self, sku: &str) -> DbResult<Option<InventoryRecord>> {
        if sku.trim().is_empty() {
            return Ok(None);
        }
        let sql = format!("SELECT {COLUMNS} FROM inventory WHERE sku = ?1 ORDER BY id LIMIT 1");
        let record = sqlx::query_as::<_, InventoryRecord>(&sql)
            .bind(sku)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Lists items ordered by name.
    pub async fn list(&self, limit: u32, offset: u32) -> DbResult<Vec<InventoryRecord>> {
        let sql =
            format!("SELECT {COLUMNS} FROM inventory ORDER BY name, id LIMIT ?1 OFFSET ?2");
        let records = sqlx::query_as::<_, InventoryRecord>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    /// Items flagged after a rejected push.
    pub async fn list_needing_reconciliation(&self) -> DbResult<Vec<InventoryRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM inventory WHERE needs_reconciliation = 1 ORDER BY id");
        let records = sqlx::query_as::<_, InventoryRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inventory")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // =========================================================================
    // Matcher Writes
    // =========================================================================

    /// Inserts a record with its id already assigned.
    pub async fn insert(&self, record: &InventoryRecord) -> DbResult<()> {
        debug!(id = record.id, sku = %record.sku, "Inserting inventory item");
        bind_record(sqlx::query(INSERT), record)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Overwrites every column of an existing record.
    pub async fn update(&self, record: &InventoryRecord) -> DbResult<()> {
        let result = bind_record(sqlx::query(UPDATE), record)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Inventory", record.id));
        }
        Ok(())
    }

    // =========================================================================
    // Local Operations
    // =========================================================================

    /// Creates an item by hand, with an id from the local range.
    pub async fn create_local(&self, new: NewInventoryItem) -> DbResult<InventoryRecord> {
        validate_name(&new.name)?;
        validate_sku(&new.sku)?;
        if new.quantity_on_hand.is_negative() {
            return Err(ValidationError::NegativeQuantity {
                sku: new.sku.clone(),
                on_hand: "0".to_string(),
                requested: new.quantity_on_hand.to_string(),
            }
            .into());
        }

        let now = Utc::now();
        let _guard = self.local_ids.lock().await;
        let mut tx = self.pool.begin().await?;

        let id = allocate_local_id(&mut tx, LocalTable::Inventory).await?;
        let record = InventoryRecord {
            id,
            origin: Origin::Local,
            sku: new.sku,
            name: new.name,
            description: new.description,
            barcode: new.barcode,
            label_source: ValueSource::Manual,
            labels_updated_at: Some(now),
            quantity_on_hand: new.quantity_on_hand,
            quantity_source: ValueSource::Manual,
            quantity_updated_at: Some(now),
            min_stock: new.min_stock,
            manual_price: new.manual_price,
            shopify_price: None,
            quickbooks_price: None,
            manual_cost: new.manual_cost,
            quickbooks_cost: None,
            shopify_product_id: None,
            quickbooks_item_id: None,
            quickbooks_sync_token: None,
            needs_reconciliation: false,
            updated_at: now,
            last_synced_shopify: None,
            last_synced_quickbooks: None,
        };
        bind_record(sqlx::query(INSERT), &record)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(id, sku = %record.sku, "Created local inventory item");
        Ok(record)
    }

    /// Applies a pick, putaway, removal or count adjustment.
    ///
    /// ## Errors
    /// `DbError::Validation(NegativeQuantity)` if the result would be below
    /// zero. Nothing is written in that case.
    pub async fn apply_movement(
        &self,
        id: i32,
        movement: StockMovement,
    ) -> DbResult<InventoryRecord> {
        let mut tx = self.pool.begin().await?;
        let mut record = fetch_on(&mut tx, id).await?;

        let next = validate_movement(&record.sku, record.quantity_on_hand, movement)?;

        let now = Utc::now();
        sqlx::query(
            "UPDATE inventory SET quantity_on_hand = ?2, quantity_source = ?3, \
             quantity_updated_at = ?4, updated_at = ?4 WHERE id = ?1",
        )
        .bind(id)
        .bind(next)
        .bind(ValueSource::Manual)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(id, from = %record.quantity_on_hand, to = %next, "Applied stock movement");
        record.quantity_on_hand = next;
        record.quantity_source = ValueSource::Manual;
        record.quantity_updated_at = Some(now);
        record.updated_at = now;
        Ok(record)
    }

    /// Sets or clears the manual price override.
    pub async fn set_manual_price(&self, id: i32, price: Option<Money>) -> DbResult<InventoryRecord> {
        if let Some(p) = price {
            if p.cents() < 0 {
                return Err(ValidationError::MustBePositive {
                    field: "price".to_string(),
                }
                .into());
            }
        }
        self.set_money_column(id, "manual_price", price).await
    }

    /// Sets or clears the manual cost.
    pub async fn set_manual_cost(&self, id: i32, cost: Option<Money>) -> DbResult<InventoryRecord> {
        if let Some(c) = cost {
            if c.cents() < 0 {
                return Err(ValidationError::MustBePositive {
                    field: "cost".to_string(),
                }
                .into());
            }
        }
        self.set_money_column(id, "manual_cost", cost).await
    }

    async fn set_money_column(
        &self,
        id: i32,
        column: &'static str,
        value: Option<Money>,
    ) -> DbResult<InventoryRecord> {
        let sql = format!("UPDATE inventory SET {column} = ?2, updated_at = ?3 WHERE id = ?1");
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(value)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Inventory", id));
        }
        self.require(id).await
    }

    /// Applies a manual label edit. The edit becomes the authoritative
    /// label until a later sync observation replaces it.
    pub async fn edit_labels(&self, id: i32, edit: LabelEdit) -> DbResult<InventoryRecord> {
        if let Some(name) = &edit.name {
            validate_name(name)?;
        }
        if let Some(sku) = &edit.sku {
            validate_sku(sku)?;
        }

        let mut tx = self.pool.begin().await?;
        let mut record = fetch_on(&mut tx, id).await?;

        let now = Utc::now();
        if let Some(sku) = edit.sku {
            record.sku = sku;
        }
        if let Some(name) = edit.name {
            record.name = name;
        }
        if let Some(description) = edit.description {
            record.description = description;
        }
        if let Some(barcode) = edit.barcode {
            record.barcode = barcode;
        }
        record.label_source = ValueSource::Manual;
        record.labels_updated_at = Some(now);
        record.updated_at = now;

        bind_record(sqlx::query(UPDATE), &record)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(record)
    }

    /// Flags or unflags an item for manual reconciliation.
    pub async fn set_needs_reconciliation(&self, id: i32, flag: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE inventory SET needs_reconciliation = ?2 WHERE id = ?1")
            .bind(id)
            .bind(flag)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Inventory", id));
        }
        Ok(())
    }

    /// Records a successful push to QuickBooks: the new sync token, the
    /// sync time, and a cleared reconciliation flag.
    pub async fn record_quickbooks_push(&self, id: i32, sync_token: &str) -> DbResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE inventory SET quickbooks_sync_token = ?2, last_synced_quickbooks = ?3, \
             needs_reconciliation = 0 WHERE id = ?1",
        )
        .bind(id)
        .bind(sync_token)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Inventory", id));
        }
        Ok(())
    }

    /// Stamps the last-synced time for `source` without touching any field.
    pub async fn mark_synced(&self, id: i32, source: Source, at: DateTime<Utc>) -> DbResult<()> {
        let sql = format!("UPDATE inventory SET {} = ?2 WHERE id = ?1", synced_column(source));
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Inventory", id));
        }
        Ok(())
    }

    /// Records a successful push to Shopify.
    pub async fn record_shopify_push(&self, id: i32) -> DbResult<()> {
        let result = sqlx::query("UPDATE inventory SET last_synced_shopify = ?2 WHERE id = ?1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Inventory", id));
        }
        Ok(())
    }

    /// Deletes one item. Line items that referenced it keep their rows.
    pub async fn delete(&self, id: i32) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM inventory WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

async fn fetch_on(conn: &mut SqliteConnection, id: i32) -> DbResult<InventoryRecord> {
    let sql = format!("SELECT {COLUMNS} FROM inventory WHERE id = ?1");
    sqlx::query_as::<_, InventoryRecord>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Inventory", id))
}

// =============================================================================
// Unit Tests
// =============================================================================
