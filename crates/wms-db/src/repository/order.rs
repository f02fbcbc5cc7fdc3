//! # Order Repository
//!
//! Orders and their line items.
//!
//! ## Ownership
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  orders (1) ──owns──► line_items (N)      ON DELETE CASCADE            │
//! │  line_items.inventory_id ──► inventory    ON DELETE SET NULL           │
//! │  orders.customer_id      ──► customers    ON DELETE SET NULL           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! An order and its lines are always written in one transaction. Updates
//! replace the full set of lines, because imported lines are re-derived
//! from the external payload on every sync.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use wms_core::{
    FulfillmentState, LineItem, Money, NewOrder, OrderRecord, Origin, Source, TransitionCause,
    ValidationError,
};

use super::{allocate_local_id, LocalTable};
use crate::error::{DbError, DbResult};

const COLUMNS: &str = "id, order_number, origin, customer_id, created_at, due_date, subtotal, \
    tax, total, amount_paid, balance, fulfillment, is_priority, needs_attention, \
    shopify_order_id, quickbooks_invoice_id, quickbooks_sync_token, last_synced_at, updated_at";

const INSERT: &str = "INSERT INTO orders (id, order_number, origin, customer_id, created_at, \
    due_date, subtotal, tax, total, amount_paid, balance, fulfillment, is_priority, \
    needs_attention, shopify_order_id, quickbooks_invoice_id, quickbooks_sync_token, \
    last_synced_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, \
    ?13, ?14, ?15, ?16, ?17, ?18, ?19)";

const UPDATE: &str = "UPDATE orders SET order_number = ?2, origin = ?3, customer_id = ?4, \
    created_at = ?5, due_date = ?6, subtotal = ?7, tax = ?8, total = ?9, amount_paid = ?10, \
    balance = ?11, fulfillment = ?12, is_priority = ?13, needs_attention = ?14, \
    shopify_order_id = ?15, quickbooks_invoice_id = ?16, quickbooks_sync_token = ?17, \
    last_synced_at = ?18, updated_at = ?19 WHERE id = ?1";

const LINE_COLUMNS: &str =
    "id, order_id, inventory_id, sku, description, quantity, unit_price, line_total, position";

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_order<'q>(query: SqliteQuery<'q>, o: &'q OrderRecord) -> SqliteQuery<'q> {
    query
        .bind(o.id)
        .bind(&o.order_number)
        .bind(o.origin)
        .bind(o.customer_id)
        .bind(o.created_at)
        .bind(o.due_date)
        .bind(o.subtotal)
        .bind(o.tax)
        .bind(o.total)
        .bind(o.amount_paid)
        .bind(o.balance)
        .bind(o.fulfillment)
        .bind(o.is_priority)
        .bind(o.needs_attention)
        .bind(&o.shopify_order_id)
        .bind(&o.quickbooks_invoice_id)
        .bind(&o.quickbooks_sync_token)
        .bind(o.last_synced_at)
        .bind(o.updated_at)
}

fn external_column(source: Source) -> &'static str {
    match source {
        Source::Shopify => "shopify_order_id",
        Source::QuickBooks => "quickbooks_invoice_id",
    }
}

/// Rejects an order whose stored balance disagrees with its totals.
fn check_balance(order: &OrderRecord) -> DbResult<()> {
    if order.balance != order.total - order.amount_paid {
        return Err(ValidationError::InvalidFormat {
            field: "balance".to_string(),
            reason: format!(
                "{} is not total {} minus paid {}",
                order.balance, order.total, order.amount_paid
            ),
        }
        .into());
    }
    Ok(())
}

/// Repository for order and line item database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
    local_ids: Arc<Mutex<()>>,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool, local_ids: Arc<Mutex<()>>) -> Self {
        OrderRepository { pool, local_ids }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets an order with its line items.
    pub async fn get(&self, id: i32) -> DbResult<Option<OrderRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM orders WHERE id = ?1");
        let order = sqlx::query_as::<_, OrderRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        self.with_items(order).await
    }

    pub async fn require(&self, id: i32) -> DbResult<OrderRecord> {
        self.get(id).await?.ok_or_else(|| DbError::not_found("Order", id))
    }

    pub async fn find_by_external(
        &self,
        source: Source,
        external_id: &str,
    ) -> DbResult<Option<OrderRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM orders WHERE {} = ?1",
            external_column(source)
        );
        let order = sqlx::query_as::<_, OrderRecord>(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        self.with_items(order).await
    }

    /// Secondary key: the human-readable order number among orders not yet
    /// linked to `source`.
    pub async fn find_unlinked_by_number(
        &self,
        source: Source,
        order_number: &str,
    ) -> DbResult<Option<OrderRecord>> {
        if order_number.trim().is_empty() {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {COLUMNS} FROM orders WHERE order_number = ?1 AND {} IS NULL \
             ORDER BY id LIMIT 1",
            external_column(source)
        );
        let order = sqlx::query_as::<_, OrderRecord>(&sql)
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;
        self.with_items(order).await
    }

    /// Line items of one order, in position order.
    pub async fn items(&self, order_id: i32) -> DbResult<Vec<LineItem>> {
        let sql = format!(
            "SELECT {LINE_COLUMNS} FROM line_items WHERE order_id = ?1 ORDER BY position"
        );
        let items = sqlx::query_as::<_, LineItem>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    /// Lists orders, newest first, without line items.
    pub async fn list(&self, limit: u32, offset: u32) -> DbResult<Vec<OrderRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM orders ORDER BY created_at DESC, id LIMIT ?1 OFFSET ?2"
        );
        let orders = sqlx::query_as::<_, OrderRecord>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(orders)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn with_items(&self, order: Option<OrderRecord>) -> DbResult<Option<OrderRecord>> {
        match order {
            Some(mut o) => {
                o.line_items = self.items(o.id).await?;
                Ok(Some(o))
            }
            None => Ok(None),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Inserts an order (id already assigned) and its line items.
    pub async fn insert(&self, order: &OrderRecord) -> DbResult<()> {
        check_balance(order)?;
        debug!(id = order.id, number = %order.order_number, lines = order.line_items.len(), "Inserting order");

        let mut tx = self.pool.begin().await?;
        bind_order(sqlx::query(INSERT), order)
            .execute(&mut *tx)
            .await?;
        write_lines(&mut tx, order).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Overwrites an order and replaces its line items.
    pub async fn update(&self, order: &OrderRecord) -> DbResult<()> {
        check_balance(order)?;

        let mut tx = self.pool.begin().await?;
        let result = bind_order(sqlx::query(UPDATE), order)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Order", order.id));
        }
        sqlx::query("DELETE FROM line_items WHERE order_id = ?1")
            .bind(order.id)
            .execute(&mut *tx)
            .await?;
        write_lines(&mut tx, order).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Creates an order by hand, with an id from the local range.
    ///
    /// Line totals, subtotal, total and balance are derived here.
    pub async fn create_local(&self, new: NewOrder) -> DbResult<OrderRecord> {
        if new.order_number.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "order_number".to_string(),
            }
            .into());
        }

        let now = Utc::now();
        let _guard = self.local_ids.lock().await;
        let mut tx = self.pool.begin().await?;

        let id = allocate_local_id(&mut tx, LocalTable::Orders).await?;
        let line_items: Vec<LineItem> = new
            .lines
            .into_iter()
            .enumerate()
            .map(|(position, line)| {
                LineItem::new(
                    Uuid::new_v4().to_string(),
                    id,
                    position as i32,
                    line.sku,
                    line.description,
                    line.quantity,
                    line.unit_price,
                )
                .with_inventory(line.inventory_id)
            })
            .collect();
        let subtotal: Money = line_items.iter().map(|l| l.line_total).sum();

        let mut order = OrderRecord {
            id,
            order_number: new.order_number,
            origin: Origin::Local,
            customer_id: new.customer_id,
            created_at: now,
            due_date: new.due_date,
            subtotal,
            tax: new.tax,
            total: subtotal + new.tax,
            amount_paid: new.amount_paid,
            balance: Money::zero(),
            fulfillment: Some(FulfillmentState::NeedsFulfillment),
            is_priority: new.is_priority,
            needs_attention: false,
            shopify_order_id: None,
            quickbooks_invoice_id: None,
            quickbooks_sync_token: None,
            last_synced_at: None,
            updated_at: now,
            line_items,
        };
        order.recompute_balance();

        bind_order(sqlx::query(INSERT), &order)
            .execute(&mut *tx)
            .await?;
        write_lines(&mut tx, &order).await?;
        tx.commit().await?;

        debug!(id, number = %order.order_number, "Created local order");
        Ok(order)
    }

    /// Moves an order through the fulfillment state machine.
    pub async fn set_fulfillment(
        &self,
        id: i32,
        to: FulfillmentState,
        cause: TransitionCause,
    ) -> DbResult<OrderRecord> {
        let mut order = self.require(id).await?;
        let from = order.fulfillment.unwrap_or_default();
        let next = from.transition(to, cause)?;

        sqlx::query("UPDATE orders SET fulfillment = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(next)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        debug!(id, from = %from, to = %next, "Fulfillment state changed");
        order.fulfillment = Some(next);
        Ok(order)
    }

    /// Sets the priority and attention flags.
    pub async fn set_flags(&self, id: i32, is_priority: bool, needs_attention: bool) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE orders SET is_priority = ?2, needs_attention = ?3, updated_at = ?4 WHERE id = ?1",
        )
        .bind(id)
        .bind(is_priority)
        .bind(needs_attention)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Order", id));
        }
        Ok(())
    }

    /// Deletes an order and (by cascade) its line items.
    /// Stamps the last-synced time without touching any field.
    pub async fn mark_synced(&self, id: i32, at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query("UPDATE orders SET last_synced_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Order", id));
        }
        Ok(())
    }

    pub async fn delete(&self, id: i32) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM orders WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

async fn write_lines(conn: &mut SqliteConnection, order: &OrderRecord) -> DbResult<()> {
    for line in &order.line_items {
        sqlx::query(
            "INSERT INTO line_items (id, order_id, inventory_id, sku, description, quantity, \
             unit_price, line_total, position) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&line.id)
        .bind(order.id)
        .bind(line.inventory_id)
        .bind(&line.sku)
        .bind(&line.description)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line.line_total)
        .bind(line.position)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
