//! # Customer Repository
//!
//! Customers mirror the order pattern: one nullable external key per
//! source, a sync token for QuickBooks, and a secondary match on e-mail.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use wms_core::validation::validate_name;
use wms_core::{CustomerRecord, Money, NewCustomer, Origin, Source, ValueSource};

use super::{allocate_local_id, LocalTable};
use crate::error::{DbError, DbResult};

const COLUMNS: &str = "id, origin, display_name, email, phone, company, balance, \
    shopify_customer_id, quickbooks_customer_id, quickbooks_sync_token, label_source, \
    last_synced_at, updated_at";

const INSERT: &str = "INSERT INTO customers (id, origin, display_name, email, phone, company, \
    balance, shopify_customer_id, quickbooks_customer_id, quickbooks_sync_token, label_source, \
    last_synced_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

const UPDATE: &str = "UPDATE customers SET origin = ?2, display_name = ?3, email = ?4, \
    phone = ?5, company = ?6, balance = ?7, shopify_customer_id = ?8, \
    quickbooks_customer_id = ?9, quickbooks_sync_token = ?10, label_source = ?11, \
    last_synced_at = ?12, updated_at = ?13 WHERE id = ?1";

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_record<'q>(query: SqliteQuery<'q>, c: &'q CustomerRecord) -> SqliteQuery<'q> {
    query
        .bind(c.id)
        .bind(c.origin)
        .bind(&c.display_name)
        .bind(&c.email)
        .bind(&c.phone)
        .bind(&c.company)
        .bind(c.balance)
        .bind(&c.shopify_customer_id)
        .bind(&c.quickbooks_customer_id)
        .bind(&c.quickbooks_sync_token)
        .bind(c.label_source)
        .bind(c.last_synced_at)
        .bind(c.updated_at)
}

fn external_column(source: Source) -> &'static str {
    match source {
        Source::Shopify => "shopify_customer_id",
        Source::QuickBooks => "quickbooks_customer_id",
    }
}

/// Repository for customer database operations.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
    local_ids: Arc<Mutex<()>>,
}

impl CustomerRepository {
    pub fn new(pool: SqlitePool, local_ids: Arc<Mutex<()>>) -> Self {
        CustomerRepository { pool, local_ids }
    }

    pub async fn get(&self, id: i32) -> DbResult<Option<CustomerRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM customers WHERE id = ?1");
        let record = sqlx::query_as::<_, CustomerRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    pub async fn find_by_external(
        &self,
        source: Source,
        external_id: &str,
    ) -> DbResult<Option<CustomerRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM customers WHERE {} = ?1",
            external_column(source)
        );
        let record = sqlx::query_as::<_, CustomerRecord>(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Secondary key: case-insensitive e-mail among rows not yet linked to
    /// `source`.
    pub async fn find_unlinked_by_email(
        &self,
        source: Source,
        email: &str,
    ) -> DbResult<Option<CustomerRecord>> {
        if email.trim().is_empty() {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {COLUMNS} FROM customers WHERE lower(email) = lower(?1) AND {} IS NULL \
             ORDER BY id LIMIT 1",
            external_column(source)
        );
        let record = sqlx::query_as::<_, CustomerRecord>(&sql)
            .bind(email.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    pub async fn list(&self, limit: u32, offset: u32) -> DbResult<Vec<CustomerRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM customers ORDER BY display_name, id LIMIT ?1 OFFSET ?2"
        );
        let records = sqlx::query_as::<_, CustomerRecord>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customers")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn insert(&self, record: &CustomerRecord) -> DbResult<()> {
        debug!(id = record.id, name = %record.display_name, "Inserting customer");
        bind_record(sqlx::query(INSERT), record)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update(&self, record: &CustomerRecord) -> DbResult<()> {
        let result = bind_record(sqlx::query(UPDATE), record)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Customer", record.id));
        }
        Ok(())
    }

    /// Creates a customer by hand, with an id from the local range.
    pub async fn create_local(&self, new: NewCustomer) -> DbResult<CustomerRecord> {
        validate_name(&new.display_name)?;

        let now = Utc::now();
        let _guard = self.local_ids.lock().await;
        let mut tx = self.pool.begin().await?;

        let id = allocate_local_id(&mut tx, LocalTable::Customers).await?;
        let record = CustomerRecord {
            id,
            origin: Origin::Local,
            display_name: new.display_name,
            email: new.email,
            phone: new.phone,
            company: new.company,
            balance: Money::zero(),
            shopify_customer_id: None,
            quickbooks_customer_id: None,
            quickbooks_sync_token: None,
            label_source: ValueSource::Manual,
            last_synced_at: None,
            updated_at: now,
        };
        bind_record(sqlx::query(INSERT), &record)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(record)
    }

    /// Deletes one customer. Their orders keep a null customer.
    /// Stamps the last-synced time without touching any field.
    pub async fn mark_synced(&self, id: i32, at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query("UPDATE customers SET last_synced_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Customer", id));
        }
        Ok(())
    }

    pub async fn delete(&self, id: i32) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM customers WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
