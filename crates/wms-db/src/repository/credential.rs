//! # Credential Repository
//!
//! One row per external source. A save replaces access token, refresh
//! token, expiry and account id in a single UPSERT, so a reader never sees
//! a new token paired with a stale expiry.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use wms_core::{Credentials, Source};

use crate::error::DbResult;

#[derive(Debug, Clone)]
pub struct CredentialRepository {
    pool: SqlitePool,
}

impl CredentialRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CredentialRepository { pool }
    }

    pub async fn load(&self, source: Source) -> DbResult<Option<Credentials>> {
        let creds = sqlx::query_as::<_, Credentials>(
            "SELECT access_token, refresh_token, expires_at, account_id \
             FROM credentials WHERE source = ?1",
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await?;
        Ok(creds)
    }

    pub async fn save(&self, source: Source, credentials: &Credentials) -> DbResult<()> {
        debug!(source = %source, expires_at = %credentials.expires_at, "Saving credentials");
        sqlx::query(
            "INSERT INTO credentials (source, access_token, refresh_token, expires_at, account_id, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT (source) DO UPDATE SET \
                 access_token = excluded.access_token, \
                 refresh_token = excluded.refresh_token, \
                 expires_at = excluded.expires_at, \
                 account_id = excluded.account_id, \
                 updated_at = excluded.updated_at",
        )
        .bind(source)
        .bind(&credentials.access_token)
        .bind(&credentials.refresh_token)
        .bind(credentials.expires_at)
        .bind(&credentials.account_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear(&self, source: Source) -> DbResult<()> {
        debug!(source = %source, "Clearing credentials");
        sqlx::query("DELETE FROM credentials WHERE source = ?1")
            .bind(source)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
