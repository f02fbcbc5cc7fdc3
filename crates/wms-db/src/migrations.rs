//! # Database Migrations
//!
//! Embedded SQL migrations for the WMS Suite local store.
//!
//! ## How Migrations Work
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Migration Process                                  │
//! │                                                                         │
//! │  Database::new                                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Compare embedded migrations vs _sqlx_migrations                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Run pending migrations in order                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Stamp / verify identity_hash_version in store_meta                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Adding New Migrations
//!
//! 1. Create a new file in `migrations/sqlite/` with the next sequence number
//! 2. Name format: `NNN_description.sql`
//! 3. **NEVER** modify existing migrations - always add new ones
//! 4. A change to the identity hash needs a migration that recomputes every
//!    deterministic id AND rewrites `identity_hash_version`

use sqlx::SqlitePool;
use tracing::{info, warn};
use wms_core::HASH_VERSION;

use crate::error::{DbError, DbResult};

/// Embedded migrations from the `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// `store_meta` key holding the identity hash version.
pub const IDENTITY_HASH_KEY: &str = "identity_hash_version";

/// Runs all pending database migrations.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied successfully");
    Ok(())
}

/// Returns (total_migrations, applied_migrations).
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await?;

    Ok((total, applied as usize))
}

/// Stamps the identity hash version on a fresh store, or checks it on an
/// existing one.
///
/// ## Errors
/// `DbError::IdentitySchemeMismatch` if the store was written under a
/// different hash version.
pub async fn verify_identity_scheme(pool: &SqlitePool) -> DbResult<()> {
    let expected = HASH_VERSION.to_string();

    sqlx::query("INSERT OR IGNORE INTO store_meta (meta_key, meta_value) VALUES (?1, ?2)")
        .bind(IDENTITY_HASH_KEY)
        .bind(&expected)
        .execute(pool)
        .await?;

    let stored: String = sqlx::query_scalar("SELECT meta_value FROM store_meta WHERE meta_key = ?1")
        .bind(IDENTITY_HASH_KEY)
        .fetch_one(pool)
        .await?;

    if stored != expected {
        warn!(stored = %stored, expected = HASH_VERSION, "Identity hash version mismatch");
        return Err(DbError::IdentitySchemeMismatch {
            stored,
            expected: HASH_VERSION,
        });
    }

    Ok(())
}
