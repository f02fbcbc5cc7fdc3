//! # Credential Lifecycle
//!
//! One [`CredentialManager`] per external source holds the current token
//! set and refreshes it before expiry or after a 401.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Unauthenticated ──connect()──► Authenticated                         │
//! │         ▲                            │      ▲                           │
//! │         │                 within lead│      │ refresh ok                │
//! │         │                     window ▼      │                           │
//! │   refresh rejected            Expiring ──► Refreshing                   │
//! │   (ReconnectRequired) ◄──────────────────────┘                          │
//! │                                                                         │
//! │   401 during a request: Authenticated ──► Refreshing (forced)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Refresh Coalescing
//! Every successful refresh bumps a generation counter. A caller passes the
//! generation it last saw; once it holds the refresh gate it re-checks, and
//! if the generation already moved it takes the new credentials instead of
//! refreshing again. Concurrent passes therefore share a single refresh
//! request.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use wms_core::{Credentials, Source};
use wms_db::{CredentialRepository, Database};

use crate::error::{SyncError, SyncResult};
use crate::sources::ExternalSource;

// =============================================================================
// Credential Store
// =============================================================================

/// Persistence for one token set per source. `save` writes all fields at
/// once.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, source: Source) -> SyncResult<Option<Credentials>>;
    async fn save(&self, source: Source, credentials: &Credentials) -> SyncResult<()>;
    async fn clear(&self, source: Source) -> SyncResult<()>;
}

/// Store backed by the local database's `credentials` table.
#[derive(Debug, Clone)]
pub struct DbCredentialStore {
    repo: CredentialRepository,
}

impl DbCredentialStore {
    pub fn new(db: &Database) -> Self {
        DbCredentialStore {
            repo: db.credentials(),
        }
    }
}

#[async_trait]
impl CredentialStore for DbCredentialStore {
    async fn load(&self, source: Source) -> SyncResult<Option<Credentials>> {
        Ok(self.repo.load(source).await?)
    }

    async fn save(&self, source: Source, credentials: &Credentials) -> SyncResult<()> {
        Ok(self.repo.save(source, credentials).await?)
    }

    async fn clear(&self, source: Source) -> SyncResult<()> {
        Ok(self.repo.clear(source).await?)
    }
}

/// In-process store for tests and for hosts that keep tokens elsewhere.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<Source, Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(source: Source, credentials: Credentials) -> Self {
        MemoryCredentialStore {
            entries: RwLock::new(HashMap::from([(source, credentials)])),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, source: Source) -> SyncResult<Option<Credentials>> {
        Ok(self.entries.read().await.get(&source).cloned())
    }

    async fn save(&self, source: Source, credentials: &Credentials) -> SyncResult<()> {
        self.entries
            .write()
            .await
            .insert(source, credentials.clone());
        Ok(())
    }

    async fn clear(&self, source: Source) -> SyncResult<()> {
        self.entries.write().await.remove(&source);
        Ok(())
    }
}

// =============================================================================
// Status
// =============================================================================

/// Observable lifecycle state of one source's credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    /// No usable credentials. The user has to (re)connect.
    Unauthenticated,
    Authenticated,
    /// Inside the refresh lead window (or already past expiry).
    Expiring,
    Refreshing,
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CredentialStatus::Unauthenticated => "unauthenticated",
            CredentialStatus::Authenticated => "authenticated",
            CredentialStatus::Expiring => "expiring",
            CredentialStatus::Refreshing => "refreshing",
        };
        f.write_str(label)
    }
}

/// Credentials handed to a request, tagged with the generation they came
/// from.
#[derive(Debug, Clone)]
pub struct TokenLease {
    pub credentials: Credentials,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct CredentialState {
    credentials: Option<Credentials>,
    generation: u64,
    refreshing: bool,
}

// =============================================================================
// Manager
// =============================================================================

/// Token holder for one external source.
pub struct CredentialManager {
    source: Arc<dyn ExternalSource>,
    store: Arc<dyn CredentialStore>,
    lead: chrono::Duration,
    state: RwLock<CredentialState>,
    refresh_gate: Mutex<()>,
    refreshes: AtomicU64,
}

impl fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialManager")
            .field("source", &self.source.source())
            .field("lead", &self.lead)
            .field("refreshes", &self.refreshes.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CredentialManager {
    /// Creates a manager and loads the stored credentials for the source.
    pub async fn open(
        source: Arc<dyn ExternalSource>,
        store: Arc<dyn CredentialStore>,
        lead: chrono::Duration,
    ) -> SyncResult<Self> {
        let credentials = store.load(source.source()).await?;
        debug!(source = %source.source(), connected = credentials.is_some(), "Credential manager opened");
        Ok(CredentialManager {
            source,
            store,
            lead,
            state: RwLock::new(CredentialState {
                credentials,
                generation: 0,
                refreshing: false,
            }),
            refresh_gate: Mutex::new(()),
            refreshes: AtomicU64::new(0),
        })
    }

    pub fn source(&self) -> Source {
        self.source.source()
    }

    /// Refresh requests issued so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub async fn status(&self) -> CredentialStatus {
        let state = self.state.read().await;
        match &state.credentials {
            None => CredentialStatus::Unauthenticated,
            Some(_) if state.refreshing => CredentialStatus::Refreshing,
            Some(c) if c.expires_within(self.lead, Utc::now()) => CredentialStatus::Expiring,
            Some(_) => CredentialStatus::Authenticated,
        }
    }

    /// Accepts credentials produced by the OAuth flow.
    pub async fn connect(&self, credentials: Credentials) -> SyncResult<()> {
        let _gate = self.refresh_gate.lock().await;
        self.store.save(self.source(), &credentials).await?;
        let mut state = self.state.write().await;
        state.credentials = Some(credentials);
        state.generation += 1;
        info!(source = %self.source(), "Source connected");
        Ok(())
    }

    /// Forgets the credentials for this source.
    pub async fn disconnect(&self) -> SyncResult<()> {
        let _gate = self.refresh_gate.lock().await;
        self.store.clear(self.source()).await?;
        let mut state = self.state.write().await;
        state.credentials = None;
        state.generation += 1;
        info!(source = %self.source(), "Source disconnected");
        Ok(())
    }

    /// Returns credentials that are not inside the lead window, refreshing
    /// first when needed.
    pub async fn ensure_valid(&self) -> SyncResult<TokenLease> {
        let lease = self.current().await?;
        if !lease.credentials.expires_within(self.lead, Utc::now()) {
            return Ok(lease);
        }
        debug!(source = %self.source(), expires_at = %lease.credentials.expires_at, "Token expiring, refreshing proactively");
        self.refresh_after(lease.generation, false).await
    }

    /// Refreshes after the remote rejected the token from `seen_generation`.
    /// Returns newer credentials without a request if another caller has
    /// already refreshed.
    pub async fn force_refresh(&self, seen_generation: u64) -> SyncResult<TokenLease> {
        self.refresh_after(seen_generation, true).await
    }

    async fn current(&self) -> SyncResult<TokenLease> {
        let state = self.state.read().await;
        match &state.credentials {
            Some(credentials) => Ok(TokenLease {
                credentials: credentials.clone(),
                generation: state.generation,
            }),
            None => Err(SyncError::NotConnected(self.source())),
        }
    }

    async fn refresh_after(&self, seen_generation: u64, forced: bool) -> SyncResult<TokenLease> {
        let _gate = self.refresh_gate.lock().await;

        // Re-check under the gate: someone may have refreshed meanwhile.
        let lease = self.current().await?;
        if lease.generation != seen_generation {
            debug!(source = %self.source(), generation = lease.generation, "Reusing refreshed token");
            return Ok(lease);
        }
        if !forced && !lease.credentials.expires_within(self.lead, Utc::now()) {
            return Ok(lease);
        }

        self.state.write().await.refreshing = true;
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        let result = self.source.refresh(&lease.credentials).await;

        match result {
            Ok(fresh) => {
                if let Err(e) = self.store.save(self.source(), &fresh).await {
                    self.state.write().await.refreshing = false;
                    return Err(e);
                }
                let mut state = self.state.write().await;
                state.credentials = Some(fresh.clone());
                state.generation += 1;
                state.refreshing = false;
                info!(source = %self.source(), generation = state.generation, forced, "Token refreshed");
                Ok(TokenLease {
                    credentials: fresh,
                    generation: state.generation,
                })
            }
            Err(e) if e.is_credential_error() => {
                warn!(source = %self.source(), error = %e, "Refresh rejected, reconnect required");
                if let Err(clear_err) = self.store.clear(self.source()).await {
                    warn!(source = %self.source(), error = %clear_err, "Failed to clear rejected credentials");
                }
                let mut state = self.state.write().await;
                state.credentials = None;
                state.generation += 1;
                state.refreshing = false;
                Err(match e {
                    SyncError::ReconnectRequired { .. } => e,
                    other => SyncError::ReconnectRequired {
                        remote: self.source(),
                        reason: other.to_string(),
                    },
                })
            }
            Err(e) => {
                self.state.write().await.refreshing = false;
                Err(e)
            }
        }
    }
}
