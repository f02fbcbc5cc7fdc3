//! # Sync Error Types
//!
//! Error types for sync passes, credential handling and pushes.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Credential          │ │
//! │  │                 │  │   (transient)   │  │     (fatal to pass)     │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  NotConnected           │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  Unauthorized           │ │
//! │  │  ConfigLoad/Save│  │  RateLimited    │  │  ReconnectRequired      │ │
//! │  │                 │  │  ServerError    │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Remote       │  │    Conflict     │  │      Pass               │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Malformed      │  │  Modified       │  │  PassAborted            │ │
//! │  │  RemoteRejected │  │  Elsewhere      │  │  Store                  │ │
//! │  │  Unsupported    │  │                 │  │                         │ │
//! │  │  NotLinked      │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transient errors get one retry per page. Malformed responses are never
//! retried. Credential errors end the pass for that source and surface as a
//! "reconnect" state.

use thiserror::Error;
use wms_core::Source;
use wms_db::DbError;

use crate::report::PassReport;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering every failure a pass can surface.
///
/// ## Design Principles
/// - Each variant includes enough context for a log line
/// - Errors are categorized for different handling strategies
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid endpoint URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Connection could not be established or was dropped mid-request.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request did not complete within the configured timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The remote asked us to slow down (HTTP 429 or a throttled GraphQL
    /// response).
    #[error("{remote} rate limited the request")]
    RateLimited { remote: Source },

    /// HTTP 5xx from the remote.
    #[error("{remote} server error (HTTP {status}): {body}")]
    ServerError {
        remote: Source,
        status: u16,
        body: String,
    },

    // =========================================================================
    // Credential Errors
    // =========================================================================
    /// No credentials stored for this source.
    ///
    /// ## When This Occurs
    /// - The OAuth flow was never completed
    /// - The user disconnected the source
    #[error("{0} is not connected")]
    NotConnected(Source),

    /// HTTP 401 from a data request.
    ///
    /// ## When This Occurs
    /// - Access token revoked or expired early on the remote side
    /// - The engine answers with one forced refresh and one retry
    #[error("{0} rejected the access token")]
    Unauthorized(Source),

    /// The refresh token is no longer accepted. Only a new OAuth grant
    /// fixes this.
    ///
    /// ## When This Occurs
    /// - `invalid_grant` from the token endpoint
    /// - HTTP 400/401 on refresh
    #[error("{remote} needs to be reconnected: {reason}")]
    ReconnectRequired { remote: Source, reason: String },

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// The response body did not have the expected shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The remote answered with an explicit error payload (GraphQL `errors`
    /// in an HTTP 200, QuickBooks `Fault`, or a 4xx).
    #[error("{remote} rejected the request: {message}")]
    RemoteRejected { remote: Source, message: String },

    /// A push was requested for a record that has no id in that source.
    #[error("Inventory {id} is not linked to {remote}")]
    NotLinked { remote: Source, id: i32 },

    /// The operation is not offered by this source.
    #[error("{remote} does not support {operation}")]
    Unsupported {
        remote: Source,
        operation: &'static str,
    },

    // =========================================================================
    // Conflict Errors
    // =========================================================================
    /// An update carried a stale version token.
    ///
    /// ## When This Occurs
    /// - Someone edited the record in QuickBooks between our read of the
    ///   `SyncToken` and our write
    /// - The local record is left untouched and flagged for reconciliation
    #[error("{remote} record {external_id} was modified elsewhere")]
    ModifiedElsewhere { remote: Source, external_id: String },

    // =========================================================================
    // Pass Errors
    // =========================================================================
    /// Two consecutive page failures ended the pass. The report holds what
    /// was completed before the abort.
    #[error("Sync pass aborted after {} pages: {cause}", .report.pages)]
    PassAborted {
        report: Box<PassReport>,
        cause: Box<SyncError>,
    },

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Local store failure.
    #[error("Store error: {0}")]
    Store(#[from] DbError),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<wms_core::CoreError> for SyncError {
    fn from(err: wms_core::CoreError) -> Self {
        SyncError::Store(DbError::from(err))
    }
}

impl From<wms_core::ValidationError> for SyncError {
    fn from(err: wms_core::ValidationError) -> Self {
        SyncError::Store(DbError::Validation(err))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::MalformedResponse(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::MalformedResponse(err.to_string())
        } else {
            // Timeouts are mapped by the caller, which knows the budget.
            SyncError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Classification
// =============================================================================

impl SyncError {
    /// Returns true if a page request that failed this way is worth one
    /// more attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Timeout(_)
                | SyncError::RateLimited { .. }
                | SyncError::ServerError { .. }
        )
    }

    /// Returns true for errors that need the user to (re)connect the source.
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            SyncError::NotConnected(_)
                | SyncError::Unauthorized(_)
                | SyncError::ReconnectRequired { .. }
        )
    }

    /// Returns true for optimistic-concurrency rejections.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::ModifiedElsewhere { .. })
    }

    /// Returns true if this is a configuration error.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if only the current record is affected, so a pass can
    /// count it as failed and move on.
    pub fn is_record_level(&self) -> bool {
        match self {
            SyncError::Store(db) => db.is_record_level(),
            SyncError::MalformedResponse(_) | SyncError::ModifiedElsewhere { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(SyncError::ConnectionFailed("reset by peer".into()).is_transient());
        assert!(SyncError::Timeout(30).is_transient());
        assert!(SyncError::RateLimited { remote: Source::Shopify }.is_transient());
        assert!(SyncError::ServerError {
            remote: Source::QuickBooks,
            status: 503,
            body: String::new(),
        }
        .is_transient());

        assert!(!SyncError::MalformedResponse("missing field `Id`".into()).is_transient());
        assert!(!SyncError::Unauthorized(Source::Shopify).is_transient());
        assert!(!SyncError::InvalidConfig("page_size".into()).is_transient());
    }

    #[test]
    fn test_credential_errors_are_distinct_from_network() {
        let err = SyncError::ReconnectRequired {
            remote: Source::QuickBooks,
            reason: "invalid_grant".into(),
        };
        assert!(err.is_credential_error());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("reconnected"));

        assert!(!SyncError::ConnectionFailed("dns".into()).is_credential_error());
    }

    #[test]
    fn test_conflict_is_record_level() {
        let err = SyncError::ModifiedElsewhere {
            remote: Source::QuickBooks,
            external_id: "42".into(),
        };
        assert!(err.is_conflict());
        assert!(err.is_record_level());
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_store_errors_classified_by_db() {
        let collision: SyncError = DbError::IdCollision {
            entity: "Inventory".into(),
            id: 100_000_001,
            existing: "Q1".into(),
            incoming: "Q9".into(),
        }
        .into();
        assert!(collision.is_record_level());

        let pool: SyncError = DbError::PoolExhausted.into();
        assert!(!pool.is_record_level());
    }

    #[test]
    fn test_abort_keeps_partial_report() {
        let report = PassReport {
            created: 3,
            pages: 2,
            ..PassReport::default()
        };
        let err = SyncError::PassAborted {
            report: Box::new(report),
            cause: Box::new(SyncError::Timeout(30)),
        };
        assert!(err.to_string().contains("after 2 pages"));
        if let SyncError::PassAborted { report, .. } = err {
            assert_eq!(report.created, 3);
        }
    }
}
