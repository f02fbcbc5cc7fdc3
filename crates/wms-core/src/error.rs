//! # Error Types
//!
//! Domain-specific error types for wms-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  wms-core errors (this file)                                           │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  wms-db errors (separate crate)                                        │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  wms-sync errors (separate crate)                                      │
//! │  └── SyncError        - Credential, transport, conflict failures       │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → SyncError → UI log line │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The sequential local id range is full.
    ///
    /// ## When This Occurs
    /// - `next_local_id` is asked for an id at or beyond `RANGE_LOCAL_MAX`
    /// - Practically unreachable, but the allocator must not wrap into
    ///   an external source's range
    #[error("Local id range exhausted (max {max})")]
    LocalIdsExhausted { max: i32 },

    /// A fulfillment transition was requested that the state machine forbids.
    ///
    /// ## When This Occurs
    /// - Moving a Delivered order back to NeedsFulfillment without an
    ///   explicit user override
    #[error("Cannot move order from {from} to {to} without an explicit override")]
    InvalidTransition { from: String, to: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any mutation or external call and surfaced to the
/// caller synchronously. Values are never clamped to make them pass.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g. an unparsable decimal from an external payload).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// A stock movement would leave a negative quantity on hand.
    ///
    /// ## User Workflow
    /// ```text
    /// Remove 12 of "ABC" (on hand: 10)
    ///      │
    ///      ▼
    /// NegativeQuantity { sku: "ABC", on_hand: "10", requested: "12" }
    ///      │
    ///      ▼
    /// UI shows: "Only 10 ABC on hand"
    /// ```
    #[error("Quantity for {sku} cannot go negative: on hand {on_hand}, requested {requested}")]
    NegativeQuantity {
        sku: String,
        on_hand: String,
        requested: String,
    },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
