//! # wms-core: Pure Reconciliation Logic for WMS Suite
//!
//! This crate holds the rules that decide how records from the local store,
//! the Shopify storefront and QuickBooks Online fit together. Everything
//! here is a pure function over plain data.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        WMS Suite Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 App (inventory, orders, settings)               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ refresh_all / push_inventory          │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │           wms-sync (orchestrator, engine, sources)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ wms-core (THIS CRATE) ★                         │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │ identity  │  │resolution │  │fulfillment│  │ validation│  │   │
//! │  │   │ id ranges │  │ cost/price│  │  states   │  │ movements │  │   │
//! │  │   │ stable id │  │  labels   │  │ import    │  │  names    │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    wms-db (SQLite store)                        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`identity`] - Deterministic ids for external records, local id ranges
//! - [`resolution`] - Which contributor's value is authoritative per field
//! - [`fulfillment`] - Order fulfillment state machine
//! - [`types`] - Inventory, order, customer and credential records
//! - [`money`] / [`quantity`] - Integer fixed-point amounts
//! - [`validation`] - Pre-commit checks
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use wms_core::identity::{deterministic_id, IdSpace};
//! use wms_core::money::Money;
//! use wms_core::resolution::{resolve, source_label, Candidate, Candidates, Field, ValueSource};
//!
//! let id = deterministic_id(IdSpace::QuickBooksItem, "Q1").unwrap();
//! assert!(IdSpace::QuickBooksItem.contains(id));
//!
//! let price = Candidates::new()
//!     .manual(Candidate::new(Money::from_cents(2000)))
//!     .shopify(Candidate::new(Money::from_cents(1800)));
//! assert_eq!(resolve(Field::Price, &price), Some(Money::from_cents(2000)));
//! assert_eq!(source_label(Field::Price, &price), ValueSource::Manual);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod fulfillment;
pub mod identity;
pub mod money;
pub mod quantity;
pub mod resolution;
pub mod types;
pub mod validation;

mod fixed;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use fulfillment::{FulfillmentState, TransitionCause};
pub use identity::{deterministic_id, next_local_id, IdSpace, HASH_VERSION, RANGE_LOCAL_MAX};
pub use money::Money;
pub use quantity::Quantity;
pub use resolution::{Field, Resolved, ValueSource};
pub use types::*;
pub use validation::ValidationResult;
