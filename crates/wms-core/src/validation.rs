//! # Validation Module
//!
//! Checks run before any mutation or external call.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE (pure)                                           │
//! │  ├── Stock movements never leave a negative quantity                   │
//! │  ├── Names and SKUs fit their columns                                  │
//! │  └── Page sizes are usable                                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Database (SQLite)                                            │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  └── Foreign key constraints                                           │
//! │                                                                         │
//! │  Errors are returned to the caller as-is; nothing is clamped.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::quantity::Quantity;
use crate::types::StockMovement;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest display name accepted for items and customers.
pub const MAX_NAME_LEN: usize = 200;

/// Longest SKU accepted.
pub const MAX_SKU_LEN: usize = 64;

/// Largest page a sync pass may request from either API.
pub const MAX_PAGE_SIZE: u32 = 1000;

// =============================================================================
// Stock Movements
// =============================================================================

/// Validates a movement against the current quantity and returns the
/// resulting quantity on hand.
///
/// ## Rules
/// - Pick, putaway and remove amounts must be positive
/// - Adjust targets must not be negative
/// - The result must not be negative
///
/// ## Example
/// ```rust
/// use wms_core::quantity::Quantity;
/// use wms_core::types::StockMovement;
/// use wms_core::validation::validate_movement;
///
/// let on_hand = Quantity::from_units(10);
/// assert_eq!(
///     validate_movement("ABC", on_hand, StockMovement::Pick(Quantity::from_units(4))).unwrap(),
///     Quantity::from_units(6),
/// );
/// assert!(validate_movement("ABC", on_hand, StockMovement::Remove(Quantity::from_units(12))).is_err());
/// ```
pub fn validate_movement(
    sku: &str,
    on_hand: Quantity,
    movement: StockMovement,
) -> ValidationResult<Quantity> {
    let amount = movement.amount();
    match movement {
        StockMovement::Adjust(_) if amount.is_negative() => {
            return Err(negative(sku, on_hand, amount));
        }
        StockMovement::Adjust(_) => {}
        _ if !amount.is_positive() => {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            });
        }
        _ => {}
    }

    let result = movement.apply(on_hand);
    if result.is_negative() {
        return Err(negative(sku, on_hand, amount));
    }
    Ok(result)
}

fn negative(sku: &str, on_hand: Quantity, requested: Quantity) -> ValidationError {
    ValidationError::NegativeQuantity {
        sku: sku.to_string(),
        on_hand: on_hand.to_string(),
        requested: requested.to_string(),
    }
}

// =============================================================================
// String Validators
// =============================================================================

/// Validates an item or customer display name.
pub fn validate_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(())
}

/// Validates a SKU. Empty is allowed: many storefront variants have none.
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    if sku.chars().count() > MAX_SKU_LEN {
        return Err(ValidationError::TooLong {
            field: "sku".to_string(),
            max: MAX_SKU_LEN,
        });
    }
    if sku.chars().any(char::is_control) {
        return Err(ValidationError::InvalidFormat {
            field: "sku".to_string(),
            reason: "must not contain control characters".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Sync Parameters
// =============================================================================

/// Validates a requested page size.
pub fn validate_page_size(page_size: u32) -> ValidationResult<()> {
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(ValidationError::OutOfRange {
            field: "page_size".to_string(),
            min: 1,
            max: MAX_PAGE_SIZE as i64,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
