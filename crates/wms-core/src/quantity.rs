//! # Quantity Module
//!
//! Decimal stock quantities stored as integer thousandths.
//!
//! Warehouse stock is not always whole units (rolls of fabric, kilograms of
//! bulk goods), so quantity on hand is a decimal. Like `Money`, it is kept
//! as an integer so arithmetic is exact:
//!
//! ```text
//! 12.5 kg  → Quantity(12_500)
//!  3 units → Quantity(3_000)
//! ```
//!
//! The non-negative invariant for quantity on hand is NOT enforced by this
//! type; stock movements are validated before commit (see
//! [`crate::validation::validate_movement`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use ts_rs::TS;

use crate::error::ValidationError;

/// Number of thousandths in one unit.
const SCALE: i64 = 1000;

/// A decimal quantity with three fractional digits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
#[ts(export)]
pub struct Quantity(i64);

impl Quantity {
    /// Creates a quantity from whole units.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Quantity(units * SCALE)
    }

    /// Creates a quantity from thousandths of a unit.
    #[inline]
    pub const fn from_thousandths(thousandths: i64) -> Self {
        Quantity(thousandths)
    }

    /// Returns the raw thousandths.
    #[inline]
    pub const fn thousandths(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Quantity(0)
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Parses a decimal quantity (`"10"`, `"2.5"`, `"-1.25"`).
    ///
    /// ```rust
    /// use wms_core::quantity::Quantity;
    ///
    /// assert_eq!(Quantity::parse_decimal("2.5").unwrap(), Quantity::from_thousandths(2500));
    /// ```
    pub fn parse_decimal(text: &str) -> Result<Quantity, ValidationError> {
        crate::fixed::parse_fixed_point(text, 3, "quantity").map(Quantity)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / SCALE as u64;
        let frac = abs % SCALE as u64;
        if frac == 0 {
            write!(f, "{sign}{whole}")
        } else {
            let digits = format!("{frac:03}");
            write!(f, "{sign}{whole}.{}", digits.trim_end_matches('0'))
        }
    }
}

impl Add for Quantity {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Quantity(self.0 + other.0)
    }
}

impl Sub for Quantity {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Quantity(self.0 - other.0)
    }
}
