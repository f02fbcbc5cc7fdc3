//! # Money Module
//!
//! Provides the `Money` type for order totals, prices and costs.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  QuickBooks sends:  "TotalAmt": 100.10, "Balance": 0.30                 │
//! │  As f64:            100.10 - 99.80 = 0.30000000000000426  ❌            │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents, parsed from the decimal TEXT              │
//! │    "100.10" → 10010 cents,  "99.80" → 9980 cents                        │
//! │    balance = 10010 - 9980 = 30 cents, exactly                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use wms_core::money::Money;
//!
//! let price = Money::from_cents(1099); // $10.99
//! let parsed = Money::parse_decimal("10.99").unwrap();
//! assert_eq!(price, parsed);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use ts_rs::TS;

use crate::error::ValidationError;
use crate::quantity::Quantity;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// ## Where Money is Used
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  InventoryRecord ── manual / shopify / quickbooks price + cost shadows  │
/// │        │                                                                │
/// │        └──► Field Resolution Policy ──► displayed price and cost        │
/// │                                                                         │
/// │  OrderRecord ── subtotal, tax, total, amount_paid ──► balance           │
/// │  LineItem    ── unit_price × quantity ──► line_total                    │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is strictly greater than zero.
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Parses a decimal amount as sent by the external APIs.
    ///
    /// Shopify sends amounts as strings (`"18.00"`) and QuickBooks as JSON
    /// numbers; both are parsed from their textual form so no binary float
    /// ever touches a monetary value. A third fractional digit is rounded
    /// half-to-even.
    ///
    /// ## Example
    /// ```rust
    /// use wms_core::money::Money;
    ///
    /// assert_eq!(Money::parse_decimal("18").unwrap().cents(), 1800);
    /// assert_eq!(Money::parse_decimal("-5.5").unwrap().cents(), -550);
    /// assert_eq!(Money::parse_decimal("0.125").unwrap().cents(), 12);
    /// assert!(Money::parse_decimal("abc").is_err());
    /// ```
    pub fn parse_decimal(text: &str) -> Result<Money, ValidationError> {
        crate::fixed::parse_fixed_point(text, 2, "amount").map(Money)
    }

    /// Multiplies a unit price by a (fractional) quantity.
    ///
    /// ## Rounding
    /// Quantities carry three decimal places. The product is computed in
    /// i128 and rounded half-to-even back to whole cents.
    ///
    /// ## Example
    /// ```rust
    /// use wms_core::money::Money;
    /// use wms_core::quantity::Quantity;
    ///
    /// let unit_price = Money::from_cents(299); // $2.99
    /// let line_total = unit_price.multiply_quantity(Quantity::from_units(3));
    /// assert_eq!(line_total.cents(), 897);
    /// ```
    ///
    /// A product outside the i64 range saturates; callers that must reject
    /// it use [`Money::checked_multiply_quantity`].
    pub fn multiply_quantity(&self, quantity: Quantity) -> Money {
        self.checked_multiply_quantity(quantity).unwrap_or_else(|| {
            if (self.0 < 0) != quantity.is_negative() {
                Money(i64::MIN)
            } else {
                Money(i64::MAX)
            }
        })
    }

    /// Like [`Money::multiply_quantity`], but `None` when the line total
    /// does not fit in i64 cents.
    pub fn checked_multiply_quantity(&self, quantity: Quantity) -> Option<Money> {
        let product = self.0 as i128 * quantity.thousandths() as i128;
        i64::try_from(crate::fixed::div_round_half_even(product, 1000))
            .ok()
            .map(Money)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}${}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Money::from_cents(1099)), "$10.99");
        assert_eq!(format!("{}", Money::from_cents(-550)), "-$5.50");
        assert_eq!(format!("{}", Money::from_cents(0)), "$0.00");
    }

    #[test]
    fn test_parse_decimal_shapes() {
        assert_eq!(Money::parse_decimal("18.00").unwrap().cents(), 1800);
        assert_eq!(Money::parse_decimal("100.1").unwrap().cents(), 10010);
        assert_eq!(Money::parse_decimal(" 7 ").unwrap().cents(), 700);
        assert_eq!(Money::parse_decimal(".5").unwrap().cents(), 50);
        assert!(Money::parse_decimal("").is_err());
        assert!(Money::parse_decimal("1.2.3").is_err());
        assert!(Money::parse_decimal("1e5").is_err());
    }

    #[test]
    fn test_parse_decimal_rounds_half_even() {
        assert_eq!(Money::parse_decimal("0.125").unwrap().cents(), 12);
        assert_eq!(Money::parse_decimal("0.135").unwrap().cents(), 14);
        assert_eq!(Money::parse_decimal("0.1251").unwrap().cents(), 13);
    }

    #[test]
    fn test_multiply_fractional_quantity() {
        let unit = Money::from_cents(1000);
        assert_eq!(unit.multiply_quantity(Quantity::from_thousandths(2500)).cents(), 2500);
        // 0.333 × $0.10 = 3.33 cents → 3
        let dime = Money::from_cents(10);
        assert_eq!(dime.multiply_quantity(Quantity::from_thousandths(333)).cents(), 3);
    }

    #[test]
    fn test_multiply_out_of_range() {
        let price = Money::from_cents(i64::MAX / 2);
        let huge = Quantity::from_units(1_000_000);
        assert_eq!(price.checked_multiply_quantity(huge), None);
        assert_eq!(price.multiply_quantity(huge).cents(), i64::MAX);
        assert_eq!(Money::from_cents(-(i64::MAX / 2)).multiply_quantity(huge).cents(), i64::MIN);
        assert_eq!(
            price.checked_multiply_quantity(Quantity::from_units(1)),
            Some(price)
        );
    }

    #[test]
    fn test_arithmetic_and_sum() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(250);
        assert_eq!((a - b).cents(), 750);
        let total: Money = vec![a, b, b].into_iter().sum();
        assert_eq!(total.cents(), 1500);
    }
}
