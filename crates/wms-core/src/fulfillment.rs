//! # Order Fulfillment State Machine
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   NeedsFulfillment ──► InTransit ──► Unconfirmed ──► Delivered          │
//! │          ▲                 │              │             │   ▲           │
//! │          │                 └──────────────┴─────────────┘   │           │
//! │          │                      (any forward or sideways    │           │
//! │          │                       move by the user)          │           │
//! │          │                                                  │           │
//! │          └────────── Override only ◄────────────────────────┘           │
//! │                                                                         │
//! │   Import rule (accounting / storefront orders):                         │
//! │     balance == 0            → Delivered                                 │
//! │     no previous state       → NeedsFulfillment                          │
//! │     otherwise               → previous state, untouched                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivered is terminal for ordinary moves; leaving it back to
//! NeedsFulfillment needs [`TransitionCause::Override`]. A sync never
//! reverts a state the user chose unless the balance-zero rule applies.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;

/// Where an order is in the shipping lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum FulfillmentState {
    NeedsFulfillment,
    InTransit,
    Unconfirmed,
    Delivered,
}

impl Default for FulfillmentState {
    fn default() -> Self {
        FulfillmentState::NeedsFulfillment
    }
}

impl fmt::Display for FulfillmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FulfillmentState::NeedsFulfillment => "needs_fulfillment",
            FulfillmentState::InTransit => "in_transit",
            FulfillmentState::Unconfirmed => "unconfirmed",
            FulfillmentState::Delivered => "delivered",
        };
        f.write_str(label)
    }
}

/// Who asked for a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    /// A normal user action in the order screen.
    User,
    /// An explicit "reopen" that may leave Delivered.
    Override,
}

impl FulfillmentState {
    /// Validates and performs a user-driven transition.
    ///
    /// ## Example
    /// ```rust
    /// use wms_core::fulfillment::{FulfillmentState, TransitionCause};
    ///
    /// let state = FulfillmentState::Delivered;
    /// assert!(state.transition(FulfillmentState::NeedsFulfillment, TransitionCause::User).is_err());
    /// assert_eq!(
    ///     state.transition(FulfillmentState::NeedsFulfillment, TransitionCause::Override).unwrap(),
    ///     FulfillmentState::NeedsFulfillment,
    /// );
    /// ```
    pub fn transition(self, to: FulfillmentState, cause: TransitionCause) -> CoreResult<Self> {
        let reopening = self == FulfillmentState::Delivered && to == FulfillmentState::NeedsFulfillment;
        if reopening && cause != TransitionCause::Override {
            return Err(CoreError::InvalidTransition {
                from: self.to_string(),
                to: to.to_string(),
            });
        }
        Ok(to)
    }

    /// State an imported order ends up in.
    ///
    /// Payment status drives this: a fully paid order is considered
    /// delivered. Any other state the order already had is kept.
    pub fn on_import(previous: Option<FulfillmentState>, balance: Money) -> FulfillmentState {
        if balance.is_zero() {
            return FulfillmentState::Delivered;
        }
        previous.unwrap_or(FulfillmentState::NeedsFulfillment)
    }

    pub fn is_terminal(self) -> bool {
        self == FulfillmentState::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_rule() {
        let owed = Money::from_cents(500);
        assert_eq!(
            FulfillmentState::on_import(None, Money::zero()),
            FulfillmentState::Delivered
        );
        assert_eq!(
            FulfillmentState::on_import(None, owed),
            FulfillmentState::NeedsFulfillment
        );
        assert_eq!(
            FulfillmentState::on_import(Some(FulfillmentState::InTransit), owed),
            FulfillmentState::InTransit
        );
        assert_eq!(
            FulfillmentState::on_import(Some(FulfillmentState::Unconfirmed), Money::zero()),
            FulfillmentState::Delivered
        );
    }

    #[test]
    fn test_user_moves_are_free_except_reopening() {
        use FulfillmentState::*;
        for from in [NeedsFulfillment, InTransit, Unconfirmed, Delivered] {
            for to in [InTransit, Unconfirmed, Delivered] {
                assert_eq!(from.transition(to, TransitionCause::User).unwrap(), to);
            }
        }
        assert!(matches!(
            Delivered.transition(NeedsFulfillment, TransitionCause::User),
            Err(CoreError::InvalidTransition { .. })
        ));
        assert!(InTransit
            .transition(NeedsFulfillment, TransitionCause::User)
            .is_ok());
    }
}
