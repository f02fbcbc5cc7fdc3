//! # Field Resolution Policy
//!
//! Decides which contributor's value is authoritative for a field when the
//! local store, Shopify and QuickBooks all have an opinion.
//!
//! ## Precedence by Category
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  COST    QuickBooks (if > 0) ──► Manual ──► zero            [Unknown]  │
//! │                                                                         │
//! │  PRICE   Manual (if set) ──► Shopify ──► QuickBooks ──► absent          │
//! │                                                                         │
//! │  LABEL   newest observation wins (name, sku, description, barcode,     │
//! │          quantity on hand); a manual edit wins until a later sync       │
//! │          overwrites it; ties go to Manual, then Shopify, then QBO       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Observation Time
//! A label candidate is stamped with the time its contributor last changed
//! it, not the time we fetched it. A synced value carries the source's own
//! modification time (Shopify `updatedAt`, QuickBooks
//! `MetaData.LastUpdatedTime`) and falls back to the sync time only when
//! the source reports none. A manual edit is stamped with its commit time.
//! So a later sync overwrites a manual edit only when the remote record
//! itself changed after the edit. Re-fetching an untouched remote record
//! leaves the edit in place, and two sources never flip a name back and
//! forth on every run.
//!
//! Every function here is pure and never mutates stored data; the UI calls
//! it on every render. [`resolve`] and [`source_label`] are both projections
//! of [`resolve_with_source`], so the attribution shown next to a value is
//! always the branch that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;
use crate::quantity::Quantity;

// =============================================================================
// Contributors
// =============================================================================

/// Where an authoritative value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ValueSource {
    /// Entered by a user in the local app.
    Manual,
    /// Storefront (Shopify).
    Shopify,
    /// Accounting system (QuickBooks Online).
    #[serde(rename = "quickbooks")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "quickbooks"))]
    QuickBooks,
    /// No contributor supplied a value.
    Unknown,
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ValueSource::Manual => "Manual",
            ValueSource::Shopify => "Shopify",
            ValueSource::QuickBooks => "QuickBooks",
            ValueSource::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

// =============================================================================
// Fields
// =============================================================================

/// Precedence family a field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCategory {
    Cost,
    Price,
    Label,
}

/// A resolvable inventory field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    Sku,
    Description,
    Barcode,
    Quantity,
    Price,
    Cost,
}

impl Field {
    pub fn category(self) -> FieldCategory {
        match self {
            Field::Cost => FieldCategory::Cost,
            Field::Price => FieldCategory::Price,
            Field::Name | Field::Sku | Field::Description | Field::Barcode | Field::Quantity => {
                FieldCategory::Label
            }
        }
    }
}

/// A value type the policy knows how to rank.
pub trait FieldValue: Clone {
    /// True when the value counts as "present and > 0" for cost precedence.
    fn is_positive(&self) -> bool;

    /// Fallback used when no cost contributor qualifies.
    fn zero() -> Option<Self>;
}

impl FieldValue for Money {
    fn is_positive(&self) -> bool {
        Money::is_positive(self)
    }

    fn zero() -> Option<Self> {
        Some(Money::zero())
    }
}

impl FieldValue for Quantity {
    fn is_positive(&self) -> bool {
        Quantity::is_positive(self)
    }

    fn zero() -> Option<Self> {
        Some(Quantity::zero())
    }
}

impl FieldValue for String {
    fn is_positive(&self) -> bool {
        !self.is_empty()
    }

    fn zero() -> Option<Self> {
        None
    }
}

// =============================================================================
// Candidates
// =============================================================================

/// One contributor's value plus when it was observed.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<T> {
    pub value: T,
    pub observed_at: Option<DateTime<Utc>>,
}

impl<T> Candidate<T> {
    /// A candidate without an observation time (ranks oldest for labels).
    pub fn new(value: T) -> Self {
        Candidate {
            value,
            observed_at: None,
        }
    }

    pub fn observed(value: T, at: DateTime<Utc>) -> Self {
        Candidate {
            value,
            observed_at: Some(at),
        }
    }
}

/// The competing values for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidates<T> {
    pub manual: Option<Candidate<T>>,
    pub shopify: Option<Candidate<T>>,
    pub quickbooks: Option<Candidate<T>>,
}

impl<T> Default for Candidates<T> {
    fn default() -> Self {
        Candidates {
            manual: None,
            shopify: None,
            quickbooks: None,
        }
    }
}

impl<T> Candidates<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manual(mut self, candidate: Candidate<T>) -> Self {
        self.manual = Some(candidate);
        self
    }

    pub fn shopify(mut self, candidate: Candidate<T>) -> Self {
        self.shopify = Some(candidate);
        self
    }

    pub fn quickbooks(mut self, candidate: Candidate<T>) -> Self {
        self.quickbooks = Some(candidate);
        self
    }

    /// Sets the slot belonging to `source`. `Unknown` is ignored.
    pub fn with(mut self, source: ValueSource, candidate: Candidate<T>) -> Self {
        match source {
            ValueSource::Manual => self.manual = Some(candidate),
            ValueSource::Shopify => self.shopify = Some(candidate),
            ValueSource::QuickBooks => self.quickbooks = Some(candidate),
            ValueSource::Unknown => {}
        }
        self
    }

    /// Slots in tie-break order.
    fn ranked(&self) -> [(ValueSource, Option<&Candidate<T>>); 3] {
        [
            (ValueSource::Manual, self.manual.as_ref()),
            (ValueSource::Shopify, self.shopify.as_ref()),
            (ValueSource::QuickBooks, self.quickbooks.as_ref()),
        ]
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// The authoritative value and the contributor it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: Option<T>,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    fn from(source: ValueSource, value: T) -> Self {
        Resolved {
            value: Some(value),
            source,
        }
    }

    fn absent(value: Option<T>) -> Self {
        Resolved {
            value,
            source: ValueSource::Unknown,
        }
    }
}

/// Resolves a field and reports which branch won.
pub fn resolve_with_source<T: FieldValue>(field: Field, candidates: &Candidates<T>) -> Resolved<T> {
    match field.category() {
        FieldCategory::Cost => resolve_cost(candidates),
        FieldCategory::Price => resolve_price(candidates),
        FieldCategory::Label => resolve_latest(candidates),
    }
}

/// The authoritative value for `field`, if any.
pub fn resolve<T: FieldValue>(field: Field, candidates: &Candidates<T>) -> Option<T> {
    resolve_with_source(field, candidates).value
}

/// Attribution for the value [`resolve`] returns.
pub fn source_label<T: FieldValue>(field: Field, candidates: &Candidates<T>) -> ValueSource {
    resolve_with_source(field, candidates).source
}

fn resolve_cost<T: FieldValue>(candidates: &Candidates<T>) -> Resolved<T> {
    if let Some(accounting) = candidates.quickbooks.as_ref() {
        if accounting.value.is_positive() {
            return Resolved::from(ValueSource::QuickBooks, accounting.value.clone());
        }
    }
    if let Some(manual) = candidates.manual.as_ref() {
        return Resolved::from(ValueSource::Manual, manual.value.clone());
    }
    Resolved::absent(T::zero())
}

fn resolve_price<T: FieldValue>(candidates: &Candidates<T>) -> Resolved<T> {
    candidates
        .ranked()
        .into_iter()
        .find_map(|(source, slot)| slot.map(|c| Resolved::from(source, c.value.clone())))
        .unwrap_or_else(|| Resolved::absent(None))
}

fn resolve_latest<T: FieldValue>(candidates: &Candidates<T>) -> Resolved<T> {
    let mut best: Option<(ValueSource, &Candidate<T>)> = None;
    for (source, slot) in candidates.ranked() {
        let Some(candidate) = slot else { continue };
        match best {
            Some((_, current)) if candidate.observed_at <= current.observed_at => {}
            _ => best = Some((source, candidate)),
        }
    }
    match best {
        Some((source, candidate)) => Resolved::from(source, candidate.value.clone()),
        None => Resolved::absent(None),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
