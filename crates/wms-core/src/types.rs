//! # Domain Types
//!
//! Records shared by the local store, the sync layer and the UI.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ InventoryRecord │   │   OrderRecord   │   │ CustomerRecord  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (i32)       │   │  id (i32)       │   │  id (i32)       │       │
//! │  │  sku, name      │   │  order_number   │   │  display_name   │       │
//! │  │  quantity       │   │  total/balance  │   │  balance        │       │
//! │  │  price shadows  │   │  fulfillment    │   │  external keys  │       │
//! │  │  external keys  │   │  line_items ────┼──►│                 │       │
//! │  └────────▲────────┘   └────────┬────────┘   └─────────────────┘       │
//! │           │ referenced          │ owns                                  │
//! │           │ (nullable)   ┌──────▼──────┐                                │
//! │           └──────────────┤  LineItem   │                                │
//! │                          └─────────────┘                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! Every record has an `i32` id. Locally created records take the next id
//! from the sequential range; records first seen in an external system get
//! a deterministic id (see [`crate::identity`]). Each record also carries
//! the external keys it is known by, one nullable column per system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::fulfillment::FulfillmentState;
use crate::identity::IdSpace;
use crate::money::Money;
use crate::quantity::Quantity;
use crate::resolution::{resolve_with_source, Candidate, Candidates, Field, Resolved, ValueSource};

// =============================================================================
// Sources and Origins
// =============================================================================

/// An external system of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Source {
    /// Storefront.
    Shopify,
    /// Accounting (QuickBooks Online).
    #[serde(rename = "quickbooks")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "quickbooks"))]
    QuickBooks,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Shopify, Source::QuickBooks];

    /// Attribution used by the Field Resolution Policy.
    pub fn value_source(self) -> ValueSource {
        match self {
            Source::Shopify => ValueSource::Shopify,
            Source::QuickBooks => ValueSource::QuickBooks,
        }
    }

    pub fn origin(self) -> Origin {
        match self {
            Source::Shopify => Origin::Shopify,
            Source::QuickBooks => Origin::QuickBooks,
        }
    }

    /// The id range this source's records of `entity` hash into.
    pub fn id_space(self, entity: EntityKind) -> IdSpace {
        match (self, entity) {
            (Source::Shopify, EntityKind::Inventory) => IdSpace::ShopifyProduct,
            (Source::Shopify, EntityKind::Customer) => IdSpace::ShopifyCustomer,
            (Source::Shopify, EntityKind::Order) => IdSpace::ShopifyOrder,
            (Source::QuickBooks, EntityKind::Inventory) => IdSpace::QuickBooksItem,
            (Source::QuickBooks, EntityKind::Customer) => IdSpace::QuickBooksCustomer,
            (Source::QuickBooks, EntityKind::Order) => IdSpace::QuickBooksInvoice,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Shopify => f.write_str("Shopify"),
            Source::QuickBooks => f.write_str("QuickBooks"),
        }
    }
}

/// Which system a record was first created in. Exactly one per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Origin {
    Local,
    Shopify,
    #[serde(rename = "quickbooks")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "quickbooks"))]
    QuickBooks,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => f.write_str("local"),
            Origin::Shopify => f.write_str("shopify"),
            Origin::QuickBooks => f.write_str("quickbooks"),
        }
    }
}

/// The entity types a sync pass can cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum EntityKind {
    Inventory,
    Customer,
    Order,
}

impl EntityKind {
    /// Pass order inside one source. Orders come last so their customer and
    /// inventory references can resolve against freshly synced rows.
    pub const SYNC_ORDER: [EntityKind; 3] =
        [EntityKind::Inventory, EntityKind::Customer, EntityKind::Order];
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Inventory => f.write_str("inventory"),
            EntityKind::Customer => f.write_str("customers"),
            EntityKind::Order => f.write_str("orders"),
        }
    }
}

// =============================================================================
// Inventory
// =============================================================================

/// One stock-keeping unit.
///
/// Label fields (`sku`, `name`, `description`, `barcode`) and the quantity
/// hold the currently authoritative value; `label_source` and
/// `quantity_source` say who wrote it last. Price and cost keep one shadow
/// column per contributor and are resolved at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InventoryRecord {
    pub id: i32,
    pub origin: Origin,

    /// Stock-keeping code. May be empty.
    pub sku: String,
    pub name: String,
    pub description: String,
    pub barcode: String,
    pub label_source: ValueSource,
    #[ts(as = "Option<String>")]
    pub labels_updated_at: Option<DateTime<Utc>>,

    /// Never negative after a committed operation.
    pub quantity_on_hand: Quantity,
    pub quantity_source: ValueSource,
    #[ts(as = "Option<String>")]
    pub quantity_updated_at: Option<DateTime<Utc>>,
    pub min_stock: Quantity,

    pub manual_price: Option<Money>,
    pub shopify_price: Option<Money>,
    pub quickbooks_price: Option<Money>,
    pub manual_cost: Option<Money>,
    pub quickbooks_cost: Option<Money>,

    pub shopify_product_id: Option<String>,
    pub quickbooks_item_id: Option<String>,
    /// QuickBooks optimistic-concurrency token, as of the last read.
    pub quickbooks_sync_token: Option<String>,

    /// Set when a push was rejected as stale and a human must reconcile.
    pub needs_reconciliation: bool,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub last_synced_shopify: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub last_synced_quickbooks: Option<DateTime<Utc>>,
}

impl InventoryRecord {
    /// Selling price with attribution.
    pub fn price(&self) -> Resolved<Money> {
        let candidates = Candidates {
            manual: self.manual_price.map(Candidate::new),
            shopify: self.shopify_price.map(Candidate::new),
            quickbooks: self.quickbooks_price.map(Candidate::new),
        };
        resolve_with_source(Field::Price, &candidates)
    }

    /// Unit cost with attribution.
    pub fn cost(&self) -> Resolved<Money> {
        let candidates = Candidates {
            manual: self.manual_cost.map(Candidate::new),
            shopify: None,
            quickbooks: self.quickbooks_cost.map(Candidate::new),
        };
        resolve_with_source(Field::Cost, &candidates)
    }

    pub fn external_id(&self, source: Source) -> Option<&str> {
        match source {
            Source::Shopify => self.shopify_product_id.as_deref(),
            Source::QuickBooks => self.quickbooks_item_id.as_deref(),
        }
    }

    pub fn last_synced(&self, source: Source) -> Option<DateTime<Utc>> {
        match source {
            Source::Shopify => self.last_synced_shopify,
            Source::QuickBooks => self.last_synced_quickbooks,
        }
    }

    pub fn is_below_minimum(&self) -> bool {
        self.quantity_on_hand < self.min_stock
    }
}

/// Fields a user supplies when creating an item by hand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewInventoryItem {
    pub sku: String,
    pub name: String,
    pub description: String,
    pub barcode: String,
    pub quantity_on_hand: Quantity,
    pub min_stock: Quantity,
    pub manual_price: Option<Money>,
    pub manual_cost: Option<Money>,
}

/// A manual edit of an item's labels. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LabelEdit {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub barcode: Option<String>,
}

/// A quantity-changing warehouse operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", content = "quantity", rename_all = "snake_case")]
#[ts(export)]
pub enum StockMovement {
    /// Taken off the shelf for an order.
    Pick(Quantity),
    /// Received and shelved.
    Putaway(Quantity),
    /// Written off (damaged, lost).
    Remove(Quantity),
    /// Cycle count: set the on-hand quantity outright.
    Adjust(Quantity),
}

impl StockMovement {
    /// Quantity on hand after the movement. Unchecked; see
    /// [`crate::validation::validate_movement`].
    pub fn apply(self, on_hand: Quantity) -> Quantity {
        match self {
            StockMovement::Pick(q) | StockMovement::Remove(q) => on_hand - q,
            StockMovement::Putaway(q) => on_hand + q,
            StockMovement::Adjust(to) => to,
        }
    }

    /// The amount the operator typed in.
    pub fn amount(self) -> Quantity {
        match self {
            StockMovement::Pick(q)
            | StockMovement::Putaway(q)
            | StockMovement::Remove(q)
            | StockMovement::Adjust(q) => q,
        }
    }
}

// =============================================================================
// Orders
// =============================================================================

/// A sale or invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OrderRecord {
    pub id: i32,
    pub order_number: String,
    pub origin: Origin,
    pub customer_id: Option<i32>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub due_date: Option<DateTime<Utc>>,

    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
    pub amount_paid: Money,
    /// Always `total - amount_paid`.
    pub balance: Money,

    pub fulfillment: Option<FulfillmentState>,
    pub is_priority: bool,
    pub needs_attention: bool,

    pub shopify_order_id: Option<String>,
    pub quickbooks_invoice_id: Option<String>,
    pub quickbooks_sync_token: Option<String>,
    #[ts(as = "Option<String>")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    pub line_items: Vec<LineItem>,
}

impl OrderRecord {
    /// Re-derives `balance` from `total` and `amount_paid`.
    pub fn recompute_balance(&mut self) {
        self.balance = self.total - self.amount_paid;
    }

    pub fn external_id(&self, source: Source) -> Option<&str> {
        match source {
            Source::Shopify => self.shopify_order_id.as_deref(),
            Source::QuickBooks => self.quickbooks_invoice_id.as_deref(),
        }
    }

    /// Sum of the line totals.
    pub fn lines_total(&self) -> Money {
        self.line_items.iter().map(|l| l.line_total).sum()
    }
}

/// One line of an order. Owned by its order; the inventory reference is
/// nulled, not cascaded, when the item is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct LineItem {
    /// `{order_id}-{position}` for imported lines, UUID v4 for lines added locally.
    pub id: String,
    pub order_id: i32,
    pub inventory_id: Option<i32>,
    pub sku: String,
    pub description: String,
    pub quantity: Quantity,
    pub unit_price: Money,
    /// Derived: `quantity × unit_price`.
    pub line_total: Money,
    pub position: i32,
}

impl LineItem {
    /// Builds a line with its total derived from quantity and unit price.
    pub fn new(
        id: String,
        order_id: i32,
        position: i32,
        sku: String,
        description: String,
        quantity: Quantity,
        unit_price: Money,
    ) -> Self {
        LineItem {
            id,
            order_id,
            inventory_id: None,
            sku,
            description,
            quantity,
            unit_price,
            line_total: unit_price.multiply_quantity(quantity),
            position,
        }
    }

    pub fn with_inventory(mut self, inventory_id: Option<i32>) -> Self {
        self.inventory_id = inventory_id;
        self
    }
}

/// A line supplied when creating an order locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewLineItem {
    pub inventory_id: Option<i32>,
    pub sku: String,
    pub description: String,
    pub quantity: Quantity,
    pub unit_price: Money,
}

/// Fields a user supplies when creating an order by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewOrder {
    pub order_number: String,
    pub customer_id: Option<i32>,
    #[ts(as = "Option<String>")]
    pub due_date: Option<DateTime<Utc>>,
    pub tax: Money,
    pub amount_paid: Money,
    pub is_priority: bool,
    pub lines: Vec<NewLineItem>,
}

// =============================================================================
// Customers
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CustomerRecord {
    pub id: i32,
    pub origin: Origin,
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub balance: Money,
    pub shopify_customer_id: Option<String>,
    pub quickbooks_customer_id: Option<String>,
    pub quickbooks_sync_token: Option<String>,
    pub label_source: ValueSource,
    #[ts(as = "Option<String>")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl CustomerRecord {
    pub fn external_id(&self, source: Source) -> Option<&str> {
        match source {
            Source::Shopify => self.shopify_customer_id.as_deref(),
            Source::QuickBooks => self.quickbooks_customer_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewCustomer {
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
}

// =============================================================================
// Credentials
// =============================================================================

/// Bearer credentials for one external source.
///
/// The three token fields are only ever replaced together.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    /// Shop domain (Shopify) or realm/company id (QuickBooks).
    pub account_id: String,
}

impl Credentials {
    /// True when `now` is within `lead` of expiry (or past it).
    pub fn expires_within(&self, lead: chrono::Duration, now: DateTime<Utc>) -> bool {
        now + lead >= self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("account_id", &self.account_id)
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> InventoryRecord {
        InventoryRecord {
            id: 1,
            origin: Origin::Local,
            sku: "ABC".into(),
            name: "Widget".into(),
            description: String::new(),
            barcode: String::new(),
            label_source: ValueSource::Manual,
            labels_updated_at: None,
            quantity_on_hand: Quantity::from_units(10),
            quantity_source: ValueSource::Manual,
            quantity_updated_at: None,
            min_stock: Quantity::from_units(2),
            manual_price: Some(Money::from_cents(2000)),
            shopify_price: Some(Money::from_cents(1800)),
            quickbooks_price: None,
            manual_cost: None,
            quickbooks_cost: Some(Money::from_cents(900)),
            shopify_product_id: None,
            quickbooks_item_id: Some("Q1".into()),
            quickbooks_sync_token: None,
            needs_reconciliation: false,
            updated_at: Utc::now(),
            last_synced_shopify: None,
            last_synced_quickbooks: None,
        }
    }

    #[test]
    fn test_record_price_and_cost_resolution() {
        let mut record = item();
        assert_eq!(record.price().value, Some(Money::from_cents(2000)));
        assert_eq!(record.price().source, ValueSource::Manual);
        assert_eq!(record.cost().source, ValueSource::QuickBooks);

        record.manual_price = None;
        assert_eq!(record.price().value, Some(Money::from_cents(1800)));
        assert_eq!(record.price().source, ValueSource::Shopify);
    }

    #[test]
    fn test_movements() {
        let on_hand = Quantity::from_units(10);
        assert_eq!(StockMovement::Pick(Quantity::from_units(3)).apply(on_hand), Quantity::from_units(7));
        assert_eq!(StockMovement::Putaway(Quantity::from_units(5)).apply(on_hand), Quantity::from_units(15));
        assert!(StockMovement::Remove(Quantity::from_units(12)).apply(on_hand).is_negative());
        assert_eq!(StockMovement::Adjust(Quantity::from_units(4)).apply(on_hand), Quantity::from_units(4));
    }

    #[test]
    fn test_line_total_is_derived() {
        let line = LineItem::new(
            "l1".into(),
            1,
            0,
            "ABC".into(),
            "Widget".into(),
            Quantity::from_thousandths(2500),
            Money::from_cents(400),
        );
        assert_eq!(line.line_total, Money::from_cents(1000));
    }

    #[test]
    fn test_id_spaces_per_source_entity() {
        assert_eq!(Source::QuickBooks.id_space(EntityKind::Inventory), IdSpace::QuickBooksItem);
        assert_eq!(Source::Shopify.id_space(EntityKind::Order), IdSpace::ShopifyOrder);
    }

    #[test]
    fn test_credentials_debug_redacts_tokens() {
        let creds = Credentials {
            access_token: "secret-access".into(),
            refresh_token: "secret-refresh".into(),
            expires_at: Utc::now(),
            account_id: "realm-1".into(),
        };
        let printed = format!("{creds:?}");
        assert!(!printed.contains("secret"));
        assert!(printed.contains("realm-1"));
    }

    #[test]
    fn test_credentials_lead_window() {
        let now = Utc::now();
        let creds = Credentials {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: now + chrono::Duration::minutes(4),
            account_id: "x".into(),
        };
        assert!(creds.expires_within(chrono::Duration::minutes(5), now));
        assert!(!creds.expires_within(chrono::Duration::minutes(3), now));
        assert!(!creds.is_expired(now));
    }
}
