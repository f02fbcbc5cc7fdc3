//! # Record Matcher
//!
//! Decides create-vs-update for every incoming external record and writes
//! the result to the local store.
//!
//! ## Lookup Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  incoming record (source S, external id X)                              │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  1. row whose S foreign key == X ─────────────► update                  │
//! │        │ none                                                           │
//! │        ▼                                                                │
//! │  2. row with the same natural key and no S ───► update (links X)        │
//! │     foreign key yet (sku / email / number)                              │
//! │        │ none                                                           │
//! │        ▼                                                                │
//! │  3. create at deterministic_id(S, X) ─────────► create                  │
//! │     (id already held by another record ⇒ IdCollision, nothing written)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Update Rules
//! - Per-source shadow columns (Shopify price, QuickBooks price and cost,
//!   sync tokens) are always overwritten with the incoming value.
//! - Label fields and quantity on hand go through the Field Resolution
//!   Policy: the incoming value replaces the stored one only when it is the
//!   newest observation.
//! - Order balance is re-derived as `total - amount_paid` on every import,
//!   and the fulfillment state follows `FulfillmentState::on_import`.
//! - A record whose merged content equals what is stored is classified
//!   `Unchanged` and only has its last-synced time stamped.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use wms_core::resolution::{resolve_with_source, Candidate, Candidates, Field, FieldValue};
use wms_core::validation::{validate_name, validate_sku};
use wms_core::{
    deterministic_id, CustomerRecord, EntityKind, FulfillmentState, InventoryRecord, LineItem,
    Money, OrderRecord, Quantity, Source, ValidationError, ValueSource,
};
use wms_db::{Database, DbError};

use crate::error::SyncResult;
use crate::sources::{ExternalCustomer, ExternalItem, ExternalOrder, ExternalRecord};

// =============================================================================
// Results
// =============================================================================

/// A local record of any entity kind.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalRecord {
    Item(InventoryRecord),
    Customer(CustomerRecord),
    Order(OrderRecord),
}

impl LocalRecord {
    pub fn id(&self) -> i32 {
        match self {
            LocalRecord::Item(item) => item.id,
            LocalRecord::Customer(customer) => customer.id,
            LocalRecord::Order(order) => order.id,
        }
    }
}

/// How an incoming record was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Created,
    Updated,
    /// Matched, and nothing but the last-synced time changed.
    Unchanged,
}

/// Which lookup step found the local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    ExternalKey,
    SecondaryKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    pub record: LocalRecord,
    pub action: UpsertAction,
}

impl Upserted {
    pub fn was_created(&self) -> bool {
        self.action == UpsertAction::Created
    }
}

// =============================================================================
// Matcher
// =============================================================================

/// Matches and upserts external records against the local store.
#[derive(Debug, Clone)]
pub struct RecordMatcher {
    db: Database,
}

impl RecordMatcher {
    pub fn new(db: Database) -> Self {
        RecordMatcher { db }
    }

    /// The local record `record` corresponds to, if any.
    pub async fn find(
        &self,
        source: Source,
        record: &ExternalRecord,
    ) -> SyncResult<Option<LocalRecord>> {
        let found = match record {
            ExternalRecord::Item(item) => self
                .find_item(source, item)
                .await?
                .map(|(r, _)| LocalRecord::Item(r)),
            ExternalRecord::Customer(customer) => self
                .find_customer(source, customer)
                .await?
                .map(|(r, _)| LocalRecord::Customer(r)),
            ExternalRecord::Order(order) => self
                .find_order(source, order)
                .await?
                .map(|(r, _)| LocalRecord::Order(r)),
        };
        Ok(found)
    }

    /// Creates or updates the local counterpart of `record`.
    ///
    /// `synced_at` is stamped as the last-synced time, and stands in as the
    /// observation time when the source does not report one.
    ///
    /// ## Errors
    /// Record-level failures (validation, identifier collision, constraint
    /// violations) leave the store untouched for this record.
    pub async fn upsert(
        &self,
        source: Source,
        record: &ExternalRecord,
        synced_at: DateTime<Utc>,
    ) -> SyncResult<Upserted> {
        match record {
            ExternalRecord::Item(item) => self.upsert_item(source, item, synced_at).await,
            ExternalRecord::Customer(customer) => {
                self.upsert_customer(source, customer, synced_at).await
            }
            ExternalRecord::Order(order) => self.upsert_order(source, order, synced_at).await,
        }
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    async fn find_item(
        &self,
        source: Source,
        item: &ExternalItem,
    ) -> SyncResult<Option<(InventoryRecord, MatchedBy)>> {
        let repo = self.db.inventory();
        if let Some(found) = repo.find_by_external(source, &item.external_id).await? {
            return Ok(Some((found, MatchedBy::ExternalKey)));
        }
        let by_sku = repo.find_unlinked_by_sku(source, &item.sku).await?;
        Ok(by_sku.map(|found| (found, MatchedBy::SecondaryKey)))
    }

    async fn upsert_item(
        &self,
        source: Source,
        item: &ExternalItem,
        synced_at: DateTime<Utc>,
    ) -> SyncResult<Upserted> {
        if let Some(q) = item.quantity {
            if q.is_negative() {
                return Err(ValidationError::InvalidFormat {
                    field: "quantity_on_hand".to_string(),
                    reason: format!("{source} reports {q} on hand for {}", item.external_id),
                }
                .into());
            }
        }
        let repo = self.db.inventory();
        let observed = item.updated_at.unwrap_or(synced_at);

        let Some((existing, matched_by)) = self.find_item(source, item).await? else {
            let id = deterministic_id(source.id_space(EntityKind::Inventory), &item.external_id)?;
            if let Some(holder) = repo.get(id).await? {
                return Err(collision("Inventory", id, &holder.sku, &item.external_id));
            }
            let record = new_item(id, source, item, observed, synced_at);
            validate_name(&record.name)?;
            validate_sku(&record.sku)?;
            repo.insert(&record).await?;
            debug!(id, source = %source, external_id = %item.external_id, "Created inventory item");
            return Ok(Upserted {
                record: LocalRecord::Item(record),
                action: UpsertAction::Created,
            });
        };

        let mut merged = merge_item(&existing, source, item, observed);
        validate_name(&merged.name)?;
        validate_sku(&merged.sku)?;

        if same_item(&merged, &existing) {
            repo.mark_synced(existing.id, source, synced_at).await?;
            set_item_synced(&mut merged, source, synced_at);
            return Ok(Upserted {
                record: LocalRecord::Item(merged),
                action: UpsertAction::Unchanged,
            });
        }

        merged.updated_at = synced_at;
        set_item_synced(&mut merged, source, synced_at);
        repo.update(&merged).await?;
        debug!(
            id = merged.id,
            source = %source,
            external_id = %item.external_id,
            matched_by = ?matched_by,
            "Updated inventory item"
        );
        Ok(Upserted {
            record: LocalRecord::Item(merged),
            action: UpsertAction::Updated,
        })
    }

    // =========================================================================
    // Customers
    // =========================================================================

    async fn find_customer(
        &self,
        source: Source,
        customer: &ExternalCustomer,
    ) -> SyncResult<Option<(CustomerRecord, MatchedBy)>> {
        let repo = self.db.customers();
        if let Some(found) = repo.find_by_external(source, &customer.external_id).await? {
            return Ok(Some((found, MatchedBy::ExternalKey)));
        }
        let Some(email) = customer.email.as_deref() else {
            return Ok(None);
        };
        let by_email = repo.find_unlinked_by_email(source, email).await?;
        Ok(by_email.map(|found| (found, MatchedBy::SecondaryKey)))
    }

    async fn upsert_customer(
        &self,
        source: Source,
        customer: &ExternalCustomer,
        synced_at: DateTime<Utc>,
    ) -> SyncResult<Upserted> {
        validate_name(&customer.display_name)?;
        let repo = self.db.customers();

        let Some((existing, matched_by)) = self.find_customer(source, customer).await? else {
            let id =
                deterministic_id(source.id_space(EntityKind::Customer), &customer.external_id)?;
            if let Some(holder) = repo.get(id).await? {
                return Err(collision("Customer", id, &holder.display_name, &customer.external_id));
            }
            let mut record = CustomerRecord {
                id,
                origin: source.origin(),
                display_name: String::new(),
                email: None,
                phone: None,
                company: None,
                balance: Money::zero(),
                shopify_customer_id: None,
                quickbooks_customer_id: None,
                quickbooks_sync_token: None,
                label_source: source.value_source(),
                last_synced_at: Some(synced_at),
                updated_at: synced_at,
            };
            apply_customer(&mut record, source, customer);
            repo.insert(&record).await?;
            debug!(id, source = %source, external_id = %customer.external_id, "Created customer");
            return Ok(Upserted {
                record: LocalRecord::Customer(record),
                action: UpsertAction::Created,
            });
        };

        let mut merged = existing.clone();
        apply_customer(&mut merged, source, customer);

        if merged == existing {
            repo.mark_synced(existing.id, synced_at).await?;
            merged.last_synced_at = Some(synced_at);
            return Ok(Upserted {
                record: LocalRecord::Customer(merged),
                action: UpsertAction::Unchanged,
            });
        }

        merged.updated_at = synced_at;
        merged.last_synced_at = Some(synced_at);
        repo.update(&merged).await?;
        debug!(id = merged.id, source = %source, matched_by = ?matched_by, "Updated customer");
        Ok(Upserted {
            record: LocalRecord::Customer(merged),
            action: UpsertAction::Updated,
        })
    }

    // =========================================================================
    // Orders
    // =========================================================================

    async fn find_order(
        &self,
        source: Source,
        order: &ExternalOrder,
    ) -> SyncResult<Option<(OrderRecord, MatchedBy)>> {
        let repo = self.db.orders();
        if let Some(found) = repo.find_by_external(source, &order.external_id).await? {
            return Ok(Some((found, MatchedBy::ExternalKey)));
        }
        let by_number = repo
            .find_unlinked_by_number(source, &order.order_number)
            .await?;
        Ok(by_number.map(|found| (found, MatchedBy::SecondaryKey)))
    }

    async fn upsert_order(
        &self,
        source: Source,
        order: &ExternalOrder,
        synced_at: DateTime<Utc>,
    ) -> SyncResult<Upserted> {
        if order.order_number.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "order_number".to_string(),
            }
            .into());
        }
        let repo = self.db.orders();
        let customer_id = self.resolve_customer(source, order).await?;

        let found = self.find_order(source, order).await?;
        let (mut merged, existing, matched_by) = match found {
            Some((existing, matched_by)) => (existing.clone(), Some(existing), Some(matched_by)),
            None => {
                let id = deterministic_id(source.id_space(EntityKind::Order), &order.external_id)?;
                if let Some(holder) = repo.get(id).await? {
                    return Err(collision("Order", id, &holder.order_number, &order.external_id));
                }
                (blank_order(id, source, synced_at), None, None)
            }
        };

        merged.order_number = order.order_number.clone();
        if customer_id.is_some() {
            merged.customer_id = customer_id;
        }
        if let Some(created_at) = order.created_at {
            merged.created_at = created_at;
        }
        if order.due_date.is_some() {
            merged.due_date = order.due_date;
        }
        merged.tax = order.tax;
        merged.total = order.total;
        merged.subtotal = order.total - order.tax;
        merged.amount_paid = order.amount_paid;
        merged.recompute_balance();
        merged.fulfillment = Some(FulfillmentState::on_import(merged.fulfillment, merged.balance));
        match source {
            Source::Shopify => merged.shopify_order_id = Some(order.external_id.clone()),
            Source::QuickBooks => {
                merged.quickbooks_invoice_id = Some(order.external_id.clone());
                merged.quickbooks_sync_token = order.sync_token.clone();
            }
        }
        merged.line_items = self.build_lines(source, merged.id, order).await?;

        let Some(existing) = existing else {
            repo.insert(&merged).await?;
            debug!(
                id = merged.id,
                source = %source,
                number = %merged.order_number,
                balance = %merged.balance,
                "Created order"
            );
            return Ok(Upserted {
                record: LocalRecord::Order(merged),
                action: UpsertAction::Created,
            });
        };

        if merged == existing {
            repo.mark_synced(existing.id, synced_at).await?;
            merged.last_synced_at = Some(synced_at);
            return Ok(Upserted {
                record: LocalRecord::Order(merged),
                action: UpsertAction::Unchanged,
            });
        }

        merged.updated_at = synced_at;
        merged.last_synced_at = Some(synced_at);
        repo.update(&merged).await?;
        debug!(
            id = merged.id,
            source = %source,
            matched_by = ?matched_by,
            balance = %merged.balance,
            "Updated order"
        );
        Ok(Upserted {
            record: LocalRecord::Order(merged),
            action: UpsertAction::Updated,
        })
    }

    /// Local customer for the order's external customer reference.
    async fn resolve_customer(
        &self,
        source: Source,
        order: &ExternalOrder,
    ) -> SyncResult<Option<i32>> {
        let Some(external) = order.customer_external_id.as_deref() else {
            return Ok(None);
        };
        let found = self.db.customers().find_by_external(source, external).await?;
        if found.is_none() {
            warn!(
                source = %source,
                order = %order.external_id,
                customer = %external,
                "Order references a customer that is not synced"
            );
        }
        Ok(found.map(|c| c.id))
    }

    /// Line items with derived totals and local inventory links.
    async fn build_lines(
        &self,
        source: Source,
        order_id: i32,
        order: &ExternalOrder,
    ) -> SyncResult<Vec<LineItem>> {
        let inventory = self.db.inventory();
        let mut lines = Vec::with_capacity(order.lines.len());
        for (position, line) in order.lines.iter().enumerate() {
            if line.unit_price.checked_multiply_quantity(line.quantity).is_none() {
                return Err(ValidationError::OutOfRange {
                    field: format!("line {position} total"),
                    min: i64::MIN,
                    max: i64::MAX,
                }
                .into());
            }
            let mut inventory_id = None;
            if let Some(item_id) = line.item_external_id.as_deref() {
                inventory_id = inventory
                    .find_by_external(source, item_id)
                    .await?
                    .map(|item| item.id);
            }
            if inventory_id.is_none() {
                inventory_id = inventory.find_by_sku(&line.sku).await?.map(|item| item.id);
            }
            lines.push(
                LineItem::new(
                    format!("{order_id}-{position}"),
                    order_id,
                    position as i32,
                    line.sku.clone(),
                    line.description.clone(),
                    line.quantity,
                    line.unit_price,
                )
                .with_inventory(inventory_id),
            );
        }
        Ok(lines)
    }
}

// =============================================================================
// Merging
// =============================================================================

fn collision(entity: &str, id: i32, existing: &str, incoming: &str) -> crate::error::SyncError {
    warn!(entity, id, existing, incoming, "Deterministic id already taken");
    DbError::IdCollision {
        entity: entity.to_string(),
        id,
        existing: existing.to_string(),
        incoming: incoming.to_string(),
    }
    .into()
}

/// Empty strings count as "no value" for SKU and barcode.
fn present(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

fn new_item(
    id: i32,
    source: Source,
    item: &ExternalItem,
    observed: DateTime<Utc>,
    synced_at: DateTime<Utc>,
) -> InventoryRecord {
    let (quantity_on_hand, quantity_source, quantity_updated_at) = match item.quantity {
        Some(q) => (q, source.value_source(), Some(observed)),
        None => (Quantity::zero(), ValueSource::Unknown, None),
    };
    let mut record = InventoryRecord {
        id,
        origin: source.origin(),
        sku: item.sku.clone(),
        name: item.name.clone(),
        description: item.description.clone(),
        barcode: item.barcode.clone().unwrap_or_default(),
        label_source: source.value_source(),
        labels_updated_at: Some(observed),
        quantity_on_hand,
        quantity_source,
        quantity_updated_at,
        min_stock: Quantity::zero(),
        manual_price: None,
        shopify_price: None,
        quickbooks_price: None,
        manual_cost: None,
        quickbooks_cost: None,
        shopify_product_id: None,
        quickbooks_item_id: None,
        quickbooks_sync_token: None,
        needs_reconciliation: false,
        updated_at: synced_at,
        last_synced_shopify: None,
        last_synced_quickbooks: None,
    };
    apply_item_shadows(&mut record, source, item);
    set_item_synced(&mut record, source, synced_at);
    record
}

/// Foreign key, sync token and per-source price/cost. Never resolved.
fn apply_item_shadows(record: &mut InventoryRecord, source: Source, item: &ExternalItem) {
    match source {
        Source::Shopify => {
            record.shopify_product_id = Some(item.external_id.clone());
            record.shopify_price = item.price;
        }
        Source::QuickBooks => {
            record.quickbooks_item_id = Some(item.external_id.clone());
            record.quickbooks_sync_token = item.sync_token.clone();
            record.quickbooks_price = item.price;
            record.quickbooks_cost = item.cost;
        }
    }
}

fn set_item_synced(record: &mut InventoryRecord, source: Source, at: DateTime<Utc>) {
    match source {
        Source::Shopify => record.last_synced_shopify = Some(at),
        Source::QuickBooks => record.last_synced_quickbooks = Some(at),
    }
}

/// The stored candidate plus the incoming one, in their policy slots.
///
/// When the stored value already belongs to `source`, the incoming value
/// takes its slot.
fn candidates<T>(
    stored: (ValueSource, T, Option<DateTime<Utc>>),
    source: Source,
    incoming: Option<T>,
    observed: DateTime<Utc>,
) -> Candidates<T> {
    let (stored_source, stored_value, stored_at) = stored;
    let stored = Candidate {
        value: stored_value,
        observed_at: stored_at,
    };
    let set = Candidates::new().with(stored_source, stored);
    match incoming {
        Some(value) => set.with(source.value_source(), Candidate::observed(value, observed)),
        None => set,
    }
}

fn resolve_label<T: FieldValue>(
    field: Field,
    stored: (ValueSource, T, Option<DateTime<Utc>>),
    source: Source,
    incoming: Option<T>,
    observed: DateTime<Utc>,
) -> Option<(T, ValueSource)> {
    let resolved = resolve_with_source(field, &candidates(stored, source, incoming, observed));
    resolved.value.map(|v| (v, resolved.source))
}

fn merge_item(
    existing: &InventoryRecord,
    source: Source,
    item: &ExternalItem,
    observed: DateTime<Utc>,
) -> InventoryRecord {
    let mut merged = existing.clone();
    let labels = |value: &String| (existing.label_source, value.clone(), existing.labels_updated_at);

    let mut winner = existing.label_source;
    if let Some((name, by)) = resolve_label(
        Field::Name,
        labels(&existing.name),
        source,
        Some(item.name.clone()),
        observed,
    ) {
        merged.name = name;
        winner = by;
    }
    if let Some((sku, _)) = resolve_label(
        Field::Sku,
        labels(&existing.sku),
        source,
        present(Some(&item.sku)),
        observed,
    ) {
        merged.sku = sku;
    }
    if let Some((description, _)) = resolve_label(
        Field::Description,
        labels(&existing.description),
        source,
        Some(item.description.clone()),
        observed,
    ) {
        merged.description = description;
    }
    if let Some((barcode, _)) = resolve_label(
        Field::Barcode,
        labels(&existing.barcode),
        source,
        present(item.barcode.as_ref()),
        observed,
    ) {
        merged.barcode = barcode;
    }
    let labels_changed = merged.name != existing.name
        || merged.sku != existing.sku
        || merged.description != existing.description
        || merged.barcode != existing.barcode;
    if winner != existing.label_source || labels_changed {
        merged.label_source = winner;
        merged.labels_updated_at = Some(observed);
    }

    if let Some((quantity, by)) = resolve_label(
        Field::Quantity,
        (
            existing.quantity_source,
            existing.quantity_on_hand,
            existing.quantity_updated_at,
        ),
        source,
        item.quantity,
        observed,
    ) {
        if quantity != existing.quantity_on_hand || by != existing.quantity_source {
            merged.quantity_on_hand = quantity;
            merged.quantity_source = by;
            merged.quantity_updated_at = Some(observed);
        }
    }

    apply_item_shadows(&mut merged, source, item);
    merged
}

/// Equal apart from bookkeeping timestamps.
fn same_item(merged: &InventoryRecord, stored: &InventoryRecord) -> bool {
    let normalized = InventoryRecord {
        updated_at: stored.updated_at,
        last_synced_shopify: stored.last_synced_shopify,
        last_synced_quickbooks: stored.last_synced_quickbooks,
        ..merged.clone()
    };
    normalized == *stored
}

/// Contact fields follow the latest sync. Absent optional fields keep what
/// is stored, and only the accounting system reports a balance.
fn apply_customer(record: &mut CustomerRecord, source: Source, customer: &ExternalCustomer) {
    record.display_name = customer.display_name.clone();
    if customer.email.is_some() {
        record.email = customer.email.clone();
    }
    if customer.phone.is_some() {
        record.phone = customer.phone.clone();
    }
    if customer.company.is_some() {
        record.company = customer.company.clone();
    }
    if let Some(balance) = customer.balance {
        record.balance = balance;
    }
    record.label_source = source.value_source();
    match source {
        Source::Shopify => record.shopify_customer_id = Some(customer.external_id.clone()),
        Source::QuickBooks => {
            record.quickbooks_customer_id = Some(customer.external_id.clone());
            record.quickbooks_sync_token = customer.sync_token.clone();
        }
    }
}

fn blank_order(id: i32, source: Source, synced_at: DateTime<Utc>) -> OrderRecord {
    OrderRecord {
        id,
        order_number: String::new(),
        origin: source.origin(),
        customer_id: None,
        created_at: synced_at,
        due_date: None,
        subtotal: Money::zero(),
        tax: Money::zero(),
        total: Money::zero(),
        amount_paid: Money::zero(),
        balance: Money::zero(),
        fulfillment: None,
        is_priority: false,
        needs_attention: false,
        shopify_order_id: None,
        quickbooks_invoice_id: None,
        quickbooks_sync_token: None,
        last_synced_at: Some(synced_at),
        updated_at: synced_at,
        line_items: Vec::new(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
