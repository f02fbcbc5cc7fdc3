//! # QuickBooks Online Source
//!
//! REST query endpoint with SQL-like paging:
//!
//! ```text
//! GET {base}/v3/company/{realm}/query
//!     ?query=SELECT * FROM Item STARTPOSITION 1 MAXRESULTS 100
//!     &minorversion=65
//! ```
//!
//! `STARTPOSITION` is 1-based and advances by the number of records
//! received. A `Fault` body is a failure whatever the HTTP status.
//!
//! ## Push (read-modify-write)
//! ```text
//! ┌──────────────┐  GET item/{id}    ┌──────────────┐
//! │ push_inventory│ ────────────────► │  QuickBooks  │  SyncToken = "3"
//! │              │ ◄──────────────── │              │
//! │              │  POST item        │              │
//! │              │  {sparse, "3"}    │              │  5010 Stale Object
//! │              │ ────────────────► │              │  ──► ModifiedElsewhere
//! └──────────────┘                   └──────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Number, Value};
use std::time::Duration;
use tracing::{debug, info, warn};
use wms_core::{Credentials, EntityKind, InventoryRecord, Money, Quantity, Source};

use super::{
    decode_node, expiry_after, parse_money, AuthHeader, ExternalCustomer, ExternalItem,
    ExternalLine, ExternalOrder, ExternalRecord, ExternalSource, HttpClient, Page, PageRequest,
    Pagination, PushReceipt, Rejected,
};
use crate::config::QuickBooksSettings;
use crate::error::{SyncError, SyncResult};

/// Fault code for an update carrying a stale `SyncToken`.
const STALE_OBJECT_CODE: &str = "5010";

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemDto {
    id: String,
    sync_token: Option<String>,
    name: String,
    sku: Option<String>,
    description: Option<String>,
    unit_price: Option<Number>,
    purchase_cost: Option<Number>,
    qty_on_hand: Option<Number>,
    #[serde(default)]
    track_qty_on_hand: bool,
    meta_data: Option<MetaDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetaDto {
    last_updated_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CustomerDto {
    id: String,
    sync_token: Option<String>,
    display_name: String,
    company_name: Option<String>,
    primary_email_addr: Option<EmailDto>,
    primary_phone: Option<PhoneDto>,
    balance: Option<Number>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EmailDto {
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PhoneDto {
    free_form_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InvoiceDto {
    id: String,
    sync_token: Option<String>,
    doc_number: Option<String>,
    txn_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    customer_ref: Option<RefDto>,
    total_amt: Number,
    balance: Number,
    txn_tax_detail: Option<TaxDto>,
    #[serde(default)]
    line: Vec<LineDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TaxDto {
    total_tax: Option<Number>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LineDto {
    amount: Option<Number>,
    description: Option<String>,
    detail_type: String,
    sales_item_line_detail: Option<SalesLineDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SalesLineDto {
    item_ref: Option<RefDto>,
    qty: Option<Number>,
    unit_price: Option<Number>,
}

#[derive(Debug, Deserialize)]
struct RefDto {
    value: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

// =============================================================================
// Conversions
// =============================================================================

fn money(n: &Number) -> Result<Money, String> {
    parse_money(&n.to_string())
}

fn quantity(n: &Number) -> Result<Quantity, String> {
    Quantity::parse_decimal(&n.to_string()).map_err(|e| e.to_string())
}

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
}

/// Plain decimal JSON number for an amount (`18.5`).
fn amount_json(amount: Money) -> SyncResult<Value> {
    let cents = amount.cents();
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
        .parse::<Value>()
        .map_err(|e| SyncError::Internal(format!("amount encoding: {e}")))
}

impl TryFrom<ItemDto> for ExternalItem {
    type Error = String;

    fn try_from(dto: ItemDto) -> Result<Self, Self::Error> {
        let on_hand = match (&dto.qty_on_hand, dto.track_qty_on_hand) {
            (Some(q), true) => Some(quantity(q)?),
            _ => None,
        };
        Ok(ExternalItem {
            external_id: dto.id,
            sku: dto.sku.unwrap_or_default(),
            name: dto.name,
            description: dto.description.unwrap_or_default(),
            barcode: None,
            quantity: on_hand,
            price: dto.unit_price.as_ref().map(money).transpose()?,
            cost: dto.purchase_cost.as_ref().map(money).transpose()?,
            sync_token: dto.sync_token,
            updated_at: dto.meta_data.and_then(|m| m.last_updated_time),
        })
    }
}

impl TryFrom<CustomerDto> for ExternalCustomer {
    type Error = String;

    fn try_from(dto: CustomerDto) -> Result<Self, Self::Error> {
        Ok(ExternalCustomer {
            external_id: dto.id,
            display_name: dto.display_name,
            email: dto.primary_email_addr.and_then(|e| e.address),
            phone: dto.primary_phone.and_then(|p| p.free_form_number),
            company: dto.company_name,
            balance: Some(match &dto.balance {
                Some(b) => money(b)?,
                None => Money::zero(),
            }),
            sync_token: dto.sync_token,
        })
    }
}

impl TryFrom<InvoiceDto> for ExternalOrder {
    type Error = String;

    fn try_from(dto: InvoiceDto) -> Result<Self, Self::Error> {
        let total = money(&dto.total_amt)?;
        let balance = money(&dto.balance)?;
        let tax = match dto.txn_tax_detail.as_ref().and_then(|t| t.total_tax.as_ref()) {
            Some(t) => money(t)?,
            None => Money::zero(),
        };

        let mut lines = Vec::new();
        for line in dto.line {
            // Subtotal, discount and group lines carry no item.
            if line.detail_type != "SalesItemLineDetail" {
                continue;
            }
            let detail = line.sales_item_line_detail;
            let qty = match detail.as_ref().and_then(|d| d.qty.as_ref()) {
                Some(q) => quantity(q)?,
                None => Quantity::from_units(1),
            };
            let unit_price = match detail.as_ref().and_then(|d| d.unit_price.as_ref()) {
                Some(p) => money(p)?,
                None => line.amount.as_ref().map(money).transpose()?.unwrap_or_default(),
            };
            let item_ref = detail.and_then(|d| d.item_ref);
            lines.push(ExternalLine {
                item_external_id: item_ref.as_ref().map(|r| r.value.clone()),
                sku: String::new(),
                description: line
                    .description
                    .or_else(|| item_ref.and_then(|r| r.name))
                    .unwrap_or_default(),
                quantity: qty,
                unit_price,
            });
        }

        Ok(ExternalOrder {
            order_number: dto.doc_number.unwrap_or_else(|| dto.id.clone()),
            external_id: dto.id,
            customer_external_id: dto.customer_ref.map(|r| r.value),
            created_at: dto.txn_date.and_then(midnight),
            due_date: dto.due_date.and_then(midnight),
            tax,
            total,
            amount_paid: total - balance,
            sync_token: dto.sync_token,
            lines,
        })
    }
}

fn convert<N, T>(node: Value) -> Result<T, Rejected>
where
    N: serde::de::DeserializeOwned,
    T: TryFrom<N, Error = String>,
{
    let external_id = node.get("Id").and_then(Value::as_str).map(str::to_string);
    let decoded: N = decode_node(node, "Id")?;
    T::try_from(decoded).map_err(|reason| Rejected {
        external_id,
        reason,
    })
}

// =============================================================================
// Source
// =============================================================================

/// QuickBooks Online accounting.
#[derive(Debug, Clone)]
pub struct QuickBooksSource {
    http: HttpClient,
    api_base_url: String,
    token_url: String,
    minor_version: u32,
    client_id: String,
    client_secret: String,
}

impl QuickBooksSource {
    pub fn new(settings: &QuickBooksSettings, timeout: Duration) -> SyncResult<Self> {
        Ok(QuickBooksSource {
            http: HttpClient::new(Source::QuickBooks, timeout)?,
            api_base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            token_url: settings.token_url.clone(),
            minor_version: settings.minor_version,
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
        })
    }

    fn company_url(&self, realm: &str, path: &str) -> String {
        format!("{}/v3/company/{realm}/{path}", self.api_base_url)
    }

    fn table_for(entity: EntityKind) -> &'static str {
        match entity {
            EntityKind::Inventory => "Item",
            EntityKind::Customer => "Customer",
            EntityKind::Order => "Invoice",
        }
    }

    /// The query text for one page.
    pub fn page_query(entity: EntityKind, request: &PageRequest) -> String {
        format!(
            "SELECT * FROM {} STARTPOSITION {} MAXRESULTS {}",
            Self::table_for(entity),
            request.offset,
            request.size
        )
    }

    /// Turns a `Fault` body into an error. `external_id` names the record
    /// for stale-token faults.
    fn check_fault(body: &Value, external_id: Option<&str>) -> SyncResult<()> {
        let Some(fault) = body.get("Fault").or_else(|| body.get("fault")) else {
            return Ok(());
        };
        let errors = fault
            .get("Error")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let stale = errors
            .iter()
            .any(|e| e.get("code").and_then(Value::as_str) == Some(STALE_OBJECT_CODE));
        if stale {
            return Err(SyncError::ModifiedElsewhere {
                remote: Source::QuickBooks,
                external_id: external_id.unwrap_or_default().to_string(),
            });
        }

        let message = errors
            .iter()
            .map(|e| {
                let msg = e.get("Message").and_then(Value::as_str).unwrap_or("Fault");
                match e.get("Detail").and_then(Value::as_str) {
                    Some(detail) => format!("{msg}: {detail}"),
                    None => msg.to_string(),
                }
            })
            .collect::<Vec<_>>()
            .join("; ");
        Err(SyncError::RemoteRejected {
            remote: Source::QuickBooks,
            message: if message.is_empty() {
                "Fault".to_string()
            } else {
                message
            },
        })
    }

    async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        credentials: &Credentials,
    ) -> SyncResult<Value> {
        let builder = self
            .auth_header(credentials)
            .apply(self.http.get(url))
            .header("Accept", "application/json")
            .query(query);
        let response = self.http.send(builder).await?;
        let status = response.status();
        let body = self.http.json_body(response).await?;
        Self::check_fault(&body, None)?;
        if !status.is_success() {
            return Err(SyncError::RemoteRejected {
                remote: Source::QuickBooks,
                message: format!("HTTP {}", status.as_u16()),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl ExternalSource for QuickBooksSource {
    fn source(&self) -> Source {
        Source::QuickBooks
    }

    fn pagination(&self) -> Pagination {
        Pagination::Offset { first: 1 }
    }

    fn supports(&self, _entity: EntityKind) -> bool {
        true
    }

    fn auth_header(&self, credentials: &Credentials) -> AuthHeader {
        AuthHeader::Bearer(credentials.access_token.clone())
    }

    async fn fetch_page(
        &self,
        entity: EntityKind,
        request: &PageRequest,
        credentials: &Credentials,
    ) -> SyncResult<Page> {
        let query = Self::page_query(entity, request);
        debug!(entity = %entity, page = request.page, query = %query, "Fetching QuickBooks page");

        let url = self.company_url(&credentials.account_id, "query");
        let body = self
            .get_json(
                &url,
                &[("query", query), ("minorversion", self.minor_version.to_string())],
                credentials,
            )
            .await?;

        let response = body
            .get("QueryResponse")
            .and_then(Value::as_object)
            .ok_or_else(|| SyncError::MalformedResponse("missing QueryResponse".into()))?;

        // An empty result set omits the entity array entirely.
        let rows = match response.get(Self::table_for(entity)) {
            None => Vec::new(),
            Some(Value::Array(rows)) => rows.clone(),
            Some(_) => {
                return Err(SyncError::MalformedResponse(format!(
                    "QueryResponse.{} is not an array",
                    Self::table_for(entity)
                )))
            }
        };

        let mut page = Page::default();
        for row in rows {
            let decoded = match entity {
                EntityKind::Inventory => {
                    convert::<ItemDto, ExternalItem>(row).map(ExternalRecord::Item)
                }
                EntityKind::Customer => {
                    convert::<CustomerDto, ExternalCustomer>(row).map(ExternalRecord::Customer)
                }
                EntityKind::Order => {
                    convert::<InvoiceDto, ExternalOrder>(row).map(ExternalRecord::Order)
                }
            };
            match decoded {
                Ok(record) => page.records.push(record),
                Err(rejected) => page.rejected.push(rejected),
            }
        }
        Ok(page)
    }

    async fn refresh(&self, credentials: &Credentials) -> SyncResult<Credentials> {
        debug!(realm = %credentials.account_id, "Refreshing QuickBooks access token");
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", credentials.refresh_token.as_str()),
        ];
        let builder = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("Accept", "application/json")
            .form(&params);

        let response = match self.http.send(builder).await {
            Err(SyncError::Unauthorized(_)) => {
                return Err(SyncError::ReconnectRequired {
                    remote: Source::QuickBooks,
                    reason: "client credentials rejected".to_string(),
                })
            }
            other => other?,
        };
        let status = response.status();
        let body = self.http.json_body(response).await?;

        if let Some(error) = body.get("error").and_then(Value::as_str) {
            warn!(status = status.as_u16(), error = %error, "QuickBooks refresh rejected");
            return Err(SyncError::ReconnectRequired {
                remote: Source::QuickBooks,
                reason: error.to_string(),
            });
        }
        if !status.is_success() {
            return Err(SyncError::ReconnectRequired {
                remote: Source::QuickBooks,
                reason: format!("token endpoint returned HTTP {}", status.as_u16()),
            });
        }

        let token: TokenResponse = serde_json::from_value(body)?;
        info!(expires_in_secs = token.expires_in, "QuickBooks token refreshed");

        // The refresh token rotates; the old one stops working once this
        // response has been issued.
        Ok(Credentials {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: expiry_after(token.expires_in)?,
            account_id: credentials.account_id.clone(),
        })
    }

    async fn push_inventory(
        &self,
        record: &InventoryRecord,
        credentials: &Credentials,
    ) -> SyncResult<PushReceipt> {
        let item_id = record
            .quickbooks_item_id
            .as_deref()
            .ok_or(SyncError::NotLinked {
                remote: Source::QuickBooks,
                id: record.id,
            })?;
        let minor = [("minorversion", self.minor_version.to_string())];

        // Read the current version token straight before the write.
        let current = self
            .get_json(
                &self.company_url(&credentials.account_id, &format!("item/{item_id}")),
                &minor,
                credentials,
            )
            .await?;
        let item = current
            .get("Item")
            .ok_or_else(|| SyncError::MalformedResponse("missing Item".into()))?;
        let sync_token = item
            .get("SyncToken")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::MalformedResponse("missing Item.SyncToken".into()))?
            .to_string();
        let tracks_quantity = item
            .get("TrackQtyOnHand")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut update = Map::new();
        update.insert("Id".into(), json!(item_id));
        update.insert("SyncToken".into(), json!(sync_token));
        update.insert("sparse".into(), json!(true));
        update.insert("Name".into(), json!(record.name));
        update.insert("Sku".into(), json!(record.sku));
        update.insert("Description".into(), json!(record.description));
        if let Some(price) = record.price().value {
            update.insert("UnitPrice".into(), amount_json(price)?);
        }
        if tracks_quantity {
            update.insert(
                "QtyOnHand".into(),
                record
                    .quantity_on_hand
                    .to_string()
                    .parse::<Value>()
                    .map_err(|e| SyncError::Internal(format!("quantity encoding: {e}")))?,
            );
        }

        debug!(item_id = %item_id, sync_token = %sync_token, "Pushing QuickBooks item");
        let builder = self
            .auth_header(credentials)
            .apply(self.http.post(&self.company_url(&credentials.account_id, "item")))
            .header("Accept", "application/json")
            .query(&minor)
            .json(&Value::Object(update));
        let response = self.http.send(builder).await?;
        let status = response.status();
        let body = self.http.json_body(response).await?;
        Self::check_fault(&body, Some(item_id))?;
        if !status.is_success() {
            return Err(SyncError::RemoteRejected {
                remote: Source::QuickBooks,
                message: format!("HTTP {}", status.as_u16()),
            });
        }

        let new_token = body
            .pointer("/Item/SyncToken")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(PushReceipt {
            external_id: item_id.to_string(),
            sync_token: new_token,
        })
    }
}
