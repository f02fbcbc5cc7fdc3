//! # Shopify Source
//!
//! Admin GraphQL API. Every request is a POST to
//! `https://{shop}/admin/api/{version}/graphql.json`.
//!
//! ## Failure Modes
//! ```text
//! ┌────────────────────────────────┬────────────────────────────────────────┐
//! │ Response                       │ Outcome                                │
//! ├────────────────────────────────┼────────────────────────────────────────┤
//! │ 200 + data                     │ Page                                   │
//! │ 200 + errors[code=THROTTLED]   │ RateLimited (transient)                │
//! │ 200 + errors[...]              │ RemoteRejected                         │
//! │ 200 + no data                  │ MalformedResponse                      │
//! │ 401                            │ Unauthorized (forced refresh + retry)  │
//! │ 429 / 5xx                      │ RateLimited / ServerError (transient)  │
//! └────────────────────────────────┴────────────────────────────────────────┘
//! ```
//!
//! An `errors` array in an HTTP 200 body is always a failure, even when
//! `data` is present as well.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};
use wms_core::{Credentials, EntityKind, Money, Quantity, Source};

use super::{
    decode_node, expiry_after, parse_money, AuthHeader, ExternalCustomer, ExternalItem,
    ExternalLine, ExternalOrder, ExternalRecord, ExternalSource, HttpClient, Page, PageRequest,
    Pagination, Rejected,
};
use crate::config::ShopifySettings;
use crate::error::{SyncError, SyncResult};

/// GraphQL `first:` upper bound.
const MAX_FIRST: u32 = 250;

/// Line items fetched per order.
const LINES_PER_ORDER: u32 = 100;

const PRODUCTS_QUERY: &str = r#"
query Products($first: Int!, $after: String) {
  products(first: $first, after: $after, sortKey: ID) {
    pageInfo { hasNextPage endCursor }
    edges { node {
      id title description updatedAt
      variants(first: 1) { edges { node {
        sku barcode price inventoryQuantity
      } } }
    } }
  }
}"#;

const CUSTOMERS_QUERY: &str = r#"
query Customers($first: Int!, $after: String) {
  customers(first: $first, after: $after, sortKey: ID) {
    pageInfo { hasNextPage endCursor }
    edges { node {
      id displayName email phone
      defaultAddress { company }
    } }
  }
}"#;

const ORDERS_QUERY: &str = r#"
query Orders($first: Int!, $after: String, $lines: Int!) {
  orders(first: $first, after: $after, sortKey: ID) {
    pageInfo { hasNextPage endCursor }
    edges { node {
      id name createdAt
      customer { id }
      totalPriceSet { shopMoney { amount } }
      totalTaxSet { shopMoney { amount } }
      totalOutstandingSet { shopMoney { amount } }
      lineItems(first: $lines) { edges { node {
        sku title quantity
        originalUnitPriceSet { shopMoney { amount } }
        variant { product { id } }
      } } }
    } }
  }
}"#;

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct Connection<T> {
    #[serde(default = "Vec::new")]
    edges: Vec<Edge<T>>,
}

#[derive(Debug, Deserialize)]
struct Edge<T> {
    node: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProductNode {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "updatedAt")]
    updated_at: Option<DateTime<Utc>>,
    variants: Connection<VariantNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariantNode {
    sku: Option<String>,
    barcode: Option<String>,
    price: Option<String>,
    inventory_quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerNode {
    id: String,
    display_name: String,
    email: Option<String>,
    phone: Option<String>,
    default_address: Option<AddressNode>,
}

#[derive(Debug, Deserialize)]
struct AddressNode {
    company: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderNode {
    id: String,
    name: String,
    created_at: Option<DateTime<Utc>>,
    customer: Option<IdNode>,
    total_price_set: MoneyBag,
    total_tax_set: Option<MoneyBag>,
    total_outstanding_set: MoneyBag,
    line_items: Connection<LineNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineNode {
    sku: Option<String>,
    title: String,
    quantity: i64,
    original_unit_price_set: MoneyBag,
    variant: Option<VariantRef>,
}

#[derive(Debug, Deserialize)]
struct VariantRef {
    product: Option<IdNode>,
}

#[derive(Debug, Deserialize)]
struct IdNode {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoneyBag {
    shop_money: MoneyV2,
}

#[derive(Debug, Deserialize)]
struct MoneyV2 {
    amount: String,
}

impl MoneyBag {
    fn money(&self) -> Result<Money, String> {
        parse_money(&self.shop_money.amount)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

// =============================================================================
// Conversions
// =============================================================================

impl TryFrom<ProductNode> for ExternalItem {
    type Error = String;

    fn try_from(node: ProductNode) -> Result<Self, Self::Error> {
        let variant = node.variants.edges.into_iter().next().map(|e| e.node);
        let (sku, barcode, price, quantity) = match variant {
            Some(v) => (
                v.sku.unwrap_or_default(),
                v.barcode,
                v.price.as_deref().map(parse_money).transpose()?,
                v.inventory_quantity.map(Quantity::from_units),
            ),
            None => (String::new(), None, None, None),
        };

        Ok(ExternalItem {
            external_id: node.id,
            sku,
            name: node.title,
            description: node.description,
            barcode,
            quantity,
            price,
            cost: None,
            sync_token: None,
            updated_at: node.updated_at,
        })
    }
}

impl From<CustomerNode> for ExternalCustomer {
    fn from(node: CustomerNode) -> Self {
        ExternalCustomer {
            external_id: node.id,
            display_name: node.display_name,
            email: node.email,
            phone: node.phone,
            company: node.default_address.and_then(|a| a.company),
            balance: None,
            sync_token: None,
        }
    }
}

impl TryFrom<OrderNode> for ExternalOrder {
    type Error = String;

    fn try_from(node: OrderNode) -> Result<Self, Self::Error> {
        let total = node.total_price_set.money()?;
        let outstanding = node.total_outstanding_set.money()?;
        let tax = match &node.total_tax_set {
            Some(bag) => bag.money()?,
            None => Money::zero(),
        };

        let lines = node
            .line_items
            .edges
            .into_iter()
            .map(|edge| {
                let line = edge.node;
                Ok(ExternalLine {
                    item_external_id: line.variant.and_then(|v| v.product).map(|p| p.id),
                    sku: line.sku.unwrap_or_default(),
                    description: line.title,
                    quantity: Quantity::from_units(line.quantity),
                    unit_price: line.original_unit_price_set.money()?,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;

        Ok(ExternalOrder {
            external_id: node.id,
            order_number: node.name,
            customer_external_id: node.customer.map(|c| c.id),
            created_at: node.created_at,
            due_date: None,
            tax,
            total,
            amount_paid: total - outstanding,
            sync_token: None,
            lines,
        })
    }
}

/// Decodes a node and converts it, turning either failure into a rejection.
fn convert<N, T>(node: Value) -> Result<T, Rejected>
where
    N: serde::de::DeserializeOwned,
    T: TryFrom<N, Error = String>,
{
    let external_id = node.get("id").and_then(|v| v.as_str()).map(str::to_string);
    let decoded: N = decode_node(node, "id")?;
    T::try_from(decoded).map_err(|reason| Rejected {
        external_id,
        reason,
    })
}

// =============================================================================
// Source
// =============================================================================

/// Shopify storefront.
#[derive(Debug, Clone)]
pub struct ShopifySource {
    http: HttpClient,
    graphql_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl ShopifySource {
    pub fn new(settings: &ShopifySettings, timeout: Duration) -> SyncResult<Self> {
        let base = settings.endpoint_base();
        Ok(ShopifySource {
            http: HttpClient::new(Source::Shopify, timeout)?,
            graphql_url: format!("{base}/admin/api/{}/graphql.json", settings.api_version),
            token_url: format!("{base}/admin/oauth/access_token"),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
        })
    }

    fn query_for(entity: EntityKind) -> (&'static str, &'static str) {
        match entity {
            EntityKind::Inventory => ("products", PRODUCTS_QUERY),
            EntityKind::Customer => ("customers", CUSTOMERS_QUERY),
            EntityKind::Order => ("orders", ORDERS_QUERY),
        }
    }

    /// Fails on an `errors` array, whatever else the body holds.
    fn check_errors(body: &Value) -> SyncResult<()> {
        let Some(errors) = body.get("errors").and_then(Value::as_array) else {
            return Ok(());
        };
        if errors.is_empty() {
            return Ok(());
        }

        let throttled = errors.iter().any(|e| {
            e.pointer("/extensions/code").and_then(Value::as_str) == Some("THROTTLED")
        });
        if throttled {
            return Err(SyncError::RateLimited {
                remote: Source::Shopify,
            });
        }

        let message = errors
            .iter()
            .filter_map(|e| e.get("message").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("; ");
        Err(SyncError::RemoteRejected {
            remote: Source::Shopify,
            message: if message.is_empty() {
                "GraphQL error".to_string()
            } else {
                message
            },
        })
    }
}

#[async_trait]
impl ExternalSource for ShopifySource {
    fn source(&self) -> Source {
        Source::Shopify
    }

    fn pagination(&self) -> Pagination {
        Pagination::Cursor
    }

    fn supports(&self, _entity: EntityKind) -> bool {
        true
    }

    fn max_page_size(&self) -> u32 {
        MAX_FIRST
    }

    fn auth_header(&self, credentials: &Credentials) -> AuthHeader {
        AuthHeader::Custom {
            name: "X-Shopify-Access-Token",
            value: credentials.access_token.clone(),
        }
    }

    async fn fetch_page(
        &self,
        entity: EntityKind,
        request: &PageRequest,
        credentials: &Credentials,
    ) -> SyncResult<Page> {
        let (root, query) = Self::query_for(entity);
        let variables = json!({
            "first": request.size.min(MAX_FIRST),
            "after": request.cursor,
            "lines": LINES_PER_ORDER,
        });
        debug!(entity = %entity, page = request.page, cursor = ?request.cursor, "Fetching Shopify page");

        let builder = self
            .auth_header(credentials)
            .apply(self.http.post(&self.graphql_url))
            .json(&json!({ "query": query, "variables": variables }));
        let response = self.http.send(builder).await?;
        let status = response.status();
        let body = self.http.json_body(response).await?;

        Self::check_errors(&body)?;
        if !status.is_success() {
            return Err(SyncError::RemoteRejected {
                remote: Source::Shopify,
                message: format!("HTTP {}", status.as_u16()),
            });
        }

        let connection = body
            .pointer(&format!("/data/{root}"))
            .ok_or_else(|| SyncError::MalformedResponse(format!("missing data.{root}")))?;
        let page_info: PageInfo = connection
            .get("pageInfo")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| SyncError::MalformedResponse(format!("missing {root}.pageInfo")))?;
        let edges = connection
            .get("edges")
            .and_then(Value::as_array)
            .ok_or_else(|| SyncError::MalformedResponse(format!("missing {root}.edges")))?;

        let mut page = Page {
            next_cursor: page_info.end_cursor,
            has_more: Some(page_info.has_next_page),
            ..Page::default()
        };
        for edge in edges {
            let Some(node) = edge.get("node").cloned() else {
                page.rejected.push(Rejected {
                    external_id: None,
                    reason: "edge without node".to_string(),
                });
                continue;
            };
            let decoded = match entity {
                EntityKind::Inventory => {
                    convert::<ProductNode, ExternalItem>(node).map(ExternalRecord::Item)
                }
                EntityKind::Customer => decode_node::<CustomerNode>(node, "id")
                    .map(|c| ExternalRecord::Customer(c.into())),
                EntityKind::Order => {
                    convert::<OrderNode, ExternalOrder>(node).map(ExternalRecord::Order)
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
        debug!("Refreshing Shopify access token");
        let builder = self.http.post(&self.token_url).json(&json!({
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "grant_type": "refresh_token",
            "refresh_token": credentials.refresh_token,
        }));

        let response = match self.http.send(builder).await {
            Err(SyncError::Unauthorized(_)) => {
                return Err(SyncError::ReconnectRequired {
                    remote: Source::Shopify,
                    reason: "refresh token rejected".to_string(),
                })
            }
            other => other?,
        };
        let status = response.status();
        let body = self.http.json_body(response).await?;

        if !status.is_success() || body.get("error").is_some() {
            let reason = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("token request rejected")
                .to_string();
            warn!(status = status.as_u16(), reason = %reason, "Shopify refresh rejected");
            return Err(SyncError::ReconnectRequired {
                remote: Source::Shopify,
                reason,
            });
        }

        let token: TokenResponse = serde_json::from_value(body)?;
        // Offline tokens carry no expiry; treat them as valid for a year.
        let expires_in = token.expires_in.unwrap_or(365 * 24 * 3600);
        info!(expires_in_secs = expires_in, "Shopify token refreshed");

        Ok(Credentials {
            access_token: token.access_token,
            refresh_token: token
                .refresh_token
                .unwrap_or_else(|| credentials.refresh_token.clone()),
            expires_at: expiry_after(expires_in)?,
            account_id: credentials.account_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttled_errors_are_transient() {
        let body = json!({
            "errors": [{ "message": "Throttled", "extensions": { "code": "THROTTLED" } }]
        });
        let err = ShopifySource::check_errors(&body).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_embedded_errors_fail_even_with_data() {
        let body = json!({
            "data": { "products": { "edges": [] } },
            "errors": [{ "message": "Field 'foo' doesn't exist" }]
        });
        let err = ShopifySource::check_errors(&body).unwrap_err();
        assert!(matches!(err, SyncError::RemoteRejected { .. }));
        assert!(err.to_string().contains("foo"));
    }

    #[test]
    fn test_order_amount_paid_from_outstanding() {
        let node: OrderNode = serde_json::from_value(json!({
            "id": "gid://shopify/Order/1",
            "name": "#1001",
            "createdAt": "2024-05-01T10:00:00Z",
            "customer": { "id": "gid://shopify/Customer/9" },
            "totalPriceSet": { "shopMoney": { "amount": "50.00" } },
            "totalTaxSet": { "shopMoney": { "amount": "4.00" } },
            "totalOutstandingSet": { "shopMoney": { "amount": "20.00" } },
            "lineItems": { "edges": [{ "node": {
                "sku": "ABC", "title": "Widget", "quantity": 2,
                "originalUnitPriceSet": { "shopMoney": { "amount": "23.00" } },
                "variant": { "product": { "id": "gid://shopify/Product/5" } }
            } }] }
        }))
        .unwrap();

        let order = ExternalOrder::try_from(node).unwrap();
        assert_eq!(order.total, Money::from_cents(5000));
        assert_eq!(order.amount_paid, Money::from_cents(3000));
        assert_eq!(order.customer_external_id.as_deref(), Some("gid://shopify/Customer/9"));
        assert_eq!(order.lines[0].item_external_id.as_deref(), Some("gid://shopify/Product/5"));
    }

    #[test]
    fn test_bad_price_rejects_only_that_product() {
        let node = json!({
            "id": "gid://shopify/Product/3",
            "title": "Broken",
            "variants": { "edges": [{ "node": { "sku": "X", "price": "twelve" } }] }
        });
        let rejected = convert::<ProductNode, ExternalItem>(node).unwrap_err();
        assert_eq!(rejected.external_id.as_deref(), Some("gid://shopify/Product/3"));
    }
}
