//! Shopify client against a mock Admin API.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wms_core::{Credentials, EntityKind, Money, Quantity, Source};
use wms_sync::{
    ExternalRecord, ExternalSource, PageRequest, Pagination, ShopifySettings, ShopifySource,
    SyncError,
};

const GRAPHQL: &str = "/admin/api/2024-10/graphql.json";

// =============================================================================
// Test Helpers
// =============================================================================

fn source(server: &MockServer) -> ShopifySource {
    let settings = ShopifySettings {
        enabled: true,
        shop_domain: "example.myshopify.com".into(),
        api_version: "2024-10".into(),
        client_id: "client".into(),
        client_secret: "secret".into(),
        base_url: Some(server.uri()),
    };
    ShopifySource::new(&settings, Duration::from_secs(5)).unwrap()
}

fn creds() -> Credentials {
    Credentials {
        access_token: "shpat_1".into(),
        refresh_token: "refresh_1".into(),
        expires_at: Utc::now() + ChronoDuration::hours(1),
        account_id: "example.myshopify.com".into(),
    }
}

fn product(id: u32, sku: &str, price: &str, quantity: i64) -> Value {
    json!({
        "node": {
            "id": format!("gid://shopify/Product/{id}"),
            "title": format!("Product {id}"),
            "description": "",
            "updatedAt": "2024-05-01T10:00:00Z",
            "variants": { "edges": [{ "node": {
                "sku": sku,
                "barcode": "0123456789",
                "price": price,
                "inventoryQuantity": quantity
            }}]}
        }
    })
}

fn products_body(edges: Vec<Value>, has_next: bool, cursor: Option<&str>) -> Value {
    json!({
        "data": { "products": {
            "pageInfo": { "hasNextPage": has_next, "endCursor": cursor },
            "edges": edges
        }}
    })
}

fn first_page() -> PageRequest {
    PageRequest::first(Pagination::Cursor, 50)
}

// =============================================================================
// Paging
// =============================================================================

#[tokio::test]
async fn test_fetch_products_page() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GRAPHQL))
        .and(header("X-Shopify-Access-Token", "shpat_1"))
        .and(body_partial_json(json!({ "variables": { "first": 50, "after": null } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(products_body(
            vec![product(1, "ABC", "19.99", 7), product(2, "DEF", "abc", 1)],
            true,
            Some("cursor-1"),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let page = source(&server)
        .fetch_page(EntityKind::Inventory, &first_page(), &creds())
        .await
        .unwrap();

    assert_eq!(page.next_cursor.as_deref(), Some("cursor-1"));
    assert_eq!(page.has_more, Some(true));
    assert_eq!(page.records.len(), 1);
    match &page.records[0] {
        ExternalRecord::Item(item) => {
            assert_eq!(item.external_id, "gid://shopify/Product/1");
            assert_eq!(item.sku, "ABC");
            assert_eq!(item.barcode.as_deref(), Some("0123456789"));
            assert_eq!(item.price, Some(Money::from_cents(1999)));
            assert_eq!(item.quantity, Some(Quantity::from_units(7)));
            assert_eq!(item.cost, None);
            assert_eq!(
                item.updated_at,
                Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
            );
        }
        other => panic!("expected an item, got {other:?}"),
    }
    // The bad price rejects one product, not the page.
    assert_eq!(page.rejected.len(), 1);
    assert_eq!(page.rejected[0].external_id.as_deref(), Some("gid://shopify/Product/2"));
}

#[tokio::test]
async fn test_next_page_sends_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GRAPHQL))
        .and(body_partial_json(json!({ "variables": { "after": "cursor-1" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(products_body(
            vec![product(3, "GHI", "5.00", 0)],
            false,
            Some("cursor-2"),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let request = PageRequest {
        page: 2,
        cursor: Some("cursor-1".into()),
        ..first_page()
    };
    let page = source(&server)
        .fetch_page(EntityKind::Inventory, &request, &creds())
        .await
        .unwrap();
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.has_more, Some(false));
}

#[tokio::test]
async fn test_fetch_orders_page() {
    let server = MockServer::start().await;
    let body = json!({
        "data": { "orders": {
            "pageInfo": { "hasNextPage": false, "endCursor": null },
            "edges": [{ "node": {
                "id": "gid://shopify/Order/10",
                "name": "#1001",
                "createdAt": "2024-05-02T08:30:00Z",
                "customer": { "id": "gid://shopify/Customer/5" },
                "totalPriceSet": { "shopMoney": { "amount": "110.00" } },
                "totalTaxSet": { "shopMoney": { "amount": "10.00" } },
                "totalOutstandingSet": { "shopMoney": { "amount": "40.00" } },
                "lineItems": { "edges": [{ "node": {
                    "sku": "ABC",
                    "title": "Widget",
                    "quantity": 2,
                    "originalUnitPriceSet": { "shopMoney": { "amount": "50.00" } },
                    "variant": { "product": { "id": "gid://shopify/Product/1" } }
                }}]}
            }}]
        }}
    });
    Mock::given(method("POST"))
        .and(path(GRAPHQL))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let page = source(&server)
        .fetch_page(EntityKind::Order, &first_page(), &creds())
        .await
        .unwrap();
    let ExternalRecord::Order(order) = &page.records[0] else {
        panic!("expected an order");
    };
    assert_eq!(order.order_number, "#1001");
    assert_eq!(order.customer_external_id.as_deref(), Some("gid://shopify/Customer/5"));
    assert_eq!(order.total, Money::from_cents(11_000));
    assert_eq!(order.tax, Money::from_cents(1_000));
    assert_eq!(order.amount_paid, Money::from_cents(7_000));
    assert_eq!(order.lines.len(), 1);
    assert_eq!(order.lines[0].item_external_id.as_deref(), Some("gid://shopify/Product/1"));
    assert_eq!(order.lines[0].quantity, Quantity::from_units(2));
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_errors_array_fails_even_with_data() {
    let server = MockServer::start().await;
    let mut body = products_body(vec![product(1, "ABC", "1.00", 1)], false, None);
    body["errors"] = json!([{ "message": "Field 'foo' doesn't exist" }]);
    Mock::given(method("POST"))
        .and(path(GRAPHQL))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let err = source(&server)
        .fetch_page(EntityKind::Inventory, &first_page(), &creds())
        .await
        .unwrap_err();
    match err {
        SyncError::RemoteRejected { remote, message } => {
            assert_eq!(remote, Source::Shopify);
            assert_eq!(message, "Field 'foo' doesn't exist");
        }
        other => panic!("expected RemoteRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_throttled_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GRAPHQL))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{ "message": "Throttled", "extensions": { "code": "THROTTLED" } }]
        })))
        .mount(&server)
        .await;

    let err = source(&server)
        .fetch_page(EntityKind::Inventory, &first_page(), &creds())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::RateLimited { remote: Source::Shopify }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_missing_connection_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GRAPHQL))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
        .mount(&server)
        .await;

    let err = source(&server)
        .fetch_page(EntityKind::Customer, &first_page(), &creds())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_status_codes_map_to_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GRAPHQL))
        .and(header("X-Shopify-Access-Token", "revoked"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GRAPHQL))
        .and(header("X-Shopify-Access-Token", "shpat_1"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&server)
        .await;

    let shopify = source(&server);
    let revoked = Credentials {
        access_token: "revoked".into(),
        ..creds()
    };
    let err = shopify
        .fetch_page(EntityKind::Inventory, &first_page(), &revoked)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Unauthorized(Source::Shopify)));

    let err = shopify
        .fetch_page(EntityKind::Inventory, &first_page(), &creds())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ServerError { status: 502, .. }));
}

// =============================================================================
// Token Refresh
// =============================================================================

#[tokio::test]
async fn test_refresh_without_expiry_gets_long_lifetime() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/oauth/access_token"))
        .and(body_partial_json(json!({
            "grant_type": "refresh_token",
            "refresh_token": "refresh_1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "shpat_2",
            "scope": "read_products"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refreshed = source(&server).refresh(&creds()).await.unwrap();
    assert_eq!(refreshed.access_token, "shpat_2");
    // No rotated refresh token: keep the old one.
    assert_eq!(refreshed.refresh_token, "refresh_1");
    assert!(refreshed.expires_at > Utc::now() + ChronoDuration::days(300));
    assert_eq!(refreshed.account_id, "example.myshopify.com");
}

#[tokio::test]
async fn test_out_of_range_expiry_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "shpat_2",
            "expires_in": i64::MAX
        })))
        .mount(&server)
        .await;

    let shopify = source(&server);
    let refresh = tokio::spawn(async move { shopify.refresh(&creds()).await });
    let err = refresh.await.expect("refresh task panicked").unwrap_err();
    assert!(matches!(err, SyncError::MalformedResponse(ref m) if m == "token expiry out of range"));
}

#[tokio::test]
async fn test_html_client_error_is_a_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GRAPHQL))
        .respond_with(ResponseTemplate::new(404).set_body_string("<!DOCTYPE html><p>Not Found</p>"))
        .mount(&server)
        .await;

    let err = source(&server)
        .fetch_page(EntityKind::Inventory, &first_page(), &creds())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::RemoteRejected { remote: Source::Shopify, ref message } if message == "HTTP 404"
    ));
}

#[tokio::test]
async fn test_rejected_refresh_requires_reconnect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/oauth/access_token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })),
        )
        .mount(&server)
        .await;

    let err = source(&server).refresh(&creds()).await.unwrap_err();
    match err {
        SyncError::ReconnectRequired { remote, reason } => {
            assert_eq!(remote, Source::Shopify);
            assert_eq!(reason, "invalid_grant");
        }
        other => panic!("expected ReconnectRequired, got {other:?}"),
    }
}

#[tokio::test]
async fn test_source_capabilities() {
    let server = MockServer::start().await;
    let shopify = source(&server);
    assert_eq!(shopify.pagination(), Pagination::Cursor);
    assert!(shopify.supports(EntityKind::Order));
    assert_eq!(shopify.max_page_size(), 250);
}
