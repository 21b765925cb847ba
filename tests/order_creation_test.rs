//! Integration tests for cart validation and order creation.
//!
//! Covers the authoritative re-validation of cart lines, price snapshotting,
//! delivery-fee capture, and the all-or-nothing persistence guarantee.

mod common;

use axum::http::Method;
use common::{response_json, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::{json, Value};
use std::str::FromStr;
use storefront_api::entities::{order, order_item};
use uuid::Uuid;

fn decimal_field(value: &Value, field: &str) -> Decimal {
    let raw = value[field]
        .as_str()
        .unwrap_or_else(|| panic!("{field} should be a decimal string"));
    Decimal::from_str(raw).unwrap_or_else(|_| panic!("{field} should parse as decimal"))
}

fn order_payload(items: Value, payment_method: &str) -> Value {
    json!({
        "items": items,
        "delivery_method": "courier",
        "delivery_address": "12 Main Street",
        "customer_name": "Integration Test",
        "customer_phone": "+15550000001",
        "payment_method": payment_method,
    })
}

#[tokio::test]
async fn order_total_is_items_plus_delivery_fee() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("Plain pizza", dec!(1000), None, true, true)
        .await;

    // 2 x 1000 + courier fee 500 = 2500
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(
                json!([{"product_id": product.id, "quantity": 2}]),
                "cash",
            )),
        )
        .await;
    assert_eq!(response.status(), 201);

    let body = response_json(response).await;
    assert_eq!(decimal_field(&body, "total_amount"), dec!(2500));
    assert_eq!(decimal_field(&body, "delivery_fee"), dec!(500));
    assert_eq!(body["status"], "pending");
    assert_eq!(body["payment_status"], "pending");
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(decimal_field(&body["items"][0], "unit_price"), dec!(1000));
}

#[tokio::test]
async fn sale_price_is_snapshotted_when_present() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("Discounted", dec!(1000), Some(dec!(800)), true, true)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(
                json!([{"product_id": product.id, "quantity": 1}]),
                "cash",
            )),
        )
        .await;
    assert_eq!(response.status(), 201);

    let body = response_json(response).await;
    assert_eq!(decimal_field(&body["items"][0], "unit_price"), dec!(800));
    assert_eq!(decimal_field(&body, "total_amount"), dec!(1300));
}

#[tokio::test]
async fn unknown_product_persists_nothing() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("Real product", dec!(1000), None, true, true)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(
                json!([
                    {"product_id": product.id, "quantity": 1},
                    {"product_id": Uuid::new_v4(), "quantity": 1},
                ]),
                "cash",
            )),
        )
        .await;
    assert_eq!(response.status(), 422);

    // No partial orders: zero rows persisted for the attempt.
    let orders = order::Entity::find().all(&*app.state.db).await.unwrap();
    assert!(orders.is_empty());
    let items = order_item::Entity::find().all(&*app.state.db).await.unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn unpublished_product_rejects_creation() {
    let app = TestApp::new().await;
    let hidden = app
        .seed_product("Unpublished", dec!(700), None, true, false)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(
                json!([{"product_id": hidden.id, "quantity": 1}]),
                "cash",
            )),
        )
        .await;
    assert_eq!(response.status(), 422);

    let body = response_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains(&hidden.id.to_string()));
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(json!([]), "cash")),
        )
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn later_price_edit_does_not_alter_existing_order() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("Volatile price", dec!(1000), None, true, true)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(
                json!([{"product_id": product.id, "quantity": 2}]),
                "cash",
            )),
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    let order_id = body["id"].as_str().unwrap().to_string();

    // The catalog system raises the price afterwards.
    use sea_orm::{ActiveModelTrait, Set};
    let mut edit: storefront_api::entities::product::ActiveModel = product.into();
    edit.price = Set(dec!(9999));
    edit.update(&*app.state.db).await.unwrap();

    let response = app
        .request(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;

    // Captured at purchase time, never re-read from the live product.
    assert_eq!(decimal_field(&body, "total_amount"), dec!(2500));
    assert_eq!(decimal_field(&body["items"][0], "unit_price"), dec!(1000));
}

#[tokio::test]
async fn guest_checkout_needs_no_customer_reference() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("Guest item", dec!(300), None, true, true)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(
                json!([{"product_id": product.id, "quantity": 1}]),
                "cash",
            )),
        )
        .await;
    assert_eq!(response.status(), 201);

    let body = response_json(response).await;
    assert!(body["customer_id"].is_null());
}

#[tokio::test]
async fn gateway_orders_receive_a_redirect_payload() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("Online item", dec!(1000), None, true, true)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(
                json!([{"product_id": product.id, "quantity": 2}]),
                "gatepay",
            )),
        )
        .await;
    assert_eq!(response.status(), 201);

    let body = response_json(response).await;
    let order_id = body["id"].as_str().unwrap();
    let redirect = &body["payment_redirect"];
    assert_eq!(redirect["gateway_url"], "https://gate.example.com/pay");
    assert_eq!(redirect["fields"]["pg_bill_no"], *order_id);
    assert_eq!(redirect["fields"]["pg_amount"], "2500.00");
    assert_eq!(redirect["fields"]["pg_merchant_id"], common::TEST_MERCHANT_ID);

    // Cash orders get none.
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(
                json!([{"product_id": product.id, "quantity": 1}]),
                "cash",
            )),
        )
        .await;
    let body = response_json(response).await;
    assert!(body.get("payment_redirect").is_none());
}

#[tokio::test]
async fn courier_delivery_requires_an_address() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("Needs address", dec!(100), None, true, true)
        .await;

    let mut payload = order_payload(
        json!([{"product_id": product.id, "quantity": 1}]),
        "cash",
    );
    payload["delivery_address"] = Value::Null;

    let response = app.request(Method::POST, "/api/v1/orders", Some(payload)).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn cart_validate_returns_the_purchasable_subset() {
    let app = TestApp::new().await;
    let good = app
        .seed_product("Available", dec!(1000), None, true, true)
        .await;
    let hidden = app
        .seed_product("Hidden", dec!(500), None, true, false)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/validate",
            Some(json!({
                "items": [
                    {"product_id": good.id, "quantity": 1},
                    {"product_id": hidden.id, "quantity": 3},
                ]
            })),
        )
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    let lines = body.as_array().unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["product_id"], good.id.to_string());
    assert_eq!(decimal_field(&lines[0], "unit_price"), dec!(1000));
}

#[tokio::test]
async fn cart_validate_with_nothing_purchasable_is_empty_cart() {
    let app = TestApp::new().await;
    let hidden = app
        .seed_product("Hidden", dec!(500), None, false, false)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/validate",
            Some(json!({
                "items": [{"product_id": hidden.id, "quantity": 1}]
            })),
        )
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn listing_filters_by_customer() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("Listed", dec!(100), None, true, true)
        .await;
    let customer = Uuid::new_v4();

    let mut payload = order_payload(
        json!([{"product_id": product.id, "quantity": 1}]),
        "cash",
    );
    payload["customer_id"] = json!(customer);
    let response = app.request(Method::POST, "/api/v1/orders", Some(payload)).await;
    assert_eq!(response.status(), 201);

    // A guest order that must not appear in the customer's list.
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(
                json!([{"product_id": product.id, "quantity": 1}]),
                "cash",
            )),
        )
        .await;
    assert_eq!(response.status(), 201);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders?customer_id={customer}"),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["orders"].as_array().unwrap().len(), 1);
    assert_eq!(body["orders"][0]["customer_id"], customer.to_string());
}

#[tokio::test]
async fn staff_can_advance_fulfillment_status() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("Fulfill me", dec!(100), None, true, true)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(
                json!([{"product_id": product.id, "quantity": 1}]),
                "cash",
            )),
        )
        .await;
    let body = response_json(response).await;
    let order_id = body["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{order_id}/status"),
            Some(json!({"status": "preparing"})),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["status"], "preparing");
    // Fulfillment mutation never touches payment state.
    assert_eq!(body["payment_status"], "pending");
}
