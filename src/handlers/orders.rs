use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    entities::order::PaymentMethod,
    errors::ServiceError,
    gateway::RedirectPayload,
    handlers::common::{created_response, success_response, validate_input},
    services::carts::CartLine,
    services::orders::{CreateOrderRequest, OrderResponse, UpdateOrderStatusRequest},
    AppState,
};

/// Creates the router for order endpoints
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/status", put(update_order_status))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/payment", get(payment_redirect))
        .route("/:id/payment/failed", post(mark_payment_failed))
}

/// Creates the router for cart endpoints
pub fn cart_routes() -> Router<AppState> {
    Router::new().route("/validate", post(validate_cart))
}

#[derive(Debug, Serialize)]
struct CreateOrderResponse {
    #[serde(flatten)]
    order: OrderResponse,
    /// Present for gateway-paid orders: the auto-submit form that sends the
    /// customer's browser to the gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_redirect: Option<RedirectPayload>,
}

/// Create an order from submitted cart lines
async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.create_order(payload).await?;

    let payment_redirect = if order.payment_method == PaymentMethod::GatePay {
        Some(state.services.payments.redirect_for_order(order.id).await?)
    } else {
        None
    };

    Ok(created_response(CreateOrderResponse {
        order,
        payment_redirect,
    }))
}

/// Get an order by id
async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {id} not found")))?;

    Ok(success_response(order))
}

// Pagination fields are inlined: serde_urlencoded cannot drive numeric
// fields through a #[serde(flatten)].
#[derive(Debug, Deserialize)]
struct OrderListQuery {
    customer_id: Option<Uuid>,
    #[serde(default = "default_page")]
    page: u64,
    #[serde(default = "default_per_page")]
    per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

/// List orders, optionally for one customer
async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let list = state
        .services
        .orders
        .list_orders(query.customer_id, query.page, query.per_page)
        .await?;

    Ok(success_response(list))
}

/// Staff-only fulfillment status mutation
async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .update_order_status(id, payload)
        .await?;

    Ok(success_response(order))
}

/// Cancel an order
async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.cancel_order(id).await?;
    Ok(success_response(order))
}

/// Redirect payload for an unpaid gateway order (initial payment or retry)
async fn payment_redirect(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let payload = state.services.payments.redirect_for_order(id).await?;
    Ok(success_response(payload))
}

#[derive(Debug, Serialize)]
struct MarkFailedResponse {
    marked: bool,
}

/// Internal mutation for the browser failure-redirect path. Keeps
/// customer-visible state from stalling at pending when no server-to-server
/// confirm ever arrives.
async fn mark_payment_failed(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let marked = state.services.orders.mark_payment_failed(id).await?;
    Ok(success_response(MarkFailedResponse { marked }))
}

#[derive(Debug, Deserialize)]
struct ValidateCartRequest {
    items: Vec<CartLine>,
}

/// Advisory cart validation for the storefront. Order creation re-checks
/// authoritatively regardless of this answer.
async fn validate_cart(
    State(state): State<AppState>,
    Json(payload): Json<ValidateCartRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    for line in &payload.items {
        validate_input(line)?;
    }

    let lines = state
        .services
        .carts
        .filter_purchasable(&payload.items)
        .await?;

    Ok(success_response(lines))
}
