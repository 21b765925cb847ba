use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::AppConfig,
    entities::order::{
        self, ActiveModel as OrderActiveModel, DeliveryMethod, OrderStatus, PaymentMethod,
        PaymentStatus,
    },
    entities::order_item::{self, ActiveModel as OrderItemActiveModel},
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::OrderRepository,
    services::carts::{CartLine, CartValidator, PurchasableLine},
};

/// Request/Response types for the order service
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub customer_id: Option<Uuid>,
    #[validate(length(min = 1, message = "Cart must contain at least one item"))]
    pub items: Vec<CartLine>,
    pub delivery_method: DeliveryMethod,
    pub delivery_address: Option<String>,
    #[validate(length(min = 1, max = 120, message = "Customer name is required"))]
    pub customer_name: String,
    #[validate(length(min = 3, max = 32, message = "Customer phone is required"))]
    pub customer_phone: String,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub customer_id: Option<Uuid>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<String>,
    pub total_amount: Decimal,
    pub delivery_fee: Decimal,
    pub delivery_method: DeliveryMethod,
    pub currency: String,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Service for creating orders and mutating fulfillment state.
#[derive(Clone)]
pub struct OrderService {
    repository: OrderRepository,
    cart_validator: CartValidator,
    config: AppConfig,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(
        repository: OrderRepository,
        cart_validator: CartValidator,
        config: AppConfig,
        event_sender: EventSender,
    ) -> Self {
        Self {
            repository,
            cart_validator,
            config,
            event_sender,
        }
    }

    /// Creates a new order from submitted cart lines.
    ///
    /// Every product reference is re-validated against the catalog here,
    /// regardless of what the storefront already checked, and unit prices are
    /// snapshotted from the catalog at this instant. The order and its items
    /// are persisted atomically; a rejected line means nothing is persisted.
    #[instrument(skip(self, request), fields(customer_id = ?request.customer_id))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        for line in &request.items {
            line.validate()
                .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        }

        if request.delivery_method == DeliveryMethod::Courier
            && request
                .delivery_address
                .as_deref()
                .map_or(true, |a| a.trim().is_empty())
        {
            return Err(ServiceError::ValidationError(
                "Courier delivery requires a delivery address".to_string(),
            ));
        }

        let lines = self
            .cart_validator
            .require_purchasable(&request.items)
            .await?;

        let delivery_fee = self.config.delivery_fee(&request.delivery_method);
        let items_total: Decimal = lines
            .iter()
            .map(|l| l.unit_price * Decimal::from(l.quantity))
            .sum();
        let total = items_total + delivery_fee;

        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let order_model = OrderActiveModel {
            id: Set(order_id),
            customer_id: Set(request.customer_id),
            status: Set(OrderStatus::Pending),
            payment_method: Set(request.payment_method),
            payment_status: Set(PaymentStatus::Pending),
            payment_id: Set(None),
            payment_data: Set(None),
            total_amount: Set(total),
            delivery_fee: Set(delivery_fee),
            delivery_method: Set(request.delivery_method),
            delivery_address: Set(request.delivery_address.clone()),
            customer_name: Set(request.customer_name.clone()),
            customer_phone: Set(request.customer_phone.clone()),
            currency: Set(self.config.currency.clone()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };

        let item_models: Vec<OrderItemActiveModel> = lines
            .iter()
            .map(|line| OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                name: Set(line.name.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                total_price: Set(line.unit_price * Decimal::from(line.quantity)),
                created_at: Set(now),
            })
            .collect();

        let order = self
            .repository
            .create_with_items(order_model, item_models)
            .await?;

        info!(order_id = %order_id, total = %total, "order created");

        if let Err(e) = self.event_sender.send(Event::OrderCreated(order_id)).await {
            warn!(error = %e, order_id = %order_id, "failed to send order created event");
        }

        Ok(build_response(order, &lines))
    }

    /// Retrieves an order with its line items.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderResponse>, ServiceError> {
        let Some(order) = self.repository.find_by_id(order_id).await? else {
            return Ok(None);
        };
        let items = self.repository.get_order_items(&order).await?;
        Ok(Some(model_to_response(order, items)))
    }

    /// Lists orders with pagination, optionally scoped to one customer.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        customer_id: Option<Uuid>,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let (orders, total) = match customer_id {
            Some(customer) => {
                self.repository
                    .find_by_customer(customer, page, per_page)
                    .await?
            }
            None => self.repository.find_all(page, per_page).await?,
        };

        let mut responses = Vec::with_capacity(orders.len());
        for order in orders {
            let items = self.repository.get_order_items(&order).await?;
            responses.push(model_to_response(order, items));
        }

        Ok(OrderListResponse {
            orders: responses,
            total,
            page,
            per_page,
        })
    }

    /// Staff-only fulfillment status mutation. Payment state is never touched
    /// here; that belongs to the reconciliation engine.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = ?request.status))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        request: UpdateOrderStatusRequest,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self
            .repository
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let old_status = order.status;
        let updated = self.repository.update_status(order, request.status).await?;
        let items = self.repository.get_order_items(&updated).await?;

        info!(order_id = %order_id, ?old_status, new_status = ?updated.status, "order status updated");

        if let Err(e) = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status: format!("{old_status:?}"),
                new_status: format!("{:?}", updated.status),
            })
            .await
        {
            warn!(error = %e, order_id = %order_id, "failed to send status changed event");
        }

        Ok(model_to_response(updated, items))
    }

    /// Cancels an order (fulfillment state only).
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let response = self
            .update_order_status(
                order_id,
                UpdateOrderStatusRequest {
                    status: OrderStatus::Cancelled,
                },
            )
            .await?;

        if let Err(e) = self.event_sender.send(Event::OrderCancelled(order_id)).await {
            warn!(error = %e, order_id = %order_id, "failed to send order cancelled event");
        }

        Ok(response)
    }

    /// Internal mutation for the browser failure-redirect path: the customer
    /// came back from the gateway on the failure URL and no server-to-server
    /// confirm ever arrived. Conditional, so a concurrent or earlier success
    /// is never overwritten. Returns whether the order was actually marked.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_payment_failed(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        let order = self
            .repository
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let marked = self.repository.mark_payment_failed(order.id, None).await?;
        if marked {
            info!(order_id = %order_id, "payment marked failed from return redirect");
            if let Err(e) = self
                .event_sender
                .send(Event::PaymentFailed {
                    order_id,
                    transaction_id: None,
                })
                .await
            {
                warn!(error = %e, order_id = %order_id, "failed to send payment failed event");
            }
        }
        Ok(marked)
    }
}

fn build_response(order: order::Model, lines: &[PurchasableLine]) -> OrderResponse {
    let items = lines
        .iter()
        .map(|line| OrderItemResponse {
            product_id: line.product_id,
            name: line.name.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            total_price: line.unit_price * Decimal::from(line.quantity),
        })
        .collect();
    to_response(order, items)
}

fn model_to_response(order: order::Model, items: Vec<order_item::Model>) -> OrderResponse {
    let items = items
        .into_iter()
        .map(|item| OrderItemResponse {
            product_id: item.product_id,
            name: item.name,
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_price: item.total_price,
        })
        .collect();
    to_response(order, items)
}

fn to_response(order: order::Model, items: Vec<OrderItemResponse>) -> OrderResponse {
    OrderResponse {
        id: order.id,
        customer_id: order.customer_id,
        status: order.status,
        payment_method: order.payment_method,
        payment_status: order.payment_status,
        payment_id: order.payment_id,
        total_amount: order.total_amount,
        delivery_fee: order.delivery_fee,
        delivery_method: order.delivery_method,
        currency: order.currency,
        items,
        created_at: order.created_at,
        updated_at: order.updated_at,
    }
}
