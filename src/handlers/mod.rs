pub mod common;
pub mod orders;
pub mod payment_callbacks;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    config::AppConfig,
    events::EventSender,
    gateway::gatepay::GatePay,
    repositories::OrderRepository,
    services::{carts::CartValidator, orders::OrderService, payments::PaymentService},
};

/// Aggregate of the services the HTTP handlers dispatch into.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub carts: Arc<CartValidator>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    pub fn new(db: Arc<DatabaseConnection>, config: AppConfig, event_sender: EventSender) -> Self {
        let repository = OrderRepository::new(db.clone());
        let cart_validator = CartValidator::new(db);
        let gateway = GatePay::new(config.gateway.clone());

        let orders = Arc::new(OrderService::new(
            repository.clone(),
            cart_validator.clone(),
            config,
            event_sender.clone(),
        ));
        let payments = Arc::new(PaymentService::new(repository, gateway, event_sender));

        Self {
            orders,
            carts: Arc::new(cart_validator),
            payments,
        }
    }
}
