use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use storefront_api::{
    config::{AppConfig, GatewayConfig},
    db,
    entities::{order, product},
    events::{self, EventSender},
    gateway::gatepay,
    handlers::AppServices,
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_MERCHANT_ID: &str = "MERCHANT-001";
pub const TEST_SECRET_KEY: &str = "test_shared_secret_for_callbacks";

/// Helper harness for spinning up an application backed by a throwaway
/// SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_file = std::env::temp_dir().join(format!("storefront_test_{}.db", Uuid::new_v4()));

        let gateway = GatewayConfig {
            merchant_id: TEST_MERCHANT_ID.to_string(),
            secret_key: TEST_SECRET_KEY.to_string(),
            payment_url: "https://gate.example.com/pay".to_string(),
            return_url: "https://shop.example.com/payment/return".to_string(),
        };

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
            gateway,
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.delivery.courier_fee = Decimal::from(500);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new(db_arc.clone(), cfg.clone(), event_sender.clone());

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", storefront_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
        }
    }

    /// Seed a catalog product the way the external catalog system would.
    pub async fn seed_product(
        &self,
        name: &str,
        price: Decimal,
        sale_price: Option<Decimal>,
        is_available: bool,
        is_published: bool,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            sale_price: Set(sale_price),
            is_available: Set(is_available),
            is_published: Set(is_published),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    /// Send a JSON request through the real router.
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).expect("request body"))
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response")
    }

    /// Send a form-encoded request, as the gateway does.
    pub async fn form_request(&self, uri: &str, fields: &[(&str, &str)]) -> Response {
        let body = serde_urlencoded::to_string(fields).expect("form body");

        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("router response")
    }

    /// Read an order row directly from the store for assertions.
    pub async fn load_order(&self, order_id: Uuid) -> order::Model {
        order::Entity::find_by_id(order_id)
            .one(&*self.state.db)
            .await
            .expect("load order")
            .expect("order exists")
    }

    /// Compute a valid confirm checksum with the test credentials. `amount`
    /// must be the two-decimal formatting of the order total.
    pub fn checksum(
        &self,
        amount: &str,
        bill_no: &str,
        payer_account: &str,
        trans_id: &str,
        trans_date: &str,
    ) -> String {
        gatepay::compute_checksum(
            TEST_MERCHANT_ID,
            amount,
            TEST_SECRET_KEY,
            bill_no,
            payer_account,
            trans_id,
            trans_date,
        )
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub async fn response_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    String::from_utf8(bytes.to_vec()).expect("utf8 response")
}
