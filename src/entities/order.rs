use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    /// Also the gateway bill number: opaque, generated at creation, safe to
    /// echo back from an untrusted party.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Absent for guest checkout.
    pub customer_id: Option<Uuid>,

    /// Fulfillment state, distinct from payment state.
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,

    /// Gateway transaction identifier; set by the reconciliation engine.
    pub payment_id: Option<String>,

    /// Gateway-supplied reconciliation fields, stored for audit only.
    pub payment_data: Option<Json>,

    /// Fixed at creation from snapshotted item prices plus the delivery fee.
    pub total_amount: Decimal,
    pub delivery_fee: Decimal,
    pub delivery_method: DeliveryMethod,
    pub delivery_address: Option<String>,

    pub customer_name: String,
    pub customer_phone: String,
    pub currency: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {}

/// Fulfillment status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "preparing")]
    Preparing,
    #[sea_orm(string_value = "ready")]
    Ready,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// Payment settlement state. Cash and card orders stay `Pending` until
/// settled out-of-band at delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "success")]
    Success,
    #[sea_orm(string_value = "failed")]
    Failed,
}

/// Payment method enumeration. Only `GatePay` participates in the gateway
/// callback protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "cash")]
    Cash,
    #[sea_orm(string_value = "card")]
    Card,
    #[sea_orm(string_value = "gatepay")]
    #[serde(rename = "gatepay")]
    GatePay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    #[sea_orm(string_value = "courier")]
    Courier,
    #[sea_orm(string_value = "pickup")]
    Pickup,
}

/// Audit record persisted into `payment_data` by the reconciliation engine.
/// Never consulted for authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentData {
    pub payer_account: String,
    pub trans_date: String,
    pub amount: String,
}
