use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog product, maintained by the external catalog system. This service
/// reads it to validate carts and snapshot prices; it never writes.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub sale_price: Option<Decimal>,
    pub is_available: bool,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether the product may appear in a new order.
    pub fn is_purchasable(&self) -> bool {
        self.is_available && self.is_published
    }

    /// Authoritative price at this instant: the sale price when one is set.
    pub fn current_price(&self) -> Decimal {
        self.sale_price.unwrap_or(self.price)
    }
}
