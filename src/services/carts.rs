use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::entities::product::{self, Entity as Product};
use crate::errors::ServiceError;

/// A cart line as submitted by the storefront. Client-reported prices or
/// validity never appear here; only the reference and quantity are trusted
/// as input.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CartLine {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

/// A cart line confirmed against the catalog, with the authoritative price
/// at this instant.
#[derive(Debug, Clone, Serialize)]
pub struct PurchasableLine {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Confirms cart lines against the live catalog: the product must exist, be
/// available, and be published.
#[derive(Clone)]
pub struct CartValidator {
    db: Arc<DatabaseConnection>,
}

impl CartValidator {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn load_products(
        &self,
        lines: &[CartLine],
    ) -> Result<HashMap<Uuid, product::Model>, ServiceError> {
        let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        let products = Product::find()
            .filter(product::Column::Id.is_in(ids))
            .all(&*self.db)
            .await?;

        Ok(products.into_iter().map(|p| (p.id, p)).collect())
    }

    /// Returns the subset of lines that are currently purchasable, with their
    /// authoritative prices. This is the advisory check the storefront runs
    /// before checkout; order creation re-runs the strict variant below.
    #[instrument(skip(self, lines), fields(line_count = lines.len()))]
    pub async fn filter_purchasable(
        &self,
        lines: &[CartLine],
    ) -> Result<Vec<PurchasableLine>, ServiceError> {
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let products = self.load_products(lines).await?;
        let purchasable: Vec<PurchasableLine> = lines
            .iter()
            .filter_map(|line| {
                let product = products.get(&line.product_id)?;
                product.is_purchasable().then(|| PurchasableLine {
                    product_id: product.id,
                    name: product.name.clone(),
                    quantity: line.quantity,
                    unit_price: product.current_price(),
                })
            })
            .collect();

        if purchasable.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        Ok(purchasable)
    }

    /// Strict variant used inside order creation: every line must be
    /// purchasable, otherwise the unpurchasable ids are reported and nothing
    /// proceeds.
    #[instrument(skip(self, lines), fields(line_count = lines.len()))]
    pub async fn require_purchasable(
        &self,
        lines: &[CartLine],
    ) -> Result<Vec<PurchasableLine>, ServiceError> {
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let products = self.load_products(lines).await?;

        let unavailable: Vec<Uuid> = lines
            .iter()
            .filter(|line| {
                products
                    .get(&line.product_id)
                    .map_or(true, |p| !p.is_purchasable())
            })
            .map(|line| line.product_id)
            .collect();

        if !unavailable.is_empty() {
            warn!(?unavailable, "order creation referenced unpurchasable products");
            return Err(ServiceError::ProductsUnavailable(unavailable));
        }

        Ok(lines
            .iter()
            .map(|line| {
                let product = &products[&line.product_id];
                PurchasableLine {
                    product_id: product.id,
                    name: product.name.clone(),
                    quantity: line.quantity,
                    unit_price: product.current_price(),
                }
            })
            .collect())
    }
}
