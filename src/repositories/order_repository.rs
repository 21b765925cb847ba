use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, TransactionTrait,
};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::entities::order::{
    self, ActiveModel as OrderActiveModel, Column, Entity as Order, Model as OrderModel,
    OrderStatus, PaymentData, PaymentStatus,
};
use crate::entities::order_item::{
    ActiveModel as OrderItemActiveModel, Entity as OrderItem, Model as OrderItemModel,
};
use crate::errors::ServiceError;

/// The Order Store. Owns every read and write of order rows, including the
/// conditional payment mutation the reconciliation engine relies on.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    db: Arc<DatabaseConnection>,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find an order by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        Order::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Find orders for a customer, newest first
    pub async fn find_by_customer(
        &self,
        customer_id: Uuid,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = Order::find()
            .filter(Column::CustomerId.eq(customer_id))
            .order_by_desc(Column::CreatedAt)
            .paginate(&*self.db, page_size);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((orders, total))
    }

    /// All orders with pagination, newest first
    pub async fn find_all(
        &self,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = Order::find()
            .order_by_desc(Column::CreatedAt)
            .paginate(&*self.db, page_size);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((orders, total))
    }

    /// Line items for an order
    pub async fn get_order_items(
        &self,
        order: &OrderModel,
    ) -> Result<Vec<OrderItemModel>, ServiceError> {
        order
            .find_related(OrderItem)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Persists an order and its line items as a single atomic unit: either
    /// all rows exist afterwards or none do.
    pub async fn create_with_items(
        &self,
        order: OrderActiveModel,
        items: Vec<OrderItemActiveModel>,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        let order_model = order.insert(&txn).await.map_err(|e| {
            error!(error = %e, "failed to insert order");
            ServiceError::DatabaseError(e)
        })?;

        for item in items {
            item.insert(&txn).await.map_err(|e| {
                error!(error = %e, order_id = %order_model.id, "failed to insert order item");
                ServiceError::DatabaseError(e)
            })?;
        }

        txn.commit().await?;
        Ok(order_model)
    }

    /// The §4.4 success mutation as one conditional update:
    ///
    /// `UPDATE orders SET status = 'confirmed', payment_status = 'success',
    ///  payment_id = ?, payment_data = ? WHERE id = ? AND payment_status <>
    ///  'success'`
    ///
    /// Returns whether a row was updated. `false` means another delivery of
    /// the same confirmation already applied it; the caller treats that as an
    /// idempotent no-op. The predicate also encodes the permitted
    /// `Failed -> Success` promotion while keeping `Success` terminal.
    pub async fn conditional_update_payment_success(
        &self,
        order_id: Uuid,
        transaction_id: &str,
        data: &PaymentData,
    ) -> Result<bool, ServiceError> {
        let payment_data = serde_json::to_value(data)
            .map_err(|e| ServiceError::InternalError(format!("payment data encoding: {e}")))?;

        let result = Order::update_many()
            .col_expr(Column::Status, Expr::value(OrderStatus::Confirmed))
            .col_expr(Column::PaymentStatus, Expr::value(PaymentStatus::Success))
            .col_expr(
                Column::PaymentId,
                Expr::value(Some(transaction_id.to_string())),
            )
            .col_expr(Column::PaymentData, Expr::value(Some(payment_data)))
            .col_expr(Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(Column::Id.eq(order_id))
            .filter(Column::PaymentStatus.ne(PaymentStatus::Success))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Records a failed payment attempt. Conditional on the same predicate as
    /// the success mutation, so a late failure signal can never downgrade an
    /// order that already reached `Success`.
    pub async fn mark_payment_failed(
        &self,
        order_id: Uuid,
        transaction_id: Option<&str>,
    ) -> Result<bool, ServiceError> {
        let mut update = Order::update_many()
            .col_expr(Column::PaymentStatus, Expr::value(PaymentStatus::Failed))
            .col_expr(Column::UpdatedAt, Expr::value(Some(Utc::now())));

        if let Some(trans_id) = transaction_id {
            update = update.col_expr(Column::PaymentId, Expr::value(Some(trans_id.to_string())));
        }

        let result = update
            .filter(Column::Id.eq(order_id))
            .filter(Column::PaymentStatus.ne(PaymentStatus::Success))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Updates the fulfillment status, bumping the row version.
    pub async fn update_status(
        &self,
        order: OrderModel,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        use sea_orm::Set;

        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);

        active
            .update(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }
}
