use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::order::{
    ActiveModel as OrderActiveModel, Column, Entity as Order, Model as OrderModel,
};
use crate::entities::order_item::{
    self, ActiveModel as OrderItemActiveModel, Entity as OrderItem, Model as OrderItemModel,
};
use crate::errors::ServiceError;
use crate::repositories::Repository;

use super::BaseRepository;

/// Repository for order operations
#[derive(Debug, Clone)]
pub struct OrderRepository {
    base: BaseRepository,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Find an order by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find_by_id(id).one(self.base.get_db()).await?)
    }

    /// Items of an order in line order
    pub async fn find_items(&self, order_id: Uuid) -> Result<Vec<OrderItemModel>, ServiceError> {
        Ok(OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Position)
            .all(self.base.get_db())
            .await?)
    }

    /// Inserts an order and its items on `conn`, normally an open transaction.
    pub async fn insert_with_items<C>(
        &self,
        conn: &C,
        order: OrderActiveModel,
        items: Vec<OrderItemActiveModel>,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError>
    where
        C: ConnectionTrait,
    {
        let order = order.insert(conn).await?;
        let mut saved = Vec::with_capacity(items.len());
        for mut item in items {
            item.order_id = Set(order.id);
            saved.push(item.insert(conn).await?);
        }
        Ok((order, saved))
    }

    /// Applies `changes` only if the row still carries `current.version`.
    ///
    /// Bumps the version and `updated_at`. A concurrent writer that got there
    /// first makes this fail with `ConcurrentModification`.
    pub async fn update_versioned<C>(
        &self,
        conn: &C,
        current: &OrderModel,
        mut changes: OrderActiveModel,
    ) -> Result<OrderModel, ServiceError>
    where
        C: ConnectionTrait,
    {
        changes.version = Set(current.version + 1);
        changes.updated_at = Set(Utc::now());

        let result = Order::update_many()
            .set(changes)
            .filter(Column::Id.eq(current.id))
            .filter(Column::Version.eq(current.version))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(current.id));
        }

        Order::find_by_id(current.id)
            .one(conn)
            .await?
            .ok_or(ServiceError::OrderNotFound(current.id))
    }
}
