use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::payment::{
    ActiveModel as PaymentActiveModel, Column, Entity as Payment, Model as PaymentModel,
};
use crate::errors::ServiceError;
use crate::repositories::Repository;

use super::BaseRepository;

/// One payment row per order; retries and method changes rewrite it in place.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    base: BaseRepository,
}

impl PaymentRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }

    pub async fn find_by_order(&self, order_id: Uuid) -> Result<Option<PaymentModel>, ServiceError> {
        Ok(Payment::find()
            .filter(Column::OrderId.eq(order_id))
            .one(self.base.get_db())
            .await?)
    }

    pub async fn insert(&self, payment: PaymentActiveModel) -> Result<PaymentModel, ServiceError> {
        Ok(payment.insert(self.base.get_db()).await?)
    }

    /// Optimistic update guarded by `current.version`, same contract as orders.
    pub async fn update_versioned<C>(
        &self,
        conn: &C,
        current: &PaymentModel,
        mut changes: PaymentActiveModel,
    ) -> Result<PaymentModel, ServiceError>
    where
        C: ConnectionTrait,
    {
        changes.version = Set(current.version + 1);
        changes.updated_at = Set(Utc::now());

        let result = Payment::update_many()
            .set(changes)
            .filter(Column::Id.eq(current.id))
            .filter(Column::Version.eq(current.version))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(current.id));
        }

        Payment::find_by_id(current.id)
            .one(conn)
            .await?
            .ok_or(ServiceError::PaymentNotFound(current.order_id))
    }
}
