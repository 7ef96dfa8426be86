use chrono::Utc;
use sea_orm::{
    sea_query::{Condition, Expr},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::entities::coupon::{
    ActiveModel as CouponActiveModel, Column, Entity as Coupon, Model as CouponModel,
};
use crate::errors::ServiceError;
use crate::repositories::Repository;

use super::BaseRepository;

#[derive(Debug, Clone)]
pub struct CouponRepository {
    base: BaseRepository,
}

impl CouponRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<CouponModel>, ServiceError> {
        Ok(Coupon::find_by_id(id).one(self.base.get_db()).await?)
    }

    /// Codes are stored upper-case; lookups normalise the input the same way.
    pub async fn find_by_code(&self, code: &str) -> Result<Option<CouponModel>, ServiceError> {
        let code = code.trim().to_uppercase();
        Ok(Coupon::find()
            .filter(Column::Code.eq(code))
            .one(self.base.get_db())
            .await?)
    }

    pub async fn insert(&self, coupon: CouponActiveModel) -> Result<CouponModel, ServiceError> {
        Ok(coupon.insert(self.base.get_db()).await?)
    }

    /// Writes only the columns set on `changes`; `usage_count` is never touched here.
    pub async fn update(&self, changes: CouponActiveModel) -> Result<CouponModel, ServiceError> {
        Ok(changes.update(self.base.get_db()).await?)
    }

    /// Removes the coupon; orders that used it keep their amounts and have
    /// `coupon_id` set to NULL by the foreign key. Returns `false` when no row matched.
    pub async fn delete(&self, id: Uuid) -> Result<bool, ServiceError> {
        let result = Coupon::delete_by_id(id).exec(self.base.get_db()).await?;
        Ok(result.rows_affected == 1)
    }

    /// Redemption guard: bumps `usage_count` only while it is below a positive
    /// `usage_limit` (null or zero means unlimited).
    ///
    /// The check and the increment are one conditional UPDATE, so concurrent
    /// redemptions can never push the count past the limit. Returns `false`
    /// when no row matched, which callers treat as the limit being reached.
    pub async fn increment_usage_if_available<C>(
        &self,
        conn: &C,
        coupon_id: Uuid,
    ) -> Result<bool, ServiceError>
    where
        C: ConnectionTrait,
    {
        let result = Coupon::update_many()
            .col_expr(
                Column::UsageCount,
                Expr::col(Column::UsageCount).add(1),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(coupon_id))
            .filter(
                Condition::any()
                    .add(Column::UsageLimit.is_null())
                    .add(Column::UsageLimit.eq(0))
                    .add(Expr::col(Column::UsageCount).lt(Expr::col(Column::UsageLimit))),
            )
            .exec(conn)
            .await?;

        debug!(
            %coupon_id,
            rows_affected = result.rows_affected,
            "coupon redemption guard evaluated"
        );
        Ok(result.rows_affected == 1)
    }
}
