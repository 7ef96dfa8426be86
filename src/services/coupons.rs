use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::entities::coupon::{ActiveModel as CouponActiveModel, DiscountType, Model as CouponModel};
use crate::errors::ServiceError;
use crate::repositories::CouponRepository;
use crate::services::discounts::{price_order, CouponSnapshot, DiscountBreakdown, MAX_ORDER_AMOUNT};

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCouponRequest {
    #[validate(length(min = 3, max = 32), custom = "validate_coupon_code")]
    pub code: String,
    #[validate(length(max = 255))]
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub minimum_order_value: Option<Decimal>,
    pub maximum_discount: Option<Decimal>,
    #[validate(range(min = 0))]
    pub usage_limit: Option<i32>,
    pub is_active: Option<bool>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCouponRequest {
    #[validate(length(max = 255))]
    pub description: Option<String>,
    pub discount_value: Option<Decimal>,
    pub minimum_order_value: Option<Decimal>,
    pub maximum_discount: Option<Decimal>,
    #[validate(range(min = 0))]
    pub usage_limit: Option<i32>,
    pub is_active: Option<bool>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuoteCouponRequest {
    #[validate(length(min = 1, max = 32))]
    pub code: String,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CouponResponse {
    pub id: Uuid,
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub minimum_order_value: Decimal,
    pub maximum_discount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub usage_count: i32,
    pub is_active: bool,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl From<CouponModel> for CouponResponse {
    fn from(model: CouponModel) -> Self {
        Self {
            id: model.id,
            code: model.code,
            description: model.description,
            discount_type: model.discount_type,
            discount_value: model.discount_value,
            minimum_order_value: model.minimum_order_value,
            maximum_discount: model.maximum_discount,
            usage_limit: model.usage_limit,
            usage_count: model.usage_count,
            is_active: model.is_active,
            valid_from: model.valid_from,
            valid_until: model.valid_until,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CouponQuote {
    pub coupon: CouponResponse,
    pub pricing: DiscountBreakdown,
}

fn validate_coupon_code(code: &str) -> Result<(), ValidationError> {
    if code.trim().chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("coupon_code");
        err.message = Some("Coupon code must be alphanumeric".into());
        Err(err)
    }
}

/// Redeemability checks, in the order clients rely on:
/// active, then validity window, then remaining uses.
pub fn check_redeemable(coupon: &CouponModel, now: DateTime<Utc>) -> Result<(), ServiceError> {
    if !coupon.is_active {
        return Err(ServiceError::CouponInactive);
    }
    if now < coupon.valid_from || now > coupon.valid_until {
        return Err(ServiceError::CouponExpired);
    }
    if let Some(limit) = coupon.usage_limit.filter(|limit| *limit > 0) {
        if coupon.usage_count >= limit {
            return Err(ServiceError::CouponUsageLimitExceeded);
        }
    }
    Ok(())
}

struct CouponRules {
    discount_type: DiscountType,
    discount_value: Decimal,
    minimum_order_value: Decimal,
    maximum_discount: Option<Decimal>,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
}

impl CouponRules {
    fn check(&self) -> Result<(), ServiceError> {
        if self.discount_value <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "discountValue must be positive".into(),
            ));
        }
        if self.discount_type == DiscountType::Percentage
            && self.discount_value > Decimal::ONE_HUNDRED
        {
            return Err(ServiceError::ValidationError(
                "percentage discounts cannot exceed 100".into(),
            ));
        }
        if self.minimum_order_value < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "minimumOrderValue cannot be negative".into(),
            ));
        }
        if matches!(self.maximum_discount, Some(max) if max <= Decimal::ZERO) {
            return Err(ServiceError::ValidationError(
                "maximumDiscount must be positive".into(),
            ));
        }
        if self.valid_from >= self.valid_until {
            return Err(ServiceError::ValidationError(
                "validFrom must be before validUntil".into(),
            ));
        }
        Ok(())
    }
}

/// Coupon lookup, validation and administration.
#[derive(Clone)]
pub struct CouponService {
    coupons: Arc<CouponRepository>,
}

impl CouponService {
    pub fn new(coupons: Arc<CouponRepository>) -> Self {
        Self { coupons }
    }

    /// Coupon by id, only if it can be redeemed right now.
    pub async fn get_redeemable(&self, id: Uuid) -> Result<CouponModel, ServiceError> {
        let coupon = self
            .coupons
            .find_by_id(id)
            .await?
            .ok_or(ServiceError::CouponNotFound)?;
        check_redeemable(&coupon, Utc::now())?;
        Ok(coupon)
    }

    /// Coupon by code (case-insensitive), only if it can be redeemed right now.
    pub async fn get_by_code(&self, code: &str) -> Result<CouponModel, ServiceError> {
        let coupon = self
            .coupons
            .find_by_code(code)
            .await?
            .ok_or(ServiceError::CouponNotFound)?;
        check_redeemable(&coupon, Utc::now())?;
        Ok(coupon)
    }

    /// Prices `subtotal` with the coupon. Unlike order creation, a subtotal
    /// below the minimum is an explicit error here.
    pub async fn quote(&self, request: QuoteCouponRequest) -> Result<CouponQuote, ServiceError> {
        request.validate()?;
        if request.subtotal < Decimal::ZERO || request.subtotal > MAX_ORDER_AMOUNT {
            return Err(ServiceError::ValidationError(format!(
                "subtotal must be between 0 and {}",
                MAX_ORDER_AMOUNT
            )));
        }

        let coupon = self.get_by_code(&request.code).await?;
        if request.subtotal < coupon.minimum_order_value {
            return Err(ServiceError::CouponMinimumOrderValueNotMet {
                subtotal: request.subtotal,
                minimum: coupon.minimum_order_value,
            });
        }

        let pricing = price_order(request.subtotal, Some(&CouponSnapshot::from(&coupon)));
        Ok(CouponQuote {
            coupon: coupon.into(),
            pricing,
        })
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create(&self, request: CreateCouponRequest) -> Result<CouponModel, ServiceError> {
        request.validate()?;

        let rules = CouponRules {
            discount_type: request.discount_type,
            discount_value: request.discount_value,
            minimum_order_value: request.minimum_order_value.unwrap_or(Decimal::ZERO),
            maximum_discount: request.maximum_discount,
            valid_from: request.valid_from,
            valid_until: request.valid_until,
        };
        rules.check()?;

        let code = request.code.trim().to_uppercase();
        if self.coupons.find_by_code(&code).await?.is_some() {
            return Err(ServiceError::CouponCodeTaken(code));
        }

        let now = Utc::now();
        let coupon = CouponActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            description: Set(request.description),
            discount_type: Set(rules.discount_type),
            discount_value: Set(rules.discount_value),
            minimum_order_value: Set(rules.minimum_order_value),
            maximum_discount: Set(rules.maximum_discount),
            usage_limit: Set(request.usage_limit),
            usage_count: Set(0),
            is_active: Set(request.is_active.unwrap_or(true)),
            valid_from: Set(rules.valid_from),
            valid_until: Set(rules.valid_until),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let coupon = self.coupons.insert(coupon).await?;
        info!(coupon_id = %coupon.id, "Coupon created");
        Ok(coupon)
    }

    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateCouponRequest,
    ) -> Result<CouponModel, ServiceError> {
        request.validate()?;

        let current = self
            .coupons
            .find_by_id(id)
            .await?
            .ok_or(ServiceError::CouponNotFound)?;

        if let Some(limit) = request.usage_limit {
            if limit > 0 && limit <= current.usage_count {
                return Err(ServiceError::CouponUsageLimitTooLow {
                    limit,
                    usage_count: current.usage_count,
                });
            }
        }

        let rules = CouponRules {
            discount_type: current.discount_type,
            discount_value: request.discount_value.unwrap_or(current.discount_value),
            minimum_order_value: request
                .minimum_order_value
                .unwrap_or(current.minimum_order_value),
            maximum_discount: request.maximum_discount.or(current.maximum_discount),
            valid_from: request.valid_from.unwrap_or(current.valid_from),
            valid_until: request.valid_until.unwrap_or(current.valid_until),
        };
        rules.check()?;

        fn set_if<T: Into<sea_orm::Value>>(value: Option<T>) -> ActiveValue<T> {
            value.map(Set).unwrap_or(ActiveValue::NotSet)
        }

        let changes = CouponActiveModel {
            id: sea_orm::ActiveValue::Unchanged(current.id),
            description: set_if(request.description.map(Some)),
            discount_value: set_if(request.discount_value),
            minimum_order_value: set_if(request.minimum_order_value),
            maximum_discount: set_if(request.maximum_discount.map(Some)),
            usage_limit: set_if(request.usage_limit.map(Some)),
            is_active: set_if(request.is_active),
            valid_from: set_if(request.valid_from),
            valid_until: set_if(request.valid_until),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };

        let coupon = self.coupons.update(changes).await?;
        info!(coupon_id = %coupon.id, "Coupon updated");
        Ok(coupon)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        if !self.coupons.delete(id).await? {
            return Err(ServiceError::CouponNotFound);
        }
        info!(coupon_id = %id, "Coupon deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn coupon() -> CouponModel {
        let now = Utc::now();
        CouponModel {
            id: Uuid::new_v4(),
            code: "WELCOME10".into(),
            description: None,
            discount_type: DiscountType::Percentage,
            discount_value: dec!(10),
            minimum_order_value: Decimal::ZERO,
            maximum_discount: None,
            usage_limit: Some(5),
            usage_count: 0,
            is_active: true,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(1),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn redeemable_coupon_passes() {
        assert!(check_redeemable(&coupon(), Utc::now()).is_ok());
    }

    #[test]
    fn inactive_is_reported_before_expiry_and_usage() {
        let now = Utc::now();
        let c = CouponModel {
            is_active: false,
            valid_until: now - Duration::hours(1),
            usage_count: 5,
            ..coupon()
        };
        assert_matches!(check_redeemable(&c, now), Err(ServiceError::CouponInactive));
    }

    #[test]
    fn expiry_is_reported_before_usage() {
        let now = Utc::now();
        let c = CouponModel {
            valid_until: now - Duration::hours(1),
            usage_count: 5,
            ..coupon()
        };
        assert_matches!(check_redeemable(&c, now), Err(ServiceError::CouponExpired));

        let not_yet = CouponModel {
            valid_from: now + Duration::hours(1),
            ..coupon()
        };
        assert_matches!(check_redeemable(&not_yet, now), Err(ServiceError::CouponExpired));
    }

    #[test]
    fn exhausted_coupon_is_rejected_but_zero_limit_is_unlimited() {
        let now = Utc::now();
        let exhausted = CouponModel {
            usage_count: 5,
            ..coupon()
        };
        assert_matches!(
            check_redeemable(&exhausted, now),
            Err(ServiceError::CouponUsageLimitExceeded)
        );

        let unlimited = CouponModel {
            usage_limit: Some(0),
            usage_count: 1_000,
            ..coupon()
        };
        assert!(check_redeemable(&unlimited, now).is_ok());

        let no_limit = CouponModel {
            usage_limit: None,
            usage_count: 1_000,
            ..coupon()
        };
        assert!(check_redeemable(&no_limit, now).is_ok());
    }

    #[test]
    fn coupon_rules_reject_inconsistent_values() {
        let now = Utc::now();
        let base = CouponRules {
            discount_type: DiscountType::Percentage,
            discount_value: dec!(10),
            minimum_order_value: Decimal::ZERO,
            maximum_discount: None,
            valid_from: now,
            valid_until: now + Duration::days(7),
        };
        assert!(base.check().is_ok());

        let over_100 = CouponRules {
            discount_value: dec!(101),
            ..base
        };
        assert_matches!(over_100.check(), Err(ServiceError::ValidationError(_)));

        let inverted = CouponRules {
            discount_type: DiscountType::FixedAmount,
            discount_value: dec!(5),
            minimum_order_value: Decimal::ZERO,
            maximum_discount: None,
            valid_from: now,
            valid_until: now - Duration::days(1),
        };
        assert_matches!(inverted.check(), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn coupon_codes_must_be_alphanumeric() {
        assert!(validate_coupon_code("SUMMER24").is_ok());
        assert!(validate_coupon_code("SUMMER-24").is_err());
        assert!(validate_coupon_code("DROP TABLE").is_err());
    }
}
