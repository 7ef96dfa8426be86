//! Pure discount computation.
//!
//! Nothing here touches the database; callers hand in a [`CouponSnapshot`]
//! taken from the persisted coupon and get deterministic money amounts back.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use utoipa::ToSchema;

use crate::entities::coupon::{self, DiscountType};

/// The subset of a coupon the engine needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CouponSnapshot {
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub minimum_order_value: Decimal,
    pub maximum_discount: Option<Decimal>,
}

impl From<&coupon::Model> for CouponSnapshot {
    fn from(model: &coupon::Model) -> Self {
        Self {
            discount_type: model.discount_type,
            discount_value: model.discount_value,
            minimum_order_value: model.minimum_order_value,
            maximum_discount: model.maximum_discount,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct DiscountBreakdown {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

/// Largest subtotal an order or a quote may carry.
pub const MAX_ORDER_AMOUNT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// Rounds a currency amount to cents, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Discount granted by `coupon` on `subtotal`.
///
/// Below the coupon's minimum order value the discount is zero. The result is
/// never negative and never exceeds the subtotal. Amounts too large for exact
/// arithmetic lose precision instead of overflowing.
pub fn compute_discount(subtotal: Decimal, coupon: &CouponSnapshot) -> Decimal {
    let mut discount = match coupon.discount_type {
        DiscountType::Percentage => subtotal
            .checked_mul(coupon.discount_value)
            .and_then(|amount| amount.checked_div(Decimal::ONE_HUNDRED))
            .or_else(|| {
                subtotal
                    .checked_div(Decimal::ONE_HUNDRED)
                    .and_then(|unit| unit.checked_mul(coupon.discount_value))
            })
            .unwrap_or(subtotal),
        DiscountType::FixedAmount => coupon.discount_value,
    };

    if let Some(max) = coupon.maximum_discount {
        if discount > max {
            discount = max;
        }
    }

    if subtotal < coupon.minimum_order_value {
        discount = Decimal::ZERO;
    }

    round_money(discount)
        .min(subtotal)
        .max(Decimal::ZERO)
}

/// Subtotal, discount and total for an order, with or without a coupon.
pub fn price_order(subtotal: Decimal, coupon: Option<&CouponSnapshot>) -> DiscountBreakdown {
    let discount = coupon
        .map(|c| compute_discount(subtotal, c))
        .unwrap_or(Decimal::ZERO);

    DiscountBreakdown {
        subtotal,
        discount,
        total: subtotal - discount,
    }
}
