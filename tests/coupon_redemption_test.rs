mod common;

use assert_matches::assert_matches;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait};
use storefront_api::{
    entities::{coupon::DiscountType, order},
    errors::ServiceError,
    repositories::CouponRepository,
    services::{
        coupons::{QuoteCouponRequest, UpdateCouponRequest},
        orders::{CreateOrderRequest, OrderItemInput},
    },
};
use uuid::Uuid;

use common::TestApp;

fn checkout(product_id: Uuid, coupon_id: Uuid) -> CreateOrderRequest {
    CreateOrderRequest {
        items: vec![OrderItemInput {
            product_id,
            quantity: 1,
        }],
        payment_method: "PIX".into(),
        coupon_id: Some(coupon_id),
    }
}

async fn single_use_coupon(app: &TestApp, code: &str) -> Uuid {
    let mut request = TestApp::coupon_request(code, DiscountType::Percentage, dec!(10));
    request.usage_limit = Some(1);
    app.seed_coupon(request).await
}

#[tokio::test]
async fn guard_increments_only_while_uses_remain() {
    let app = TestApp::new().await;
    let coupon_id = single_use_coupon(&app, "ONCE").await;
    let repository = CouponRepository::new(app.state.db.clone());

    assert!(repository
        .increment_usage_if_available(app.state.db.as_ref(), coupon_id)
        .await
        .unwrap());
    assert!(!repository
        .increment_usage_if_available(app.state.db.as_ref(), coupon_id)
        .await
        .unwrap());

    let coupon = repository.find_by_id(coupon_id).await.unwrap().unwrap();
    assert_eq!(coupon.usage_count, 1);
}

#[tokio::test]
async fn guard_treats_zero_limit_as_unlimited() {
    let app = TestApp::new().await;
    let mut request = TestApp::coupon_request("ALWAYS", DiscountType::Percentage, dec!(5));
    request.usage_limit = Some(0);
    let coupon_id = app.seed_coupon(request).await;
    let repository = CouponRepository::new(app.state.db.clone());

    for _ in 0..3 {
        assert!(repository
            .increment_usage_if_available(app.state.db.as_ref(), coupon_id)
            .await
            .unwrap());
    }
    let coupon = repository.find_by_id(coupon_id).await.unwrap().unwrap();
    assert_eq!(coupon.usage_count, 3);
}

#[tokio::test]
async fn concurrent_checkouts_redeem_a_single_use_coupon_once() {
    let app = TestApp::new().await;
    let product = app.seed_product("Headphones", dec!(200)).await;
    let coupon_id = single_use_coupon(&app, "LASTONE").await;
    let orders = app.state.services.orders.clone();

    let (first, second) = tokio::join!(
        orders.create_order(&app.customer, checkout(product, coupon_id)),
        orders.create_order(&app.other_customer, checkout(product, coupon_id)),
    );

    let results = [first, second];
    let successes = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(results
        .iter()
        .any(|result| matches!(result, Err(ServiceError::CouponUsageLimitExceeded))));

    let coupon = CouponRepository::new(app.state.db.clone())
        .find_by_id(coupon_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(coupon.usage_count, 1);

    let orders_persisted = order::Entity::find()
        .count(app.state.db.as_ref())
        .await
        .unwrap();
    assert_eq!(orders_persisted, 1, "the losing checkout leaves no order behind");
}

#[tokio::test]
async fn exhausted_coupon_fails_the_pre_check() {
    let app = TestApp::new().await;
    let product = app.seed_product("Case", dec!(30)).await;
    let coupon_id = single_use_coupon(&app, "SINGLE").await;
    let orders = &app.state.services.orders;

    orders
        .create_order(&app.customer, checkout(product, coupon_id))
        .await
        .expect("first redemption");
    let second = orders
        .create_order(&app.customer, checkout(product, coupon_id))
        .await;
    assert_matches!(second, Err(ServiceError::CouponUsageLimitExceeded));
}

#[tokio::test]
async fn unknown_coupon_is_not_found() {
    let app = TestApp::new().await;
    let product = app.seed_product("Case", dec!(30)).await;

    let result = app
        .state
        .services
        .orders
        .create_order(&app.customer, checkout(product, Uuid::new_v4()))
        .await;
    assert_matches!(result, Err(ServiceError::CouponNotFound));
}

#[tokio::test]
async fn quote_rejects_subtotals_below_the_minimum() {
    let app = TestApp::new().await;
    let mut request = TestApp::coupon_request("WELCOME", DiscountType::Percentage, dec!(10));
    request.minimum_order_value = Some(dec!(50));
    app.seed_coupon(request).await;
    let coupons = &app.state.services.coupons;

    let quote = coupons
        .quote(QuoteCouponRequest {
            code: "welcome".into(),
            subtotal: dec!(80.55),
        })
        .await
        .expect("quote");
    assert_eq!(quote.pricing.discount, dec!(8.06));
    assert_eq!(quote.pricing.total, dec!(72.49));

    let below = coupons
        .quote(QuoteCouponRequest {
            code: "WELCOME".into(),
            subtotal: dec!(49.99),
        })
        .await;
    assert_matches!(
        below,
        Err(ServiceError::CouponMinimumOrderValueNotMet { minimum, .. }) if minimum == dec!(50)
    );
}

#[tokio::test]
async fn quote_rejects_subtotals_out_of_range() {
    let app = TestApp::new().await;
    app.seed_coupon(TestApp::coupon_request("BIG", DiscountType::Percentage, dec!(10)))
        .await;
    let coupons = &app.state.services.coupons;

    for subtotal in [Decimal::MAX, dec!(1000000000.01), dec!(-1)] {
        let result = coupons
            .quote(QuoteCouponRequest {
                code: "BIG".into(),
                subtotal,
            })
            .await;
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    let ceiling = coupons
        .quote(QuoteCouponRequest {
            code: "BIG".into(),
            subtotal: dec!(1000000000),
        })
        .await
        .expect("quote at the ceiling");
    assert_eq!(ceiling.pricing.discount, dec!(100000000));
}

#[tokio::test]
async fn coupon_codes_are_unique_case_insensitively() {
    let app = TestApp::new().await;
    app.seed_coupon(TestApp::coupon_request("SUMMER", DiscountType::Percentage, dec!(10)))
        .await;

    let duplicate = app
        .state
        .services
        .coupons
        .create(TestApp::coupon_request("summer", DiscountType::FixedAmount, dec!(5)))
        .await;
    assert_matches!(duplicate, Err(ServiceError::CouponCodeTaken(code)) if code == "SUMMER");
}

#[tokio::test]
async fn usage_limit_cannot_drop_to_current_usage() {
    let app = TestApp::new().await;
    let product = app.seed_product("Cable", dec!(15)).await;
    let mut request = TestApp::coupon_request("LIMITED", DiscountType::Percentage, dec!(10));
    request.usage_limit = Some(5);
    let coupon_id = app.seed_coupon(request).await;

    for _ in 0..2 {
        app.state
            .services
            .orders
            .create_order(&app.customer, checkout(product, coupon_id))
            .await
            .expect("redeem");
    }

    let coupons = &app.state.services.coupons;
    let too_low = coupons
        .update(
            coupon_id,
            UpdateCouponRequest {
                usage_limit: Some(2),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(
        too_low,
        Err(ServiceError::CouponUsageLimitTooLow {
            limit: 2,
            usage_count: 2
        })
    );

    let raised = coupons
        .update(
            coupon_id,
            UpdateCouponRequest {
                usage_limit: Some(3),
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .expect("raise limit");
    assert_eq!(raised.usage_limit, Some(3));
    assert!(!raised.is_active);
    assert_eq!(raised.usage_count, 2);

    let unlimited = coupons
        .update(
            coupon_id,
            UpdateCouponRequest {
                usage_limit: Some(0),
                ..Default::default()
            },
        )
        .await
        .expect("zero means unlimited");
    assert_eq!(unlimited.usage_limit, Some(0));
}

#[tokio::test]
async fn deleting_a_coupon_detaches_it_from_orders() {
    let app = TestApp::new().await;
    let product = app.seed_product("Backpack", dec!(120)).await;
    let coupon_id = single_use_coupon(&app, "GOODBYE").await;

    let details = app
        .state
        .services
        .orders
        .create_order(&app.customer, checkout(product, coupon_id))
        .await
        .expect("order with coupon");
    assert_eq!(details.order.coupon_id, Some(coupon_id));

    let coupons = &app.state.services.coupons;
    coupons.delete(coupon_id).await.expect("delete coupon");

    let order = order::Entity::find_by_id(details.order.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .expect("order survives coupon deletion");
    assert_eq!(order.coupon_id, None);
    assert_eq!(order.discount, dec!(12));
    assert_eq!(order.total, dec!(108));

    let missing = CouponRepository::new(app.state.db.clone())
        .find_by_id(coupon_id)
        .await
        .unwrap();
    assert!(missing.is_none());
    assert_matches!(coupons.delete(coupon_id).await, Err(ServiceError::CouponNotFound));
}
