mod common;

use assert_matches::assert_matches;
use axum::http::{HeaderMap, StatusCode};
use rust_decimal_macros::dec;
use sea_orm::Set;
use serde_json::{json, Value};
use storefront_api::{
    entities::{
        order::{self, OrderStatus},
        payment::{self, PaymentStatus, ProviderKind},
    },
    errors::ServiceError,
    providers::WebhookEvent,
    repositories::{OrderRepository, PaymentRepository},
    services::{
        orders::{CreateOrderRequest, OrderDetails, OrderItemInput},
        payments::WebhookOutcome,
    },
};
use uuid::Uuid;

use common::{count_payment_approved, FakeProvider, TestApp, SIGNATURE_HEADER};

async fn pending_order(app: &TestApp, method: &str) -> OrderDetails {
    let product = app.seed_product("Console", dec!(499.90)).await;
    let details = app
        .state
        .services
        .orders
        .create_order(
            &app.customer,
            CreateOrderRequest {
                items: vec![OrderItemInput {
                    product_id: product,
                    quantity: 1,
                }],
                payment_method: method.into(),
                coupon_id: None,
            },
        )
        .await
        .expect("order created");
    app.drain_events().await;
    details
}

async fn deliver(app: &TestApp, kind: ProviderKind, payload: Value) -> WebhookOutcome {
    let body = serde_json::to_vec(&payload).unwrap();
    app.state
        .services
        .payments
        .handle_webhook(kind, &HeaderMap::new(), &body)
        .await
        .expect("webhook accepted")
}

async fn reload(app: &TestApp, order_id: Uuid) -> OrderDetails {
    app.state
        .services
        .orders
        .get_order(&app.admin, order_id)
        .await
        .expect("order exists")
}

#[tokio::test]
async fn approved_event_is_idempotent() {
    let app = TestApp::new().await;
    let order = pending_order(&app, "PIX").await;
    let event = json!({ "orderId": order.order.id, "status": "approved" });

    let first = deliver(&app, ProviderKind::MercadoPago, event.clone()).await;
    assert_eq!(
        first,
        WebhookOutcome::Reconciled {
            payment_status: PaymentStatus::Approved,
            order_status: OrderStatus::Paid,
        }
    );
    let after_first = reload(&app, order.order.id).await;
    let paid_at = after_first.order.paid_at.expect("order paid_at stamped");
    let payment_paid_at = after_first.payment.as_ref().unwrap().paid_at;
    assert!(payment_paid_at.is_some());

    let second = deliver(&app, ProviderKind::MercadoPago, event).await;
    assert_eq!(second, first);

    let after_second = reload(&app, order.order.id).await;
    assert_eq!(after_second.order.payment_status, OrderStatus::Paid);
    assert_eq!(after_second.order.paid_at, Some(paid_at));
    assert_eq!(after_second.payment.unwrap().paid_at, payment_paid_at);

    let events = app.drain_events().await;
    assert_eq!(count_payment_approved(&events), 1);
}

#[tokio::test]
async fn status_strings_map_case_insensitively() {
    let app = TestApp::new().await;
    let order = pending_order(&app, "PIX").await;

    let outcome = deliver(
        &app,
        ProviderKind::MercadoPago,
        json!({ "orderId": order.order.id, "status": "REJECTED" }),
    )
    .await;
    assert_eq!(
        outcome,
        WebhookOutcome::Reconciled {
            payment_status: PaymentStatus::Rejected,
            order_status: OrderStatus::Cancelled,
        }
    );
}

#[tokio::test]
async fn unknown_provider_vocabulary_counts_as_pending() {
    let app = TestApp::new().await;
    let order = pending_order(&app, "PIX").await;

    let outcome = deliver(
        &app,
        ProviderKind::MercadoPago,
        json!({ "orderId": order.order.id, "status": "in_process" }),
    )
    .await;
    assert_eq!(
        outcome,
        WebhookOutcome::Reconciled {
            payment_status: PaymentStatus::Pending,
            order_status: OrderStatus::Pending,
        }
    );
    let payment = reload(&app, order.order.id).await.payment.unwrap();
    assert_eq!(payment.provider_status.as_deref(), Some("in_process"));
}

#[tokio::test]
async fn cancelled_event_cancels_a_pending_order() {
    let app = TestApp::new().await;
    let order = pending_order(&app, "STRIPE").await;

    deliver(
        &app,
        ProviderKind::Stripe,
        json!({ "orderId": order.order.id, "status": "cancelled" }),
    )
    .await;

    let details = reload(&app, order.order.id).await;
    assert_eq!(details.order.payment_status, OrderStatus::Cancelled);
    assert_eq!(details.payment.unwrap().status, PaymentStatus::Cancelled);
}

#[tokio::test]
async fn late_pending_does_not_roll_back_an_approval() {
    let app = TestApp::new().await;
    let order = pending_order(&app, "PIX").await;
    let id = order.order.id;

    deliver(&app, ProviderKind::MercadoPago, json!({ "orderId": id, "status": "approved" })).await;
    let late = deliver(&app, ProviderKind::MercadoPago, json!({ "orderId": id, "status": "pending" })).await;

    assert_matches!(late, WebhookOutcome::Ignored(_));
    let details = reload(&app, id).await;
    assert_eq!(details.order.payment_status, OrderStatus::Paid);
    assert_eq!(details.payment.unwrap().status, PaymentStatus::Approved);
}

#[tokio::test]
async fn unknown_orders_and_empty_events_are_dropped() {
    let app = TestApp::new().await;

    let unknown = deliver(
        &app,
        ProviderKind::MercadoPago,
        json!({ "orderId": Uuid::new_v4(), "status": "approved" }),
    )
    .await;
    assert_eq!(unknown, WebhookOutcome::Ignored("unknown order"));

    let ping = deliver(&app, ProviderKind::Stripe, json!({ "type": "ping" })).await;
    assert_matches!(ping, WebhookOutcome::Ignored(_));

    let malformed = deliver(&app, ProviderKind::Stripe, json!({ "status": "approved" })).await;
    assert_eq!(malformed, WebhookOutcome::Failed);

    let not_json = app
        .state
        .services
        .payments
        .handle_webhook(ProviderKind::Stripe, &HeaderMap::new(), b"not json")
        .await
        .unwrap();
    assert_eq!(not_json, WebhookOutcome::Failed);
}

#[tokio::test]
async fn webhooks_from_a_replaced_provider_are_ignored() {
    let app = TestApp::new().await;
    let order = pending_order(&app, "PIX").await;
    let id = order.order.id;

    app.state
        .services
        .orders
        .update_payment_method(&app.customer, id, "STRIPE")
        .await
        .expect("switch to stripe");

    let stale = deliver(&app, ProviderKind::MercadoPago, json!({ "orderId": id, "status": "approved" })).await;
    assert_eq!(stale, WebhookOutcome::Ignored("stale provider"));
    assert_eq!(reload(&app, id).await.order.payment_status, OrderStatus::Pending);

    let current = deliver(&app, ProviderKind::Stripe, json!({ "orderId": id, "status": "approved" })).await;
    assert_matches!(current, WebhookOutcome::Reconciled { order_status: OrderStatus::Paid, .. });
}

#[tokio::test]
async fn webhooks_for_a_superseded_payment_id_are_ignored() {
    let app = TestApp::new().await;
    let order = pending_order(&app, "PIX").await;
    let id = order.order.id;
    let current_id = order.payment.unwrap().provider_id.unwrap();

    let other = deliver(
        &app,
        ProviderKind::MercadoPago,
        json!({ "orderId": id, "status": "approved", "paymentId": "mp_999" }),
    )
    .await;
    assert_eq!(other, WebhookOutcome::Ignored("superseded payment"));

    let matching = deliver(
        &app,
        ProviderKind::MercadoPago,
        json!({ "orderId": id, "status": "approved", "paymentId": current_id }),
    )
    .await;
    assert_matches!(matching, WebhookOutcome::Reconciled { payment_status: PaymentStatus::Approved, .. });
}

#[tokio::test]
async fn approval_after_cancellation_leaves_the_order_cancelled() {
    let app = TestApp::new().await;
    let order = pending_order(&app, "PIX").await;
    let id = order.order.id;

    app.state
        .services
        .orders
        .cancel_order(&app.admin, id, Some("out of stock".into()))
        .await
        .expect("cancel");
    app.drain_events().await;

    deliver(&app, ProviderKind::MercadoPago, json!({ "orderId": id, "status": "approved" })).await;

    let details = reload(&app, id).await;
    assert_eq!(details.order.payment_status, OrderStatus::Cancelled);
    assert_eq!(count_payment_approved(&app.drain_events().await), 0);
}

#[tokio::test]
async fn webhook_endpoint_always_acknowledges_processing_failures() {
    let app = TestApp::new().await;

    for body in [
        json!({ "orderId": Uuid::new_v4(), "status": "approved" }),
        json!({ "unexpected": true }),
    ] {
        let (status, json) = app.post_webhook("stripe", &body, &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({ "received": true }));
    }
}

#[tokio::test]
async fn bad_signatures_are_rejected_with_an_error_status() {
    let app = TestApp::with_providers(
        FakeProvider::new(ProviderKind::MercadoPago).with_secret("s3cret"),
        FakeProvider::new(ProviderKind::Stripe),
    )
    .await;
    let order = pending_order(&app, "PIX").await;
    let body = json!({ "orderId": order.order.id, "status": "approved" });

    let (status, json) = app.post_webhook("mercado-pago", &body, &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_WEBHOOK_SIGNATURE");

    let (status, _) = app
        .post_webhook("mercado-pago", &body, &[(SIGNATURE_HEADER, "wrong")])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reload(&app, order.order.id).await.order.payment_status, OrderStatus::Pending);

    let (status, _) = app
        .post_webhook("mercado-pago", &body, &[(SIGNATURE_HEADER, "s3cret")])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reload(&app, order.order.id).await.order.payment_status, OrderStatus::Paid);

    let rejected = app
        .state
        .services
        .payments
        .handle_webhook(ProviderKind::MercadoPago, &HeaderMap::new(), b"{}")
        .await;
    assert_matches!(rejected, Err(ServiceError::InvalidWebhookSignature));
}

#[tokio::test]
async fn stale_versions_cannot_overwrite_newer_rows() {
    let app = TestApp::new().await;
    let details = pending_order(&app, "PIX").await;
    let db = app.state.db.as_ref();

    let orders = OrderRepository::new(app.state.db.clone());
    let stale_order = details.order.clone();
    let fresh_order = orders
        .update_versioned(
            db,
            &stale_order,
            order::ActiveModel {
                cancellation_reason: Set(Some("first writer".into())),
                ..Default::default()
            },
        )
        .await
        .expect("first versioned update");
    assert_eq!(fresh_order.version, stale_order.version + 1);

    let conflict = orders
        .update_versioned(
            db,
            &stale_order,
            order::ActiveModel {
                payment_status: Set(OrderStatus::Cancelled),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(conflict, Err(ServiceError::ConcurrentModification(id)) if id == stale_order.id);
    let stored = orders.find_by_id(stale_order.id).await.unwrap().unwrap();
    assert_eq!(stored, fresh_order);
    assert_eq!(stored.payment_status, OrderStatus::Pending);

    let payments = PaymentRepository::new(app.state.db.clone());
    let stale_payment = details.payment.clone().expect("payment row");
    let fresh_payment = payments
        .update_versioned(
            db,
            &stale_payment,
            payment::ActiveModel {
                provider_status: Set(Some("in_process".into())),
                ..Default::default()
            },
        )
        .await
        .expect("first payment update");

    let conflict = payments
        .update_versioned(
            db,
            &stale_payment,
            payment::ActiveModel {
                status: Set(PaymentStatus::Approved),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(conflict, Err(ServiceError::ConcurrentModification(_)));
    let stored = payments.find_by_order(stale_order.id).await.unwrap().unwrap();
    assert_eq!(stored, fresh_payment);
    assert_eq!(stored.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn reconciliation_retries_after_an_interleaved_cancellation() {
    let app = TestApp::new().await;
    let details = pending_order(&app, "PIX").await;
    let id = details.order.id;
    let snapshot = details.payment.clone().expect("payment row");

    // the admin cancels between the webhook's read and its write
    app.state
        .services
        .orders
        .cancel_order(&app.admin, id, Some("fraud check".into()))
        .await
        .expect("cancel");
    app.drain_events().await;

    let event = WebhookEvent {
        order_id: id,
        status: "approved".into(),
        provider_payment_id: None,
    };
    let outcome = app
        .state
        .services
        .payments
        .reconcile_from(ProviderKind::MercadoPago, &event, Some(snapshot.clone()))
        .await
        .expect("reconciled on retry");
    assert_eq!(
        outcome,
        WebhookOutcome::Reconciled {
            payment_status: PaymentStatus::Approved,
            order_status: OrderStatus::Cancelled,
        }
    );

    let after = reload(&app, id).await;
    assert_eq!(after.order.payment_status, OrderStatus::Cancelled);
    assert_eq!(after.order.cancellation_reason.as_deref(), Some("fraud check"));
    // one bump from the cancellation, one from the retried reconciliation
    assert_eq!(after.payment.unwrap().version, snapshot.version + 2);
    assert_eq!(count_payment_approved(&app.drain_events().await), 0);
}

#[tokio::test]
async fn reconciliation_retry_applies_pending_transitions() {
    let app = TestApp::new().await;
    let details = pending_order(&app, "STRIPE").await;
    let id = details.order.id;
    let snapshot = details.payment.clone().expect("payment row");

    deliver(&app, ProviderKind::Stripe, json!({ "orderId": id, "status": "in_process" })).await;

    let event = WebhookEvent {
        order_id: id,
        status: "approved".into(),
        provider_payment_id: None,
    };
    let outcome = app
        .state
        .services
        .payments
        .reconcile_from(ProviderKind::Stripe, &event, Some(snapshot))
        .await
        .expect("reconciled on retry");
    assert_matches!(outcome, WebhookOutcome::Reconciled { order_status: OrderStatus::Paid, .. });

    let after = reload(&app, id).await;
    assert_eq!(after.order.payment_status, OrderStatus::Paid);
    assert_eq!(count_payment_approved(&app.drain_events().await), 1);
}
