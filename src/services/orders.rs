use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, str::FromStr, sync::Arc};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::order::{ActiveModel as OrderActiveModel, Model as OrderModel, OrderStatus, PaymentMethod},
    entities::order_item::{ActiveModel as OrderItemActiveModel, Model as OrderItemModel},
    entities::payment::Model as PaymentModel,
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::{CouponRepository, OrderRepository, ProductRepository},
    services::{
        coupons::CouponService,
        discounts::{price_order, CouponSnapshot, MAX_ORDER_AMOUNT},
        payments::{PaymentResponse, PaymentService},
    },
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 10000, message = "Quantity must be between 1 and 10000"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 100, message = "Order must contain between 1 and 100 items"))]
    pub items: Vec<OrderItemInput>,
    #[schema(example = "PIX")]
    pub payment_method: String,
    pub coupon_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct CancelOrderRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePaymentMethodRequest {
    #[validate(length(min = 1, max = 32))]
    #[schema(example = "STRIPE")]
    pub payment_method: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payment_method: PaymentMethod,
    pub payment_status: OrderStatus,
    pub coupon_id: Option<Uuid>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
    pub payment: Option<PaymentResponse>,
}

/// The authenticated caller, as the order rules see it.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub is_admin: bool,
}

impl Actor {
    pub fn can_access(&self, order: &OrderModel) -> bool {
        self.is_admin || order.user_id == self.user_id
    }
}

/// An order with everything it owns.
#[derive(Debug, Clone)]
pub struct OrderDetails {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
    pub payment: Option<PaymentModel>,
}

impl From<OrderDetails> for OrderResponse {
    fn from(details: OrderDetails) -> Self {
        let OrderDetails {
            order,
            items,
            payment,
        } = details;
        Self {
            id: order.id,
            user_id: order.user_id,
            payment_method: order.payment_method,
            payment_status: order.payment_status,
            coupon_id: order.coupon_id,
            subtotal: order.total + order.discount,
            discount: order.discount,
            total: order.total,
            paid_at: order.paid_at,
            cancellation_reason: order.cancellation_reason,
            created_at: order.created_at,
            updated_at: order.updated_at,
            items: items
                .into_iter()
                .map(|item| OrderItemResponse {
                    line_total: item.line_total(),
                    id: item.id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price: item.price,
                })
                .collect(),
            payment: payment.map(PaymentResponse::from),
        }
    }
}

/// Parses a client-supplied method, accepting only those a provider can settle.
pub fn parse_payment_method(raw: &str) -> Result<PaymentMethod, ServiceError> {
    PaymentMethod::from_str(raw.trim())
        .ok()
        .filter(|method| method.is_supported())
        .ok_or_else(|| ServiceError::PaymentMethodNotSupported(raw.to_string()))
}

/// Collapses repeated products into one line, keeping first-seen order.
fn merge_lines(items: &[OrderItemInput]) -> Vec<(Uuid, i32)> {
    let mut lines: Vec<(Uuid, i32)> = Vec::with_capacity(items.len());
    for item in items {
        match lines.iter_mut().find(|(id, _)| *id == item.product_id) {
            Some((_, quantity)) => *quantity = quantity.saturating_add(item.quantity),
            None => lines.push((item.product_id, item.quantity)),
        }
    }
    lines
}

/// Order orchestration: pricing, atomic persistence with coupon redemption,
/// and the payment lifecycle around the order state machine.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    orders: Arc<OrderRepository>,
    products: Arc<ProductRepository>,
    coupon_repository: Arc<CouponRepository>,
    coupons: Arc<CouponService>,
    payments: Arc<PaymentService>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        orders: Arc<OrderRepository>,
        products: Arc<ProductRepository>,
        coupon_repository: Arc<CouponRepository>,
        coupons: Arc<CouponService>,
        payments: Arc<PaymentService>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            orders,
            products,
            coupon_repository,
            coupons,
            payments,
            event_sender,
        }
    }

    /// Creates an order.
    ///
    /// Order, items and the coupon redemption are written in one transaction.
    /// The provider payment is requested only after commit and its failure
    /// does not fail the call.
    #[instrument(skip(self, actor, request), fields(user_id = %actor.user_id))]
    pub async fn create_order(
        &self,
        actor: &Actor,
        request: CreateOrderRequest,
    ) -> Result<OrderDetails, ServiceError> {
        request.validate()?;
        for item in &request.items {
            item.validate()?;
        }
        let method = parse_payment_method(&request.payment_method)?;

        let lines = merge_lines(&request.items);
        let ids: Vec<Uuid> = lines.iter().map(|(id, _)| *id).collect();
        let prices: HashMap<Uuid, Decimal> = self
            .products
            .find_many(&ids)
            .await?
            .into_iter()
            .map(|product| (product.id, product.price))
            .collect();

        let mut missing = Vec::new();
        let mut priced = Vec::with_capacity(lines.len());
        for (product_id, quantity) in lines {
            match prices.get(&product_id) {
                Some(price) => priced.push((product_id, quantity, *price)),
                None => missing.push(product_id),
            }
        }
        if !missing.is_empty() {
            return Err(ServiceError::ProductNotFound(missing));
        }

        let subtotal = priced
            .iter()
            .try_fold(Decimal::ZERO, |acc, (_, quantity, price)| {
                price
                    .checked_mul(Decimal::from(*quantity))
                    .and_then(|line| acc.checked_add(line))
            })
            .filter(|subtotal| *subtotal <= MAX_ORDER_AMOUNT)
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "order subtotal cannot exceed {}",
                    MAX_ORDER_AMOUNT
                ))
            })?;

        let coupon = match request.coupon_id {
            Some(coupon_id) => Some(self.coupons.get_redeemable(coupon_id).await?),
            None => None,
        };
        let snapshot = coupon.as_ref().map(CouponSnapshot::from);
        let pricing = price_order(subtotal, snapshot.as_ref());

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let status = if pricing.total <= Decimal::ZERO {
            OrderStatus::Paid
        } else {
            OrderStatus::Pending
        };

        let order = OrderActiveModel {
            id: Set(order_id),
            user_id: Set(actor.user_id),
            customer_email: Set(actor.email.clone()),
            payment_method: Set(method),
            payment_status: Set(status),
            coupon_id: Set(request.coupon_id),
            total: Set(pricing.total),
            discount: Set(pricing.discount),
            paid_at: Set((status == OrderStatus::Paid).then_some(now)),
            cancellation_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        };
        // request validation caps an order at 100 lines
        let items = priced
            .iter()
            .enumerate()
            .map(|(position, (product_id, quantity, price))| OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                position: Set(position as i32),
                product_id: Set(*product_id),
                quantity: Set(*quantity),
                price: Set(*price),
                created_at: Set(now),
            })
            .collect();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let (order, items) = self.orders.insert_with_items(&txn, order, items).await?;

        if pricing.discount > Decimal::ZERO {
            if let Some(coupon) = &coupon {
                let redeemed = self
                    .coupon_repository
                    .increment_usage_if_available(&txn, coupon.id)
                    .await?;
                if !redeemed {
                    txn.rollback().await?;
                    counter!("storefront_coupon_redemptions_rejected_total", 1);
                    warn!(coupon_id = %coupon.id, "Coupon usage limit reached during checkout");
                    return Err(ServiceError::CouponUsageLimitExceeded);
                }
            }
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        counter!("storefront_orders_created_total", 1, "status" => order.payment_status.to_string());
        info!(
            order_id = %order.id,
            total = %order.total,
            discount = %order.discount,
            status = %order.payment_status,
            "Order created"
        );

        let payment = if order.payment_status == OrderStatus::Pending {
            match self.payments.initiate_payment(&order).await {
                Ok(payment) => Some(payment),
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "Payment initiation failed; order kept pending");
                    None
                }
            }
        } else {
            None
        };

        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                user_id: order.user_id,
                email: order.customer_email.clone(),
                status: order.payment_status,
                total: order.total,
            })
            .await;

        Ok(OrderDetails {
            order,
            items,
            payment,
        })
    }

    /// Order with items and payment. Orders of other users read as missing.
    pub async fn get_order(&self, actor: &Actor, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = self.find_visible(actor, order_id).await?;
        self.load_details(order).await
    }

    pub async fn get_payment(&self, actor: &Actor, order_id: Uuid) -> Result<PaymentModel, ServiceError> {
        let order = self.find_visible(actor, order_id).await?;
        self.payments
            .find_for_order(order.id)
            .await?
            .ok_or(ServiceError::PaymentNotFound(order.id))
    }

    /// Cancels a pending order or charges back a paid one.
    #[instrument(skip(self, actor, reason))]
    pub async fn cancel_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderDetails, ServiceError> {
        if !actor.is_admin {
            return Err(ServiceError::AccessDenied);
        }

        let order = self.find(order_id).await?;
        let next = match order.payment_status {
            OrderStatus::Cancelled => return Err(ServiceError::OrderAlreadyCancelled),
            OrderStatus::Paid => OrderStatus::ChargedBack,
            OrderStatus::Pending => OrderStatus::Cancelled,
            OrderStatus::ChargedBack => {
                return Err(ServiceError::OrderCannotBeModified(
                    order.payment_status.to_string(),
                ))
            }
        };
        if !order.payment_status.can_transition_to(next) {
            return Err(ServiceError::OrderCannotBeModified(
                order.payment_status.to_string(),
            ));
        }

        let changes = OrderActiveModel {
            payment_status: Set(next),
            cancellation_reason: Set(reason.clone()),
            ..Default::default()
        };
        let updated = self
            .orders
            .update_versioned(self.db.as_ref(), &order, changes)
            .await?;

        let was_paid = order.payment_status == OrderStatus::Paid;
        if !was_paid {
            if let Err(e) = self.payments.cancel_for_order(order.id).await {
                warn!(order_id = %order.id, error = %e, "Failed to cancel payment for cancelled order");
            }
        }

        info!(order_id = %order.id, from = %order.payment_status, to = %next, "Order cancelled");
        self.event_sender
            .send_or_log(Event::OrderCancelled {
                order_id: updated.id,
                user_id: updated.user_id,
                email: updated.customer_email.clone(),
                was_paid,
                reason,
            })
            .await;

        self.load_details(updated).await
    }

    /// Switches a pending order to another method and re-issues its payment.
    #[instrument(skip(self, actor))]
    pub async fn update_payment_method(
        &self,
        actor: &Actor,
        order_id: Uuid,
        payment_method: &str,
    ) -> Result<OrderDetails, ServiceError> {
        let method = parse_payment_method(payment_method)?;
        let order = self.find(order_id).await?;
        if !actor.can_access(&order) {
            return Err(ServiceError::AccessDenied);
        }
        if order.payment_status != OrderStatus::Pending {
            return Err(ServiceError::OrderCannotBeModified(
                order.payment_status.to_string(),
            ));
        }

        let order = if order.payment_method == method {
            order
        } else {
            let changes = OrderActiveModel {
                payment_method: Set(method),
                ..Default::default()
            };
            self.orders
                .update_versioned(self.db.as_ref(), &order, changes)
                .await?
        };

        if let Err(e) = self.payments.replace_payment(&order).await {
            warn!(order_id = %order.id, error = %e, "Payment re-initiation failed after method change");
        }

        info!(order_id = %order.id, method = %method, "Payment method updated");
        self.load_details(order).await
    }

    /// Explicit payment (re)creation for a pending order; provider errors
    /// are returned to the caller.
    pub async fn retry_payment(&self, actor: &Actor, order_id: Uuid) -> Result<PaymentModel, ServiceError> {
        let order = self.find(order_id).await?;
        if !actor.can_access(&order) {
            return Err(ServiceError::AccessDenied);
        }
        if order.payment_status != OrderStatus::Pending {
            return Err(ServiceError::OrderCannotBeModified(
                order.payment_status.to_string(),
            ));
        }
        self.payments.retry_payment(&order).await
    }

    async fn find(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        self.orders
            .find_by_id(order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))
    }

    async fn find_visible(&self, actor: &Actor, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let order = self.find(order_id).await?;
        if actor.can_access(&order) {
            Ok(order)
        } else {
            Err(ServiceError::OrderNotFound(order_id))
        }
    }

    async fn load_details(&self, order: OrderModel) -> Result<OrderDetails, ServiceError> {
        let items = self.orders.find_items(order.id).await?;
        let payment = self.payments.find_for_order(order.id).await?;
        Ok(OrderDetails {
            order,
            items,
            payment,
        })
    }
}
