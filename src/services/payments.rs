use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{ActiveValue, DatabaseConnection, Set, TransactionTrait};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{ActiveModel as OrderActiveModel, Model as OrderModel, OrderStatus};
use crate::entities::payment::{
    ActiveModel as PaymentActiveModel, Model as PaymentModel, PaymentStatus, ProviderKind,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::providers::{PaymentRequest, PaymentResult, ProviderRegistry, WebhookEvent};
use crate::repositories::{OrderRepository, PaymentRepository};

/// Attempts made when a webhook races another writer on the same order.
pub const MAX_RECONCILE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider: ProviderKind,
    pub provider_id: Option<String>,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub qr_code: Option<String>,
    pub qr_code_base64: Option<String>,
    pub checkout_url: Option<String>,
    pub preference_id: Option<String>,
    pub init_point: Option<String>,
    pub sandbox_init_point: Option<String>,
    pub provider_status: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: Value,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PaymentModel> for PaymentResponse {
    fn from(model: PaymentModel) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            provider: model.provider,
            provider_id: model.provider_id,
            status: model.status,
            amount: model.amount,
            qr_code: model.qr_code,
            qr_code_base64: model.qr_code_base64,
            checkout_url: model.checkout_url,
            preference_id: model.preference_id,
            init_point: model.init_point,
            sandbox_init_point: model.sandbox_init_point,
            provider_status: model.provider_status,
            metadata: model.metadata,
            paid_at: model.paid_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// What a webhook delivery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Nothing to apply: unknown order, stale delivery or an event without status.
    Ignored(&'static str),
    /// Processing failed; logged and acknowledged so the provider stops retrying.
    Failed,
    Reconciled {
        payment_status: PaymentStatus,
        order_status: OrderStatus,
    },
}

impl WebhookOutcome {
    fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Ignored(_) => "ignored",
            WebhookOutcome::Failed => "failed",
            WebhookOutcome::Reconciled { .. } => "reconciled",
        }
    }
}

/// Provider ids a payment row pointed at before a retry or method change.
fn previous_provider_ids(metadata: &Value) -> Vec<String> {
    metadata
        .get("previousProviderIds")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Creates, replaces and cancels provider payments and reconciles provider
/// notifications back into payment and order state.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    payments: Arc<PaymentRepository>,
    orders: Arc<OrderRepository>,
    providers: ProviderRegistry,
    event_sender: Arc<EventSender>,
    currency: String,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        payments: Arc<PaymentRepository>,
        orders: Arc<OrderRepository>,
        providers: ProviderRegistry,
        event_sender: Arc<EventSender>,
        currency: String,
    ) -> Self {
        Self {
            db,
            payments,
            orders,
            providers,
            event_sender,
            currency,
        }
    }

    pub async fn find_for_order(&self, order_id: Uuid) -> Result<Option<PaymentModel>, ServiceError> {
        self.payments.find_by_order(order_id).await
    }

    /// Asks the order's provider for a payment and stores it.
    ///
    /// An existing payment row is rewritten in place, keeping one payment per
    /// order; its old provider id is remembered in `previousProviderIds`.
    #[instrument(skip(self, order), fields(order_id = %order.id, method = %order.payment_method))]
    pub async fn initiate_payment(&self, order: &OrderModel) -> Result<PaymentModel, ServiceError> {
        if order.payment_status != OrderStatus::Pending {
            return Err(ServiceError::OrderCannotBeModified(
                order.payment_status.to_string(),
            ));
        }

        let provider = self.providers.for_method(order.payment_method)?;
        let kind = provider.kind();
        let request = PaymentRequest {
            order_id: order.id,
            method: order.payment_method,
            amount: order.total,
            currency: self.currency.clone(),
            payer_email: order.customer_email.clone(),
            description: format!("Order {}", order.id),
        };

        let result = provider.create_payment(&request).await.map_err(|e| {
            counter!("storefront_payment_initiation_failures_total", 1, "provider" => kind.to_string());
            warn!(provider = %kind, error = %e, "Payment provider rejected payment creation");
            e
        })?;

        let payment = match self.payments.find_by_order(order.id).await? {
            None => self.insert_payment(order, kind, result).await?,
            Some(previous) => self.replace_payment_row(&previous, kind, result).await?,
        };

        info!(payment_id = %payment.id, provider = %kind, "Payment initiated");
        Ok(payment)
    }

    async fn insert_payment(
        &self,
        order: &OrderModel,
        kind: ProviderKind,
        result: PaymentResult,
    ) -> Result<PaymentModel, ServiceError> {
        let now = Utc::now();
        let status = PaymentStatus::from_provider_status(&result.status);
        let payment = PaymentActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            provider: Set(kind),
            provider_id: Set(Some(result.provider_id)),
            status: Set(status),
            amount: Set(order.total),
            qr_code: Set(result.qr_code),
            qr_code_base64: Set(result.qr_code_base64),
            checkout_url: Set(result.checkout_url),
            preference_id: Set(result.preference_id),
            init_point: Set(result.init_point),
            sandbox_init_point: Set(result.sandbox_init_point),
            provider_status: Set(Some(result.status)),
            metadata: Set(json!({
                "externalReference": order.id.to_string(),
                "provider": kind.to_string(),
                "previousProviderIds": [],
            })),
            paid_at: Set((status == PaymentStatus::Approved).then_some(now)),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        };
        self.payments.insert(payment).await
    }

    async fn replace_payment_row(
        &self,
        previous: &PaymentModel,
        kind: ProviderKind,
        result: PaymentResult,
    ) -> Result<PaymentModel, ServiceError> {
        let mut history = previous_provider_ids(&previous.metadata);
        if let Some(old_id) = &previous.provider_id {
            if !history.contains(old_id) {
                history.push(old_id.clone());
            }
        }

        let mut metadata = previous.metadata.clone();
        if !metadata.is_object() {
            metadata = json!({});
        }
        metadata["provider"] = json!(kind.to_string());
        metadata["previousProviderIds"] = json!(history);

        let status = PaymentStatus::from_provider_status(&result.status);
        let changes = PaymentActiveModel {
            provider: Set(kind),
            provider_id: Set(Some(result.provider_id)),
            status: Set(status),
            qr_code: Set(result.qr_code),
            qr_code_base64: Set(result.qr_code_base64),
            checkout_url: Set(result.checkout_url),
            preference_id: Set(result.preference_id),
            init_point: Set(result.init_point),
            sandbox_init_point: Set(result.sandbox_init_point),
            provider_status: Set(Some(result.status)),
            metadata: Set(metadata),
            paid_at: Set((status == PaymentStatus::Approved).then(Utc::now)),
            ..Default::default()
        };
        self.payments
            .update_versioned(self.db.as_ref(), previous, changes)
            .await
    }

    /// Payment for an explicit retry: a live payment is returned as is,
    /// a cancelled or rejected one is replaced with a fresh provider payment.
    pub async fn retry_payment(&self, order: &OrderModel) -> Result<PaymentModel, ServiceError> {
        match self.payments.find_by_order(order.id).await? {
            Some(payment)
                if matches!(payment.status, PaymentStatus::Pending | PaymentStatus::Approved) =>
            {
                debug!(payment_id = %payment.id, "Reusing live payment");
                Ok(payment)
            }
            _ => self.initiate_payment(order).await,
        }
    }

    /// Cancels the current provider payment (best-effort) and creates one for
    /// the order's current payment method.
    pub async fn replace_payment(&self, order: &OrderModel) -> Result<PaymentModel, ServiceError> {
        if let Some(previous) = self.payments.find_by_order(order.id).await? {
            if previous.status == PaymentStatus::Pending {
                self.cancel_remote(&previous).await;
            }
        }
        self.initiate_payment(order).await
    }

    /// Cancels the order's pending payment at the provider and locally.
    /// A provider that no longer knows the payment counts as cancelled.
    pub async fn cancel_for_order(&self, order_id: Uuid) -> Result<Option<PaymentModel>, ServiceError> {
        let Some(payment) = self.payments.find_by_order(order_id).await? else {
            return Ok(None);
        };
        if payment.status != PaymentStatus::Pending {
            return Ok(Some(payment));
        }

        self.cancel_remote(&payment).await;

        let changes = PaymentActiveModel {
            status: Set(PaymentStatus::Cancelled),
            ..Default::default()
        };
        let payment = self
            .payments
            .update_versioned(self.db.as_ref(), &payment, changes)
            .await?;
        Ok(Some(payment))
    }

    async fn cancel_remote(&self, payment: &PaymentModel) {
        let Some(provider_id) = payment.provider_id.as_deref() else {
            return;
        };
        let provider = match self.providers.get(payment.provider) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(payment_id = %payment.id, error = %e, "Cannot cancel payment remotely");
                return;
            }
        };
        match provider.cancel_payment(provider_id).await {
            Ok(outcome) => debug!(payment_id = %payment.id, ?outcome, "Provider payment cancelled"),
            Err(e) => warn!(payment_id = %payment.id, error = %e, "Provider cancel failed"),
        }
    }

    /// Entry point for provider notifications.
    ///
    /// Only a bad signature is returned as an error; every other failure is
    /// logged and reported as [`WebhookOutcome::Failed`].
    #[instrument(skip(self, headers, body), fields(provider = %kind))]
    pub async fn handle_webhook(
        &self,
        kind: ProviderKind,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<WebhookOutcome, ServiceError> {
        let provider = match self.providers.get(kind) {
            Ok(provider) => provider,
            Err(e) => {
                error!(error = %e, "Webhook received for unconfigured provider");
                return Ok(self.record(WebhookOutcome::Failed, kind));
            }
        };

        if let Err(e) = provider.verify_webhook(headers, body) {
            warn!(error = %e, "Webhook signature rejected");
            counter!("storefront_webhooks_total", 1, "provider" => kind.to_string(), "outcome" => "rejected");
            return Err(ServiceError::InvalidWebhookSignature);
        }

        let payload: Value = match serde_json::from_slice(body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Webhook body is not JSON");
                return Ok(self.record(WebhookOutcome::Failed, kind));
            }
        };

        let event = match provider.process_webhook(&payload).await {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(self.record(WebhookOutcome::Ignored("no payment status"), kind)),
            Err(e) => {
                warn!(error = %e, "Webhook could not be processed");
                return Ok(self.record(WebhookOutcome::Failed, kind));
            }
        };

        let outcome = match self.reconcile(kind, &event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(order_id = %event.order_id, error = %e, "Webhook reconciliation failed");
                WebhookOutcome::Failed
            }
        };
        Ok(self.record(outcome, kind))
    }

    fn record(&self, outcome: WebhookOutcome, kind: ProviderKind) -> WebhookOutcome {
        counter!("storefront_webhooks_total", 1, "provider" => kind.to_string(), "outcome" => outcome.label());
        outcome
    }

    /// Applies a provider status to the payment and its order, retrying when
    /// another writer bumped either row's version in between.
    pub async fn reconcile(
        &self,
        kind: ProviderKind,
        event: &WebhookEvent,
    ) -> Result<WebhookOutcome, ServiceError> {
        let payment = self.payments.find_by_order(event.order_id).await?;
        self.reconcile_from(kind, event, payment).await
    }

    /// Reconciles starting from a payment row read earlier. Later attempts
    /// re-read it.
    pub async fn reconcile_from(
        &self,
        kind: ProviderKind,
        event: &WebhookEvent,
        payment: Option<PaymentModel>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let mut payment = payment;
        let mut attempt = 1;
        loop {
            match self.apply_event(kind, event, payment).await {
                Err(ServiceError::ConcurrentModification(id)) if attempt < MAX_RECONCILE_ATTEMPTS => {
                    warn!(%id, attempt, "Concurrent update during reconciliation, retrying");
                    counter!("storefront_reconcile_conflicts_total", 1);
                    attempt += 1;
                    payment = self.payments.find_by_order(event.order_id).await?;
                }
                other => return other,
            }
        }
    }

    async fn apply_event(
        &self,
        kind: ProviderKind,
        event: &WebhookEvent,
        payment: Option<PaymentModel>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let Some(payment) = payment else {
            info!(order_id = %event.order_id, "Webhook for unknown order dropped");
            return Ok(WebhookOutcome::Ignored("unknown order"));
        };

        if payment.provider != kind {
            info!(
                order_id = %event.order_id,
                current = %payment.provider,
                "Webhook from a replaced provider dropped"
            );
            return Ok(WebhookOutcome::Ignored("stale provider"));
        }

        if let (Some(event_id), Some(current_id)) =
            (event.provider_payment_id.as_ref(), payment.provider_id.as_ref())
        {
            // redirect checkouts learn the real payment id from the first notification
            let superseded = event_id != current_id
                && (payment.preference_id.is_none()
                    || previous_provider_ids(&payment.metadata).contains(event_id));
            if superseded {
                info!(order_id = %event.order_id, %event_id, "Webhook for a superseded payment dropped");
                return Ok(WebhookOutcome::Ignored("superseded payment"));
            }
        }

        let new_status = PaymentStatus::from_provider_status(&event.status);
        if new_status == PaymentStatus::Pending && payment.status != PaymentStatus::Pending {
            debug!(order_id = %event.order_id, current = %payment.status, "Late pending notification ignored");
            return Ok(WebhookOutcome::Ignored("out of order"));
        }

        let order = self
            .orders
            .find_by_id(event.order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(event.order_id))?;

        let first_approval =
            new_status == PaymentStatus::Approved && payment.status != PaymentStatus::Approved;
        let paid_at = if new_status == PaymentStatus::Approved {
            payment.paid_at.or_else(|| Some(Utc::now()))
        } else {
            payment.paid_at
        };

        let txn = self.db.begin().await?;

        let payment_changes = PaymentActiveModel {
            status: Set(new_status),
            provider_status: Set(Some(event.status.clone())),
            paid_at: Set(paid_at),
            provider_id: match &event.provider_payment_id {
                Some(id) => Set(Some(id.clone())),
                None => ActiveValue::NotSet,
            },
            ..Default::default()
        };
        let payment = self
            .payments
            .update_versioned(&txn, &payment, payment_changes)
            .await?;

        let next_order_status = match (new_status, order.payment_status) {
            (PaymentStatus::Approved, OrderStatus::Pending) => Some(OrderStatus::Paid),
            (PaymentStatus::Cancelled | PaymentStatus::Rejected, OrderStatus::Pending) => {
                Some(OrderStatus::Cancelled)
            }
            _ => None,
        };

        let order = match next_order_status {
            Some(next) => {
                let mut changes = OrderActiveModel {
                    payment_status: Set(next),
                    ..Default::default()
                };
                if next == OrderStatus::Paid {
                    changes.paid_at = Set(order.paid_at.or(paid_at));
                }
                self.orders.update_versioned(&txn, &order, changes).await?
            }
            None => {
                if new_status != PaymentStatus::Pending && order.payment_status != OrderStatus::Paid {
                    warn!(
                        order_id = %order.id,
                        order_status = %order.payment_status,
                        payment_status = %new_status,
                        "Payment status does not move the order"
                    );
                }
                order
            }
        };

        txn.commit().await?;

        if first_approval && order.payment_status == OrderStatus::Paid {
            self.event_sender
                .send_or_log(Event::PaymentApproved {
                    order_id: order.id,
                    user_id: order.user_id,
                    email: order.customer_email.clone(),
                    amount: payment.amount,
                })
                .await;
        }

        info!(
            order_id = %order.id,
            payment_status = %payment.status,
            order_status = %order.payment_status,
            "Webhook reconciled"
        );
        Ok(WebhookOutcome::Reconciled {
            payment_status: payment.status,
            order_status: order.payment_status,
        })
    }
}
