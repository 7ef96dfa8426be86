//! Stripe client. Orders are charged through hosted Checkout Sessions; ids
//! starting with `cs_` are sessions, anything else is a PaymentIntent.

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    signature::{parse_signature_header, verify_hmac, SignatureError},
    CancelOutcome, PaymentProvider, PaymentRequest, PaymentResult, ProviderError,
    ProviderPayment, WebhookEvent,
};
use crate::entities::payment::ProviderKind;

const SESSION_PREFIX: &str = "cs_";

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub base_url: String,
    pub return_url: String,
    pub webhook_secret: Option<String>,
    pub webhook_tolerance_secs: u64,
}

pub struct StripeProvider {
    client: Client,
    config: StripeConfig,
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

impl CheckoutSession {
    /// Collapses Stripe's two session fields into one payment status.
    fn effective_status(&self) -> &str {
        match (self.status.as_deref(), self.payment_status.as_deref()) {
            (_, Some("paid")) | (_, Some("no_payment_required")) => "approved",
            (Some("expired"), _) => "rejected",
            _ => "pending",
        }
    }

    fn order_reference(&self) -> Option<String> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("order_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.client_reference_id.clone())
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    #[serde(default)]
    metadata: Option<Value>,
}

fn intent_status(status: &str) -> &str {
    match status {
        "succeeded" => "approved",
        "canceled" => "cancelled",
        "requires_payment_method" | "requires_confirmation" | "requires_action"
        | "processing" | "requires_capture" => "pending",
        other => other,
    }
}

/// Converts a decimal currency amount to minor units.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (amount * Decimal::ONE_HUNDRED).round().to_i64()
}

impl StripeProvider {
    pub fn new(client: Client, mut config: StripeConfig) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Stripe API error: {}", body);
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    fn is_resource_missing(status: StatusCode, body: &str) -> bool {
        if status == StatusCode::NOT_FOUND {
            return true;
        }
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("error")?.get("code")?.as_str().map(str::to_string))
            .is_some_and(|code| code == "resource_missing")
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentResult, ProviderError> {
        let unit_amount = to_minor_units(request.amount)
            .filter(|cents| *cents > 0)
            .ok_or_else(|| {
                ProviderError::InvalidRequest(format!("invalid amount {}", request.amount))
            })?;

        let return_base = self.config.return_url.trim_end_matches('/');
        let order_id = request.order_id.to_string();
        let mut params: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("client_reference_id".into(), order_id.clone()),
            ("metadata[order_id]".into(), order_id.clone()),
            (
                "success_url".into(),
                format!("{}/orders/{}?checkout=success", return_base, order_id),
            ),
            (
                "cancel_url".into(),
                format!("{}/orders/{}?checkout=cancelled", return_base, order_id),
            ),
            ("line_items[0][quantity]".into(), "1".into()),
            (
                "line_items[0][price_data][currency]".into(),
                request.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                unit_amount.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".into(),
                request.description.clone(),
            ),
        ];
        if let Some(email) = &request.payer_email {
            params.push(("customer_email".into(), email.clone()));
        }

        let response = self
            .client
            .post(self.url("/v1/checkout/sessions"))
            .basic_auth(&self.config.secret_key, Some(""))
            .header("Idempotency-Key", format!("checkout-{}", order_id))
            .form(&params)
            .send()
            .await?;

        let session: CheckoutSession = Self::read_json(response).await?;
        info!("Checkout session created: {}", session.id);

        Ok(PaymentResult {
            status: session.effective_status().to_string(),
            provider_id: session.id,
            checkout_url: session.url,
            ..Default::default()
        })
    }

    async fn get_payment(&self, provider_id: &str) -> Result<ProviderPayment, ProviderError> {
        if provider_id.starts_with(SESSION_PREFIX) {
            let response = self
                .client
                .get(self.url(&format!("/v1/checkout/sessions/{}", provider_id)))
                .basic_auth(&self.config.secret_key, Some(""))
                .send()
                .await?;
            let session: CheckoutSession = Self::read_json(response).await?;
            return Ok(ProviderPayment {
                status: session.effective_status().to_string(),
                external_reference: session.order_reference(),
                id: session.id,
            });
        }

        let response = self
            .client
            .get(self.url(&format!("/v1/payment_intents/{}", provider_id)))
            .basic_auth(&self.config.secret_key, Some(""))
            .send()
            .await?;
        let intent: PaymentIntent = Self::read_json(response).await?;
        Ok(ProviderPayment {
            status: intent_status(&intent.status).to_string(),
            external_reference: intent
                .metadata
                .as_ref()
                .and_then(|m| m.get("order_id"))
                .and_then(Value::as_str)
                .map(str::to_string),
            id: intent.id,
        })
    }

    async fn cancel_payment(&self, provider_id: &str) -> Result<CancelOutcome, ProviderError> {
        let path = if provider_id.starts_with(SESSION_PREFIX) {
            format!("/v1/checkout/sessions/{}/expire", provider_id)
        } else {
            format!("/v1/payment_intents/{}/cancel", provider_id)
        };

        let response = self
            .client
            .post(self.url(&path))
            .basic_auth(&self.config.secret_key, Some(""))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(CancelOutcome::Cancelled);
        }
        let body = response.text().await.unwrap_or_default();
        if Self::is_resource_missing(status, &body) {
            Ok(CancelOutcome::AlreadyGone)
        } else {
            Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn process_webhook(
        &self,
        payload: &Value,
    ) -> Result<Option<WebhookEvent>, ProviderError> {
        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let forced_status = match event_type {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => None,
            "checkout.session.expired" | "checkout.session.async_payment_failed" => {
                Some("rejected")
            }
            _ => {
                debug!(event_type, "ignoring Stripe event");
                return Ok(None);
            }
        };

        let object = payload
            .get("data")
            .and_then(|d| d.get("object"))
            .cloned()
            .ok_or_else(|| ProviderError::InvalidRequest("event has no data.object".into()))?;
        let session: CheckoutSession = serde_json::from_value(object)
            .map_err(|e| ProviderError::InvalidRequest(format!("invalid session: {}", e)))?;

        // a completed session may still be awaiting an async payment
        let status = match forced_status {
            Some(status) => status,
            None => session.effective_status(),
        };

        let order_id = match session.order_reference().as_deref().map(Uuid::parse_str) {
            Some(Ok(order_id)) => order_id,
            _ => {
                warn!(session_id = %session.id, "Stripe session has no order reference");
                return Ok(None);
            }
        };

        Ok(Some(WebhookEvent {
            order_id,
            status: status.to_string(),
            provider_payment_id: Some(session.id.clone()),
        }))
    }

    fn verify_webhook(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), SignatureError> {
        let Some(secret) = self.config.webhook_secret.as_deref() else {
            return Ok(());
        };

        let raw = headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or(SignatureError::Missing)?;
        let header = parse_signature_header(raw);
        let timestamp: i64 = header
            .timestamp
            .and_then(|t| t.parse().ok())
            .ok_or(SignatureError::Malformed)?;
        if header.signatures.is_empty() {
            return Err(SignatureError::Malformed);
        }

        let age = (Utc::now().timestamp() - timestamp).unsigned_abs();
        if age > self.config.webhook_tolerance_secs {
            return Err(SignatureError::Expired);
        }

        let mut signed = format!("{}.", timestamp).into_bytes();
        signed.extend_from_slice(body);
        verify_hmac(secret, &signed, &header.signatures)
    }
}
