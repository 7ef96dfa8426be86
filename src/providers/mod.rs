//! Payment provider abstraction.
//!
//! Every back-end implements [`PaymentProvider`]. The [`ProviderRegistry`]
//! holds one slot per [`ProviderKind`] and resolves them with an exhaustive
//! match, so a new provider variant does not compile until it is wired here.

pub mod mercado_pago;
pub mod signature;
pub mod stripe;

use async_trait::async_trait;
use axum::http::HeaderMap;
use rust_decimal::Decimal;
use serde_json::Value;
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::{order::PaymentMethod, payment::ProviderKind};
use crate::errors::ServiceError;

pub use mercado_pago::{MercadoPagoConfig, MercadoPagoProvider};
pub use signature::SignatureError;
pub use stripe::{StripeConfig, StripeProvider};

/// Errors raised while talking to a payment provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request timed out")]
    Timeout,

    #[error("provider transport error: {0}")]
    Transport(String),

    #[error("provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("request rejected before reaching the provider: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// What the orchestrator asks a provider to charge.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub order_id: Uuid,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub currency: String,
    pub payer_email: Option<String>,
    pub description: String,
}

/// Provider response to a payment creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentResult {
    pub provider_id: String,
    /// Raw provider status string
    pub status: String,
    pub qr_code: Option<String>,
    pub qr_code_base64: Option<String>,
    pub checkout_url: Option<String>,
    pub preference_id: Option<String>,
    pub init_point: Option<String>,
    pub sandbox_init_point: Option<String>,
}

/// Payment as currently seen by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPayment {
    pub id: String,
    pub status: String,
    pub external_reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The provider no longer knows the payment; treated as a successful cancel.
    AlreadyGone,
}

/// Status change extracted from a provider notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub order_id: Uuid,
    /// Raw provider status, mapped through `PaymentStatus::from_provider_status`
    pub status: String,
    pub provider_payment_id: Option<String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn create_payment(&self, request: &PaymentRequest)
        -> Result<PaymentResult, ProviderError>;

    async fn get_payment(&self, provider_id: &str) -> Result<ProviderPayment, ProviderError>;

    async fn cancel_payment(&self, provider_id: &str) -> Result<CancelOutcome, ProviderError>;

    /// Extracts `(order, status)` from a notification, `None` for event types
    /// that carry no payment status.
    async fn process_webhook(&self, payload: &Value)
        -> Result<Option<WebhookEvent>, ProviderError>;

    /// Checks the delivery signature. Providers without a configured secret accept everything.
    fn verify_webhook(&self, _headers: &HeaderMap, _body: &[u8]) -> Result<(), SignatureError> {
        Ok(())
    }
}

/// Configured providers, one slot per [`ProviderKind`].
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    mercado_pago: Option<Arc<dyn PaymentProvider>>,
    stripe: Option<Arc<dyn PaymentProvider>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("mercado_pago", &self.mercado_pago.is_some())
            .field("stripe", &self.stripe.is_some())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` in the slot matching its kind, replacing any previous one.
    pub fn with_provider(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        match provider.kind() {
            ProviderKind::MercadoPago => self.mercado_pago = Some(provider),
            ProviderKind::Stripe => self.stripe = Some(provider),
        }
        self
    }

    /// Builds every provider whose credentials are present in `cfg`.
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.provider_timeout())
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to build HTTP client: {}", e)))?;

        let mut registry = Self::new();

        if let Some(token) = cfg.mercado_pago_access_token.clone() {
            info!("Mercado Pago provider enabled");
            registry = registry.with_provider(Arc::new(MercadoPagoProvider::new(
                client.clone(),
                MercadoPagoConfig {
                    access_token: token,
                    base_url: cfg.mercado_pago_base_url.clone(),
                    notification_url: cfg.webhook_url("mercado-pago"),
                    return_url: cfg.public_app_url.clone(),
                    webhook_secret: cfg.mercado_pago_webhook_secret.clone(),
                },
            )));
        }

        if let Some(secret_key) = cfg.stripe_secret_key.clone() {
            info!("Stripe provider enabled");
            registry = registry.with_provider(Arc::new(StripeProvider::new(
                client,
                StripeConfig {
                    secret_key,
                    base_url: cfg.stripe_base_url.clone(),
                    return_url: cfg.public_app_url.clone(),
                    webhook_secret: cfg.stripe_webhook_secret.clone(),
                    webhook_tolerance_secs: cfg.webhook_tolerance_secs,
                },
            )));
        }

        Ok(registry)
    }

    /// Provider registered for `kind`; a missing one is a deployment error.
    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn PaymentProvider>, ServiceError> {
        let slot = match kind {
            ProviderKind::MercadoPago => &self.mercado_pago,
            ProviderKind::Stripe => &self.stripe,
        };
        slot.clone()
            .ok_or_else(|| ServiceError::ProviderNotConfigured(kind.to_string()))
    }

    /// Provider settling `method`.
    pub fn for_method(
        &self,
        method: PaymentMethod,
    ) -> Result<Arc<dyn PaymentProvider>, ServiceError> {
        let kind = method
            .provider()
            .ok_or_else(|| ServiceError::PaymentMethodNotSupported(method.to_string()))?;
        self.get(kind)
    }
}

/// Provider ids arrive as JSON strings or numbers depending on the API.
pub(crate) fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
