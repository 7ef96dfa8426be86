use axum::{body::Bytes, extract::State, http::HeaderMap, response::Json};
use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;

use crate::entities::payment::ProviderKind;
use crate::{errors::ServiceError, AppState};

/// Acknowledgement returned to providers.
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

/// Processing failures are logged and still acknowledged so providers do not
/// retry; only a rejected signature surfaces as an error status.
async fn receive(
    state: &AppState,
    kind: ProviderKind,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<WebhookAck>, ServiceError> {
    let outcome = state
        .services
        .payments
        .handle_webhook(kind, headers, body)
        .await?;
    debug!(provider = %kind, ?outcome, "Webhook handled");
    Ok(Json(WebhookAck { received: true }))
}

/// Mercado Pago notification endpoint
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/mercado-pago",
    summary = "Mercado Pago webhook",
    request_body(content = String, description = "Raw notification body", content_type = "application/json"),
    responses(
        (status = 200, description = "Notification received", body = WebhookAck),
        (status = 400, description = "Invalid signature", body = crate::errors::ErrorResponse),
    ),
    tag = "Webhooks"
)]
pub async fn mercado_pago_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServiceError> {
    receive(&state, ProviderKind::MercadoPago, &headers, &body).await
}

/// Stripe event endpoint
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/stripe",
    summary = "Stripe webhook",
    request_body(content = String, description = "Raw event body", content_type = "application/json"),
    responses(
        (status = 200, description = "Event received", body = WebhookAck),
        (status = 400, description = "Invalid signature", body = crate::errors::ErrorResponse),
    ),
    tag = "Webhooks"
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServiceError> {
    receive(&state, ProviderKind::Stripe, &headers, &body).await
}
