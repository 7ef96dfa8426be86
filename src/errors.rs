use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::providers::ProviderError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "success": false,
    "message": "Coupon has expired",
    "code": "COUPON_EXPIRED",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// Always false
    pub success: bool,
    /// Human-readable error description
    #[schema(example = "Coupon has expired")]
    pub message: String,
    /// Stable machine-readable code for client branching
    #[schema(example = "COUPON_EXPIRED")]
    pub code: String,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Coupon not found")]
    CouponNotFound,

    #[error("Coupon is not active")]
    CouponInactive,

    #[error("Coupon has expired")]
    CouponExpired,

    #[error("Coupon usage limit exceeded")]
    CouponUsageLimitExceeded,

    #[error("Order subtotal {subtotal} is below the coupon minimum of {minimum}")]
    CouponMinimumOrderValueNotMet {
        subtotal: rust_decimal::Decimal,
        minimum: rust_decimal::Decimal,
    },

    #[error("New usage limit {limit} must be greater than the current usage count {usage_count}")]
    CouponUsageLimitTooLow { limit: i32, usage_count: i32 },

    #[error("Coupon code {0} is already in use")]
    CouponCodeTaken(String),

    #[error("Order {0} not found")]
    OrderNotFound(Uuid),

    #[error("Order is already cancelled")]
    OrderAlreadyCancelled,

    #[error("Order cannot be modified in status {0}")]
    OrderCannotBeModified(String),

    #[error("Products not found: {}", .0.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", "))]
    ProductNotFound(Vec<Uuid>),

    #[error("Payment for order {0} not found")]
    PaymentNotFound(Uuid),

    #[error("Payment method {0} is not supported")]
    PaymentMethodNotSupported(String),

    #[error("Payment provider error: {0}")]
    PaymentProviderError(#[from] ProviderError),

    #[error("Payment provider {0} is not configured")]
    ProviderNotConfigured(String),

    #[error("Invalid webhook signature")]
    InvalidWebhookSignature,

    #[error("Access denied")]
    AccessDenied,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::CouponNotFound | Self::OrderNotFound(_) | Self::PaymentNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::CouponInactive
            | Self::CouponExpired
            | Self::CouponUsageLimitExceeded
            | Self::CouponMinimumOrderValueNotMet { .. }
            | Self::CouponUsageLimitTooLow { .. }
            | Self::OrderAlreadyCancelled
            | Self::OrderCannotBeModified(_)
            | Self::ProductNotFound(_)
            | Self::PaymentMethodNotSupported(_)
            | Self::InvalidWebhookSignature => StatusCode::BAD_REQUEST,
            Self::CouponCodeTaken(_) | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::PaymentProviderError(_) => StatusCode::BAD_GATEWAY,
            Self::AccessDenied => StatusCode::FORBIDDEN,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::DatabaseError(_)
            | Self::ProviderNotConfigured(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable code clients branch on.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CouponNotFound => "COUPON_NOT_FOUND",
            Self::CouponInactive => "COUPON_INACTIVE",
            Self::CouponExpired => "COUPON_EXPIRED",
            Self::CouponUsageLimitExceeded => "COUPON_USAGE_LIMIT_EXCEEDED",
            Self::CouponMinimumOrderValueNotMet { .. } => "COUPON_MINIMUM_ORDER_VALUE_NOT_MET",
            Self::CouponUsageLimitTooLow { .. } => {
                "COUPON_NEW_USAGE_LIMIT_EQUALS_OR_LOWER_THAN_USAGE_COUNT"
            }
            Self::CouponCodeTaken(_) => "COUPON_CODE_TAKEN",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::OrderAlreadyCancelled => "E_ORDER_ALREADY_CANCELLED",
            Self::OrderCannotBeModified(_) => "E_ORDER_CANNOT_BE_MODIFIED",
            Self::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            Self::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            Self::PaymentMethodNotSupported(_) => "PAYMENT_METHOD_NOT_SUPPORTED",
            Self::PaymentProviderError(_) => "PAYMENT_PROVIDER_ERROR",
            Self::InvalidWebhookSignature => "INVALID_WEBHOOK_SIGNATURE",
            Self::AccessDenied => "E_ACCESS_DENIED",
            Self::Unauthorized(_) => "E_UNAUTHORIZED",
            Self::ValidationError(_) => "E_VALIDATION_FAILURE",
            Self::ConcurrentModification(_) => "E_CONCURRENT_MODIFICATION",
            Self::DatabaseError(_)
            | Self::ProviderNotConfigured(_)
            | Self::InternalError(_)
            | Self::Other(_) => "E_INTERNAL_SERVER_ERROR",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_)
            | Self::ProviderNotConfigured(_)
            | Self::InternalError(_)
            | Self::Other(_) => "Internal server error".to_string(),
            Self::PaymentProviderError(_) => "Payment provider request failed".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }

        let err = ErrorResponse {
            success: false,
            message: self.response_message(),
            code: self.code().to_string(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
