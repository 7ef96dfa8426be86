use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::services::orders::{
    CancelOrderRequest, CreateOrderRequest, OrderResponse, UpdatePaymentMethodRequest,
};
use crate::services::payments::PaymentResponse;
use crate::{auth::AuthUser, errors::ServiceError, ApiResponse, ApiResult, AppState};

/// Create a new order
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Prices the items, redeems the coupon and requests a payment from the provider bound to the payment method",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created successfully", body = ApiResponse<OrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Coupon rejected, unknown product or unsupported payment method", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Validation error", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let details = state
        .services
        .orders
        .create_order(&auth_user.actor(), request)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(OrderResponse::from(details))),
    ))
}

/// Get an order by id
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order returned", body = ApiResponse<OrderResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let details = state
        .services
        .orders
        .get_order(&auth_user.actor(), id)
        .await?;
    Ok(Json(ApiResponse::success(details.into())))
}

/// Cancel an order (admin)
///
/// A pending order becomes CANCELLED; a paid order becomes CHARGED_BACK.
#[utoipa::path(
    patch,
    path = "/api/v1/orders/{id}/cancel",
    summary = "Cancel order",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = CancelOrderRequest,
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Order already cancelled or charged back", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order modified concurrently", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    request: Option<Json<CancelOrderRequest>>,
) -> ApiResult<OrderResponse> {
    let reason = request.and_then(|Json(body)| body.reason);
    let details = state
        .services
        .orders
        .cancel_order(&auth_user.actor(), id, reason)
        .await?;
    let message = format!("Order moved to {}", details.order.payment_status);
    Ok(Json(ApiResponse::success(details.into()).with_message(message)))
}

/// Switch the payment method of a pending order
#[utoipa::path(
    patch,
    path = "/api/v1/orders/{id}/payment-method",
    summary = "Change payment method",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdatePaymentMethodRequest,
    responses(
        (status = 200, description = "Payment method updated", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Order not pending or method unsupported", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn update_payment_method(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePaymentMethodRequest>,
) -> ApiResult<OrderResponse> {
    let details = state
        .services
        .orders
        .update_payment_method(&auth_user.actor(), id, &request.payment_method)
        .await?;
    Ok(Json(ApiResponse::success(details.into())))
}

/// Get the payment attached to an order
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/payment",
    summary = "Get order payment",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Payment returned", body = ApiResponse<PaymentResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order or payment not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Payments"
)]
pub async fn get_order_payment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<PaymentResponse> {
    let payment = state
        .services
        .orders
        .get_payment(&auth_user.actor(), id)
        .await?;
    Ok(Json(ApiResponse::success(payment.into())))
}

/// Request a fresh payment for a pending order
///
/// An open payment is returned as-is instead of creating a second one.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payment",
    summary = "Retry payment",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Payment ready", body = ApiResponse<PaymentResponse>),
        (status = 400, description = "Order not pending", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Provider request failed", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Payments"
)]
pub async fn retry_payment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<PaymentResponse> {
    let payment = state
        .services
        .orders
        .retry_payment(&auth_user.actor(), id)
        .await?;
    Ok(Json(ApiResponse::success(payment.into())))
}
