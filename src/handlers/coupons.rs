use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::services::coupons::{
    CouponQuote, CouponResponse, CreateCouponRequest, QuoteCouponRequest, UpdateCouponRequest,
};
use crate::{auth::AuthUser, errors::ServiceError, ApiResponse, ApiResult, AppState};

/// Look up a redeemable coupon by code
#[utoipa::path(
    get,
    path = "/api/v1/coupons/code/{code}",
    summary = "Get coupon by code",
    params(("code" = String, Path, description = "Coupon code, case-insensitive")),
    responses(
        (status = 200, description = "Coupon is redeemable", body = ApiResponse<CouponResponse>),
        (status = 400, description = "Coupon inactive, expired or exhausted", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Coupons"
)]
pub async fn get_coupon_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<CouponResponse> {
    let coupon = state.services.coupons.get_by_code(&code).await?;
    Ok(Json(ApiResponse::success(coupon.into())))
}

/// Price a subtotal against a coupon without redeeming it
#[utoipa::path(
    post,
    path = "/api/v1/coupons/quote",
    summary = "Quote coupon",
    request_body = QuoteCouponRequest,
    responses(
        (status = 200, description = "Discount breakdown", body = ApiResponse<CouponQuote>),
        (status = 400, description = "Coupon rejected for this subtotal", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Validation error", body = crate::errors::ErrorResponse),
    ),
    tag = "Coupons"
)]
pub async fn quote_coupon(
    State(state): State<AppState>,
    Json(request): Json<QuoteCouponRequest>,
) -> ApiResult<CouponQuote> {
    let quote = state.services.coupons.quote(request).await?;
    Ok(Json(ApiResponse::success(quote)))
}

/// Create a coupon (admin)
#[utoipa::path(
    post,
    path = "/api/v1/coupons",
    summary = "Create coupon",
    request_body = CreateCouponRequest,
    responses(
        (status = 201, description = "Coupon created", body = ApiResponse<CouponResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already in use", body = crate::errors::ErrorResponse),
        (status = 422, description = "Validation error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Coupons"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateCouponRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CouponResponse>>), ServiceError> {
    auth_user.require_admin()?;
    let coupon = state.services.coupons.create(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(coupon.into())),
    ))
}

/// Update a coupon (admin)
#[utoipa::path(
    patch,
    path = "/api/v1/coupons/{id}",
    summary = "Update coupon",
    params(("id" = Uuid, Path, description = "Coupon ID")),
    request_body = UpdateCouponRequest,
    responses(
        (status = 200, description = "Coupon updated", body = ApiResponse<CouponResponse>),
        (status = 400, description = "Usage limit below current usage", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Validation error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Coupons"
)]
pub async fn update_coupon(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateCouponRequest>,
) -> ApiResult<CouponResponse> {
    auth_user.require_admin()?;
    let coupon = state.services.coupons.update(id, request).await?;
    Ok(Json(ApiResponse::success(coupon.into())))
}

/// Delete a coupon (admin); orders that used it keep their discount
#[utoipa::path(
    delete,
    path = "/api/v1/coupons/{id}",
    summary = "Delete coupon",
    params(("id" = Uuid, Path, description = "Coupon ID")),
    responses(
        (status = 204, description = "Coupon deleted"),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Coupons"
)]
pub async fn delete_coupon(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    auth_user.require_admin()?;
    state.services.coupons.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
