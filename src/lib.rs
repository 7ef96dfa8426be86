//! Storefront API Library
//!
//! Order checkout with coupon discounts, external payment providers and
//! webhook reconciliation.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod health;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod providers;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{
    response::Json,
    routing::{get, patch, post},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Routes mounted under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    // Order checkout and lifecycle; access rules are enforced per operation
    let orders = Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/orders/:id/cancel", patch(handlers::orders::cancel_order))
        .route(
            "/orders/:id/payment-method",
            patch(handlers::orders::update_payment_method),
        )
        .route(
            "/orders/:id/payment",
            get(handlers::orders::get_order_payment).post(handlers::orders::retry_payment),
        );

    let coupons = Router::new()
        .route("/coupons", post(handlers::coupons::create_coupon))
        .route("/coupons/quote", post(handlers::coupons::quote_coupon))
        .route(
            "/coupons/code/:code",
            get(handlers::coupons::get_coupon_by_code),
        )
        .route(
            "/coupons/:id",
            patch(handlers::coupons::update_coupon).delete(handlers::coupons::delete_coupon),
        );

    // Provider callbacks carry no bearer token; signatures are checked per provider
    let webhooks = Router::new()
        .route(
            "/webhooks/mercado-pago",
            post(handlers::payment_webhooks::mercado_pago_webhook),
        )
        .route(
            "/webhooks/stripe",
            post(handlers::payment_webhooks::stripe_webhook),
        );

    Router::new().merge(orders).merge(coupons).merge(webhooks)
}

/// Full application router: API, health probes, docs and per-request
/// tracing. CORS and timeouts are layered on by the binary.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "storefront-api up" }))
        .nest("/api/v1", api_v1_routes())
        .merge(health::health_routes(state.db.clone()))
        .merge(openapi::swagger_ui())
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
