use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront API

Order checkout with coupon discounts and external payment providers.

## Authentication

Order and coupon administration endpoints require a JWT issued by the identity service:

```
Authorization: Bearer <your-jwt-token>
```

Admin endpoints additionally require the `admin` role claim.

## Error Handling

Errors share one envelope with a stable `code` for client branching:

```json
{
  "success": false,
  "message": "Coupon has expired",
  "code": "COUPON_EXPIRED",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Order checkout and lifecycle"),
        (name = "Payments", description = "Payments attached to orders"),
        (name = "Coupons", description = "Coupon lookup, quotes and administration"),
        (name = "Webhooks", description = "Payment provider notifications"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::update_payment_method,
        // Payments
        crate::handlers::orders::get_order_payment,
        crate::handlers::orders::retry_payment,
        // Coupons
        crate::handlers::coupons::get_coupon_by_code,
        crate::handlers::coupons::quote_coupon,
        crate::handlers::coupons::create_coupon,
        crate::handlers::coupons::update_coupon,
        crate::handlers::coupons::delete_coupon,
        // Webhooks
        crate::handlers::payment_webhooks::mercado_pago_webhook,
        crate::handlers::payment_webhooks::stripe_webhook,
        // Health
        crate::health::health_check,
        crate::health::readiness_check,
    ),
    components(
        schemas(
            // Order types
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::OrderItemInput,
            crate::services::orders::CancelOrderRequest,
            crate::services::orders::UpdatePaymentMethodRequest,
            crate::services::orders::OrderResponse,
            crate::services::orders::OrderItemResponse,
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentMethod,
            // Payment types
            crate::services::payments::PaymentResponse,
            crate::entities::payment::PaymentStatus,
            crate::entities::payment::ProviderKind,
            crate::handlers::payment_webhooks::WebhookAck,
            // Coupon types
            crate::services::coupons::CreateCouponRequest,
            crate::services::coupons::UpdateCouponRequest,
            crate::services::coupons::QuoteCouponRequest,
            crate::services::coupons::CouponResponse,
            crate::services::coupons::CouponQuote,
            crate::services::discounts::DiscountBreakdown,
            crate::entities::coupon::DiscountType,
            // Error types
            crate::errors::ErrorResponse,
            crate::ResponseMeta,
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
