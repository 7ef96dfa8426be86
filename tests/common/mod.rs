#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use storefront_api::{
    auth,
    config::AppConfig,
    db::{self, DbConfig},
    entities::{coupon::DiscountType, payment::ProviderKind},
    events::{Event, EventSender},
    handlers::AppServices,
    providers::{
        CancelOutcome, PaymentProvider, PaymentRequest, PaymentResult, ProviderError,
        ProviderPayment, ProviderRegistry, SignatureError, WebhookEvent,
    },
    repositories::ProductRepository,
    services::{coupons::CreateCouponRequest, orders::Actor},
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const SIGNATURE_HEADER: &str = "x-fake-signature";

/// Scripted in-process provider.
///
/// Webhook payloads are `{"orderId": .., "status": .., "paymentId"?: ..}`;
/// `{"type": "ping"}` carries no status.
pub struct FakeProvider {
    kind: ProviderKind,
    fail_create: AtomicBool,
    created: AtomicUsize,
    cancelled: Mutex<Vec<String>>,
    webhook_secret: Option<String>,
}

impl FakeProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            fail_create: AtomicBool::new(false),
            created: AtomicUsize::new(0),
            cancelled: Mutex::new(Vec::new()),
            webhook_secret: None,
        }
    }

    pub fn with_secret(mut self, secret: &str) -> Self {
        self.webhook_secret = Some(secret.to_string());
        self
    }

    pub fn fail_next_creates(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    fn prefix(&self) -> &'static str {
        match self.kind {
            ProviderKind::MercadoPago => "mp",
            ProviderKind::Stripe => "cs_test",
        }
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentResult, ProviderError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                status: 503,
                body: "provider unavailable".into(),
            });
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let provider_id = format!("{}_{}", self.prefix(), n);
        let mut result = PaymentResult {
            provider_id: provider_id.clone(),
            status: "pending".into(),
            ..Default::default()
        };
        match self.kind {
            ProviderKind::MercadoPago => {
                result.qr_code = Some(format!("00020126-{}-{}", request.order_id, request.amount));
            }
            ProviderKind::Stripe => {
                result.checkout_url = Some(format!("https://checkout.test/{}", provider_id));
            }
        }
        Ok(result)
    }

    async fn get_payment(&self, provider_id: &str) -> Result<ProviderPayment, ProviderError> {
        Ok(ProviderPayment {
            id: provider_id.to_string(),
            status: "pending".into(),
            external_reference: None,
        })
    }

    async fn cancel_payment(&self, provider_id: &str) -> Result<CancelOutcome, ProviderError> {
        self.cancelled.lock().unwrap().push(provider_id.to_string());
        Ok(CancelOutcome::Cancelled)
    }

    async fn process_webhook(&self, payload: &Value) -> Result<Option<WebhookEvent>, ProviderError> {
        if payload.get("type").and_then(Value::as_str) == Some("ping") {
            return Ok(None);
        }
        let order_id = payload
            .get("orderId")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| ProviderError::InvalidResponse("missing orderId".into()))?;
        let status = payload
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::InvalidResponse("missing status".into()))?;
        Ok(Some(WebhookEvent {
            order_id,
            status: status.to_string(),
            provider_payment_id: payload
                .get("paymentId")
                .and_then(Value::as_str)
                .map(str::to_string),
        }))
    }

    fn verify_webhook(&self, headers: &HeaderMap, _body: &[u8]) -> Result<(), SignatureError> {
        let Some(secret) = &self.webhook_secret else {
            return Ok(());
        };
        let provided = headers
            .get(SIGNATURE_HEADER)
            .ok_or(SignatureError::Missing)?
            .to_str()
            .map_err(|_| SignatureError::Malformed)?;
        if provided == secret {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}

/// Application wired against in-memory SQLite and two fake providers.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub mercado_pago: Arc<FakeProvider>,
    pub stripe: Arc<FakeProvider>,
    events: tokio::sync::Mutex<mpsc::Receiver<Event>>,
    pub customer: Actor,
    pub other_customer: Actor,
    pub admin: Actor,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_providers(
            FakeProvider::new(ProviderKind::MercadoPago),
            FakeProvider::new(ProviderKind::Stripe),
        )
        .await
    }

    pub async fn with_providers(mercado_pago: FakeProvider, stripe: FakeProvider) -> Self {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );

        // A single connection keeps the in-memory database alive and shared.
        let pool = db::establish_connection_with_config(&DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let mercado_pago = Arc::new(mercado_pago);
        let stripe = Arc::new(stripe);
        let providers = ProviderRegistry::new()
            .with_provider(mercado_pago.clone())
            .with_provider(stripe.clone());

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);

        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            providers,
            cfg.currency.clone(),
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        Self {
            router: storefront_api::app_router(state.clone()),
            state,
            mercado_pago,
            stripe,
            events: tokio::sync::Mutex::new(event_rx),
            customer: actor("buyer@example.com", false),
            other_customer: actor("someone@example.com", false),
            admin: actor("admin@example.com", true),
        }
    }

    pub fn token_for(&self, actor: &Actor) -> String {
        let roles = if actor.is_admin {
            vec![auth::ADMIN_ROLE.to_string()]
        } else {
            vec!["customer".to_string()]
        };
        auth::issue_token(
            JWT_SECRET,
            actor.user_id,
            actor.email.clone(),
            roles,
            Duration::hours(1),
        )
        .expect("issue test token")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal) -> Uuid {
        ProductRepository::new(self.state.db.clone())
            .create(name, price)
            .await
            .expect("seed product")
            .id
    }

    /// Active coupon valid from yesterday for thirty days.
    pub fn coupon_request(code: &str, discount_type: DiscountType, value: Decimal) -> CreateCouponRequest {
        let now = Utc::now();
        CreateCouponRequest {
            code: code.to_string(),
            description: None,
            discount_type,
            discount_value: value,
            minimum_order_value: None,
            maximum_discount: None,
            usage_limit: None,
            is_active: Some(true),
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(30),
        }
    }

    pub async fn seed_coupon(&self, request: CreateCouponRequest) -> Uuid {
        self.state
            .services
            .coupons
            .create(request)
            .await
            .expect("seed coupon")
            .id
    }

    /// Events emitted so far, consuming them.
    pub async fn drain_events(&self) -> Vec<Event> {
        let mut rx = self.events.lock().await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// JSON request through the full router; returns status and parsed body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize json request body"))
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).expect("build request")).await
    }

    /// Raw webhook delivery with extra headers.
    pub async fn post_webhook(
        &self,
        provider_path: &str,
        body: &Value,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/v1/webhooks/{}", provider_path))
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(Body::from(serde_json::to_vec(body).expect("serialize webhook")))
            .expect("build webhook request");
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

fn actor(email: &str, is_admin: bool) -> Actor {
    Actor {
        user_id: Uuid::new_v4(),
        email: Some(email.to_string()),
        is_admin,
    }
}

pub fn count_payment_approved(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, Event::PaymentApproved { .. }))
        .count()
}
