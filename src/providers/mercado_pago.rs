//! Mercado Pago client: PIX charges through `/v1/payments`, hosted checkout
//! through `/checkout/preferences`.

use async_trait::async_trait;
use axum::http::HeaderMap;
use reqwest::{Client, StatusCode};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use rust_decimal_macros::dec;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    id_to_string,
    signature::{parse_signature_header, verify_hmac, SignatureError},
    CancelOutcome, PaymentProvider, PaymentRequest, PaymentResult, ProviderError,
    ProviderPayment, WebhookEvent,
};
use crate::entities::{order::PaymentMethod, payment::ProviderKind};

const MINIMUM_AMOUNT: Decimal = dec!(0.01);

#[derive(Debug, Clone)]
pub struct MercadoPagoConfig {
    pub access_token: String,
    pub base_url: String,
    pub notification_url: String,
    /// Storefront URL the hosted checkout sends buyers back to
    pub return_url: String,
    pub webhook_secret: Option<String>,
}

pub struct MercadoPagoProvider {
    client: Client,
    config: MercadoPagoConfig,
}

#[derive(Debug, Deserialize)]
struct MpPayment {
    id: Value,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    point_of_interaction: Option<MpPointOfInteraction>,
}

#[derive(Debug, Deserialize)]
struct MpPointOfInteraction {
    #[serde(default)]
    transaction_data: Option<MpTransactionData>,
}

#[derive(Debug, Deserialize)]
struct MpTransactionData {
    qr_code: Option<String>,
    qr_code_base64: Option<String>,
    ticket_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MpPreference {
    id: String,
    init_point: Option<String>,
    sandbox_init_point: Option<String>,
}

impl MercadoPagoProvider {
    pub fn new(client: Client, mut config: MercadoPagoConfig) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn amount(request: &PaymentRequest) -> Result<f64, ProviderError> {
        if request.amount < MINIMUM_AMOUNT {
            return Err(ProviderError::InvalidRequest(format!(
                "amount {} is below the minimum of {}",
                request.amount, MINIMUM_AMOUNT
            )));
        }
        request
            .amount
            .to_f64()
            .ok_or_else(|| ProviderError::InvalidRequest("amount is not representable".into()))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
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

    async fn create_pix(&self, request: &PaymentRequest) -> Result<PaymentResult, ProviderError> {
        let body = json!({
            "transaction_amount": Self::amount(request)?,
            "description": request.description,
            "payment_method_id": "pix",
            "external_reference": request.order_id.to_string(),
            "notification_url": self.config.notification_url,
            "payer": { "email": request.payer_email },
        });

        let response = self
            .client
            .post(self.url("/v1/payments"))
            .bearer_auth(&self.config.access_token)
            .header("X-Idempotency-Key", request.order_id.to_string())
            .json(&body)
            .send()
            .await?;

        let payment: MpPayment = Self::read_json(response).await?;
        let provider_id = id_to_string(&payment.id)
            .ok_or_else(|| ProviderError::InvalidResponse("payment id missing".into()))?;
        let transaction = payment
            .point_of_interaction
            .and_then(|poi| poi.transaction_data);

        let (qr_code, qr_code_base64, ticket_url) = match transaction {
            Some(data) => (data.qr_code, data.qr_code_base64, data.ticket_url),
            None => (None, None, None),
        };

        Ok(PaymentResult {
            provider_id,
            status: payment.status.unwrap_or_else(|| "pending".to_string()),
            qr_code,
            qr_code_base64,
            checkout_url: ticket_url,
            ..Default::default()
        })
    }

    async fn create_preference(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentResult, ProviderError> {
        let return_base = self.config.return_url.trim_end_matches('/');
        let order_url = format!("{}/orders/{}", return_base, request.order_id);
        let body = json!({
            "items": [{
                "id": request.order_id.to_string(),
                "title": request.description,
                "quantity": 1,
                "unit_price": Self::amount(request)?,
                "currency_id": request.currency,
            }],
            "payer": { "email": request.payer_email },
            "external_reference": request.order_id.to_string(),
            "notification_url": self.config.notification_url,
            "back_urls": {
                "success": order_url,
                "failure": order_url,
                "pending": order_url,
            },
            "auto_return": "approved",
        });

        let response = self
            .client
            .post(self.url("/checkout/preferences"))
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await?;

        let preference: MpPreference = Self::read_json(response).await?;
        Ok(PaymentResult {
            provider_id: preference.id.clone(),
            status: "pending".to_string(),
            checkout_url: preference.init_point.clone(),
            preference_id: Some(preference.id),
            init_point: preference.init_point,
            sandbox_init_point: preference.sandbox_init_point,
            ..Default::default()
        })
    }
}

#[async_trait]
impl PaymentProvider for MercadoPagoProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::MercadoPago
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id, method = %request.method))]
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentResult, ProviderError> {
        match request.method {
            PaymentMethod::Pix => self.create_pix(request).await,
            PaymentMethod::MercadoPago => self.create_preference(request).await,
            other => Err(ProviderError::InvalidRequest(format!(
                "Mercado Pago cannot settle {}",
                other
            ))),
        }
    }

    async fn get_payment(&self, provider_id: &str) -> Result<ProviderPayment, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/payments/{}", provider_id)))
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;

        let payment: MpPayment = Self::read_json(response).await?;
        Ok(ProviderPayment {
            id: id_to_string(&payment.id).unwrap_or_else(|| provider_id.to_string()),
            status: payment.status.unwrap_or_else(|| "pending".to_string()),
            external_reference: payment.external_reference,
        })
    }

    async fn cancel_payment(&self, provider_id: &str) -> Result<CancelOutcome, ProviderError> {
        let response = self
            .client
            .put(self.url(&format!("/v1/payments/{}", provider_id)))
            .bearer_auth(&self.config.access_token)
            .json(&json!({ "status": "cancelled" }))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(CancelOutcome::AlreadyGone),
            status if status.is_success() => Ok(CancelOutcome::Cancelled),
            status => Err(ProviderError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn process_webhook(
        &self,
        payload: &Value,
    ) -> Result<Option<WebhookEvent>, ProviderError> {
        let topic = payload
            .get("type")
            .or_else(|| payload.get("topic"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if topic != "payment" {
            debug!(topic, "ignoring Mercado Pago notification");
            return Ok(None);
        }

        let Some(payment_id) = payload
            .get("data")
            .and_then(|data| data.get("id"))
            .and_then(id_to_string)
        else {
            return Err(ProviderError::InvalidRequest(
                "notification has no data.id".into(),
            ));
        };

        let payment = self.get_payment(&payment_id).await?;
        let order_id = match payment
            .external_reference
            .as_deref()
            .map(Uuid::parse_str)
        {
            Some(Ok(order_id)) => order_id,
            _ => {
                warn!(payment_id, "Mercado Pago payment has no order reference");
                return Ok(None);
            }
        };

        Ok(Some(WebhookEvent {
            order_id,
            status: payment.status,
            provider_payment_id: Some(payment.id),
        }))
    }

    fn verify_webhook(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), SignatureError> {
        let Some(secret) = self.config.webhook_secret.as_deref() else {
            return Ok(());
        };

        let raw = headers
            .get("x-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or(SignatureError::Missing)?;
        let header = parse_signature_header(raw);
        let ts = header.timestamp.ok_or(SignatureError::Malformed)?;
        if header.signatures.is_empty() {
            return Err(SignatureError::Malformed);
        }

        let request_id = headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let data_id = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|payload| payload.get("data")?.get("id").and_then(id_to_string))
            .unwrap_or_default()
            .to_lowercase();

        let manifest = format!("id:{};request-id:{};ts:{};", data_id, request_id, ts);
        verify_hmac(secret, manifest.as_bytes(), &header.signatures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::signature::hmac_sha256_hex;
    use assert_matches::assert_matches;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer, secret: Option<&str>) -> MercadoPagoProvider {
        MercadoPagoProvider::new(
            Client::new(),
            MercadoPagoConfig {
                access_token: "TEST-token".into(),
                base_url: server.uri(),
                notification_url: "https://shop.test/api/v1/webhooks/mercado-pago".into(),
                return_url: "https://shop.test".into(),
                webhook_secret: secret.map(str::to_string),
            },
        )
    }

    fn request(method: PaymentMethod, amount: Decimal) -> PaymentRequest {
        PaymentRequest {
            order_id: Uuid::new_v4(),
            method,
            amount,
            currency: "BRL".into(),
            payer_email: Some("buyer@example.com".into()),
            description: "Order".into(),
        }
    }

    #[tokio::test]
    async fn pix_payment_returns_qr_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .and(header("authorization", "Bearer TEST-token"))
            .and(body_partial_json(json!({ "payment_method_id": "pix" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 1234567890u64,
                "status": "pending",
                "point_of_interaction": {
                    "transaction_data": {
                        "qr_code": "00020126...",
                        "qr_code_base64": "iVBORw0KGgo=",
                        "ticket_url": "https://mp.test/ticket"
                    }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = provider(&server, None)
            .create_payment(&request(PaymentMethod::Pix, dec!(85.00)))
            .await
            .unwrap();

        assert_eq!(result.provider_id, "1234567890");
        assert_eq!(result.status, "pending");
        assert_eq!(result.qr_code.as_deref(), Some("00020126..."));
        assert_eq!(result.qr_code_base64.as_deref(), Some("iVBORw0KGgo="));
    }

    #[tokio::test]
    async fn checkout_preference_returns_init_points() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/checkout/preferences"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "pref-1",
                "init_point": "https://mp.test/checkout?pref=1",
                "sandbox_init_point": "https://sandbox.mp.test/checkout?pref=1"
            })))
            .mount(&server)
            .await;

        let result = provider(&server, None)
            .create_payment(&request(PaymentMethod::MercadoPago, dec!(10)))
            .await
            .unwrap();

        assert_eq!(result.provider_id, "pref-1");
        assert_eq!(result.preference_id.as_deref(), Some("pref-1"));
        assert_eq!(result.checkout_url, result.init_point);
        assert!(result.sandbox_init_point.is_some());
    }

    #[tokio::test]
    async fn rejects_amount_below_one_cent() {
        let server = MockServer::start().await;
        let err = provider(&server, None)
            .create_payment(&request(PaymentMethod::Pix, dec!(0.001)))
            .await
            .unwrap_err();
        assert_matches!(err, ProviderError::InvalidRequest(_));
    }

    #[tokio::test]
    async fn api_failure_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad payer"))
            .mount(&server)
            .await;

        let err = provider(&server, None)
            .create_payment(&request(PaymentMethod::Pix, dec!(10)))
            .await
            .unwrap_err();
        assert_matches!(err, ProviderError::Api { status: 400, .. });
    }

    #[tokio::test]
    async fn cancel_treats_not_found_as_already_gone() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/payments/42"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/payments/43"))
            .and(body_partial_json(json!({ "status": "cancelled" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 43 })))
            .mount(&server)
            .await;

        let mp = provider(&server, None);
        assert_eq!(mp.cancel_payment("42").await.unwrap(), CancelOutcome::AlreadyGone);
        assert_eq!(mp.cancel_payment("43").await.unwrap(), CancelOutcome::Cancelled);
    }

    #[tokio::test]
    async fn payment_notification_is_resolved_through_the_api() {
        let server = MockServer::start().await;
        let order_id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path("/v1/payments/555"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 555,
                "status": "approved",
                "external_reference": order_id.to_string()
            })))
            .mount(&server)
            .await;

        let event = provider(&server, None)
            .process_webhook(&json!({ "type": "payment", "data": { "id": "555" } }))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(event.order_id, order_id);
        assert_eq!(event.status, "approved");
        assert_eq!(event.provider_payment_id.as_deref(), Some("555"));
    }

    #[tokio::test]
    async fn non_payment_topics_are_ignored() {
        let server = MockServer::start().await;
        let event = provider(&server, None)
            .process_webhook(&json!({ "topic": "merchant_order", "data": { "id": "1" } }))
            .await
            .unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn signature_manifest_is_verified_when_secret_is_set() {
        let server_uri = "http://127.0.0.1:1".to_string();
        let mp = MercadoPagoProvider::new(
            Client::new(),
            MercadoPagoConfig {
                access_token: "t".into(),
                base_url: server_uri,
                notification_url: String::new(),
                return_url: String::new(),
                webhook_secret: Some("mp-secret".into()),
            },
        );
        let body = br#"{"type":"payment","data":{"id":"ABC123"}}"#;
        let signature = hmac_sha256_hex("mp-secret", b"id:abc123;request-id:req-9;ts:1704908010;");

        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "req-9".parse().unwrap());
        headers.insert(
            "x-signature",
            format!("ts=1704908010,v1={}", signature).parse().unwrap(),
        );
        assert!(mp.verify_webhook(&headers, body).is_ok());

        headers.insert("x-request-id", "req-10".parse().unwrap());
        assert_eq!(mp.verify_webhook(&headers, body), Err(SignatureError::Mismatch));

        headers.remove("x-signature");
        assert_eq!(mp.verify_webhook(&headers, body), Err(SignatureError::Missing));
    }
}
