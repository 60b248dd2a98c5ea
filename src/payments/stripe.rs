use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};
use crate::models::PaymentSessionMetadata;

use super::{CURRENCY, CheckoutSession};

type HmacSha256 = Hmac<Sha256>;

/// Deliveries signed longer ago than this are treated as replays.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
}

/// One line on the hosted payment page.
#[derive(Debug, Clone, PartialEq)]
pub struct StripeLineItem {
    pub name: String,
    pub image_url: Option<String>,
    pub unit_amount_cents: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Default)]
pub struct CheckoutSessionRequest {
    pub line_items: Vec<StripeLineItem>,
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: Option<String>,
    pub client_reference_id: Option<String>,
    pub metadata: PaymentSessionMetadata,
    /// Sent as `Idempotency-Key` so a retried request cannot open two sessions
    pub idempotency_key: Option<String>,
}

impl CheckoutSessionRequest {
    /// Flatten into Stripe's bracketed form encoding.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("mode".to_string(), "payment".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
        ];

        for (i, item) in self.line_items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            fields.push((format!("{}[price_data][currency]", prefix), CURRENCY.to_string()));
            fields.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
            if let Some(image) = &item.image_url {
                fields.push((
                    format!("{}[price_data][product_data][images][0]", prefix),
                    image.clone(),
                ));
            }
            fields.push((
                format!("{}[price_data][unit_amount]", prefix),
                item.unit_amount_cents.to_string(),
            ));
            fields.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
        }

        if let Some(email) = &self.customer_email {
            fields.push(("customer_email".to_string(), email.clone()));
        }
        if let Some(reference) = &self.client_reference_id {
            fields.push(("client_reference_id".to_string(), reference.clone()));
        }
        if let Some(order_id) = &self.metadata.order_id {
            fields.push(("metadata[orderId]".to_string(), order_id.clone()));
        }
        if let Some(buyer_id) = &self.metadata.buyer_id {
            fields.push(("metadata[buyerId]".to_string(), buyer_id.clone()));
        }
        if let Some(cart_data) = &self.metadata.cart_data {
            fields.push(("metadata[cartData]".to_string(), cart_data.clone()));
        }

        fields
    }
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Self {
        let mut builder = Client::builder().timeout(Duration::from_secs(15));
        if is_loopback(&config.api_base) {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });

        Self {
            client,
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    pub async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession> {
        let mut builder = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&request.form_fields());
        if let Some(key) = &request.idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "Stripe API error ({}): {}",
                status, error_text
            )));
        }

        let session: CreateSessionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse Stripe response: {}", e)))?;

        let url = session.url.ok_or_else(|| {
            AppError::Upstream(format!("Stripe session {} has no redirect URL", session.id))
        })?;

        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }

    /// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=<hex>...]`).
    ///
    /// Returns `Err` for a header that cannot be parsed, `Ok(false)` for a
    /// well-formed header that does not match or is outside the tolerance window.
    pub fn verify_webhook_signature(&self, payload: &[u8], signature_header: &str) -> Result<bool> {
        self.verify_webhook_signature_at(payload, signature_header, chrono::Utc::now().timestamp())
    }

    pub fn verify_webhook_signature_at(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: i64,
    ) -> Result<bool> {
        let header = parse_signature_header(signature_header)?;

        if now.abs_diff(header.timestamp) > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
            return Ok(false);
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal("Invalid webhook secret".into()))?;
        mac.update(header.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        Ok(header.signatures.iter().any(|candidate| {
            hex::decode(candidate)
                .map(|bytes| bool::from(expected.as_slice().ct_eq(bytes.as_slice())))
                .unwrap_or(false)
        }))
    }
}

/// Local API stand-ins are reached directly, never through an outbound proxy.
fn is_loopback(api_base: &str) -> bool {
    let host = api_base
        .split("://")
        .nth(1)
        .unwrap_or(api_base)
        .split(['/', ':'])
        .next()
        .unwrap_or_default();
    matches!(host, "localhost" | "127.0.0.1")
}

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> Result<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| AppError::BadRequest("Signature header has no timestamp".into()))?;
    if signatures.is_empty() {
        return Err(AppError::BadRequest("Signature header has no v1 signature".into()));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Amount charged, in cents
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<PaymentSessionMetadata>,
}

impl StripeCheckoutSession {
    /// `no_payment_required` covers fully discounted sessions.
    pub fn is_paid(&self) -> bool {
        matches!(
            self.payment_status.as_deref(),
            Some("paid") | Some("no_payment_required")
        )
    }

    pub fn metadata(&self) -> PaymentSessionMetadata {
        self.metadata.clone().unwrap_or_default()
    }
}
