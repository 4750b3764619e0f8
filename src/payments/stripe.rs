//! Stripe-compatible REST client (form-encoded requests, basic auth, no SDK).

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, de::DeserializeOwned};
use sha2::Sha256;

use crate::{
    config::PaymentConfig,
    error::{AppError, AppResult},
    payments::{
        IntentRequest, IntentStatus, PaymentIntent, PaymentProvider, ProviderEvent,
        ProviderEventKind, Refund, RefundRequest,
    },
};

/// Events older than this are rejected to stop replays of captured payloads.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
    webhook_secret: String,
}

impl StripeClient {
    pub fn new(config: &PaymentConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("http client: {e}")))?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
        })
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        op: &'static str,
    ) -> AppResult<T> {
        let response = request
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| transport_error(op, e))?;
        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| transport_error(op, e))?;

        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("unknown provider error");
            tracing::warn!(op, %status, message, "payment provider rejected request");
            return Err(AppError::external(format!("{op} failed: {message}")));
        }

        serde_json::from_value(body)
            .map_err(|e| AppError::external(format!("{op}: unexpected response: {e}")))
    }
}

fn transport_error(op: &str, err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        tracing::warn!(op, "payment provider timed out");
        AppError::external(format!("{op} timed out"))
    } else {
        tracing::warn!(op, error = %err, "payment provider unreachable");
        AppError::external(format!("{op}: {err}"))
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_payment_intent(&self, request: IntentRequest) -> AppResult<PaymentIntent> {
        let amount = request.amount_minor.to_string();
        let currency = request.currency.to_ascii_lowercase();
        let form = [
            ("amount", amount.as_str()),
            ("currency", currency.as_str()),
            ("payment_method_types[]", request.method.as_str()),
            ("metadata[order_id]", request.order_ref.as_str()),
        ];
        let raw: RawIntent = self
            .send(
                self.http
                    .post(format!("{}/v1/payment_intents", self.api_base))
                    .header("Idempotency-Key", &request.idempotency_key)
                    .form(&form),
                "create_payment_intent",
            )
            .await?;
        Ok(raw.into())
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> AppResult<PaymentIntent> {
        let raw: RawIntent = self
            .send(
                self.http
                    .get(format!("{}/v1/payment_intents/{intent_id}", self.api_base))
                    .query(&[("expand[]", "latest_charge")]),
                "retrieve_payment_intent",
            )
            .await?;
        Ok(raw.into())
    }

    async fn create_refund(&self, request: RefundRequest) -> AppResult<Refund> {
        let amount = request.amount_minor.to_string();
        let form = [
            ("payment_intent", request.intent_id.as_str()),
            ("amount", amount.as_str()),
        ];
        let raw: RawRefund = self
            .send(
                self.http
                    .post(format!("{}/v1/refunds", self.api_base))
                    .header("Idempotency-Key", &request.idempotency_key)
                    .form(&form),
                "create_refund",
            )
            .await?;

        let status = raw.status.unwrap_or_else(|| "pending".to_string());
        if status == "failed" || status == "canceled" {
            return Err(AppError::external(format!("refund {} {status}", raw.id)));
        }
        Ok(Refund { id: raw.id, status })
    }

    fn verify_and_parse_webhook(&self, payload: &[u8], signature: &str) -> AppResult<ProviderEvent> {
        verify_signature(
            payload,
            signature,
            &self.webhook_secret,
            chrono::Utc::now().timestamp(),
        )?;
        parse_event(payload)
    }
}

/// Verifies a `t=<unix>,v1=<hex hmac>` header: HMAC-SHA256 over `"{t}.{payload}"`.
pub fn verify_signature(payload: &[u8], header: &str, secret: &str, now: i64) -> AppResult<()> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(v) = part.strip_prefix("v1=") {
            signatures.push(v);
        }
    }

    let reject = |reason: &str| AppError::Authentication(reason.to_string());
    let timestamp = timestamp.ok_or_else(|| reject("signature header has no timestamp"))?;
    if signatures.is_empty() {
        return Err(reject("signature header has no v1 signature"));
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal(anyhow::anyhow!("invalid webhook secret")))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if !matched {
        return Err(reject("webhook signature mismatch"));
    }

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| reject("signature timestamp is not a number"))?;
    if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(reject("webhook timestamp outside tolerance"));
    }

    Ok(())
}

/// Decodes a verified event body into the kinds the reconciler understands.
pub fn parse_event(payload: &[u8]) -> AppResult<ProviderEvent> {
    let raw: RawEvent = serde_json::from_slice(payload)
        .map_err(|e| AppError::validation(format!("malformed webhook payload: {e}")))?;
    let malformed =
        |e: serde_json::Error| AppError::validation(format!("malformed {} object: {e}", raw.kind));

    let kind = match raw.kind.as_str() {
        "payment_intent.succeeded" => {
            let intent: RawIntent =
                serde_json::from_value(raw.data.object.clone()).map_err(malformed)?;
            ProviderEventKind::PaymentSucceeded {
                charge_id: intent.latest_charge.map(RawChargeRef::into_id),
                intent_id: intent.id,
            }
        }
        "payment_intent.payment_failed" => {
            let intent: RawIntent =
                serde_json::from_value(raw.data.object.clone()).map_err(malformed)?;
            ProviderEventKind::PaymentFailed {
                message: intent.last_payment_error.and_then(|e| e.message),
                intent_id: intent.id,
            }
        }
        "charge.refunded" => {
            let charge: RawChargeEvent =
                serde_json::from_value(raw.data.object.clone()).map_err(malformed)?;
            let intent_id = charge.payment_intent.ok_or_else(|| {
                AppError::validation(format!("charge {} has no payment_intent", charge.id))
            })?;
            ProviderEventKind::ChargeRefunded {
                intent_id,
                charge_id: charge.id,
                amount_minor: charge.amount,
                amount_refunded_minor: charge.amount_refunded,
            }
        }
        other => ProviderEventKind::Ignored {
            kind: other.to_string(),
        },
    };

    Ok(ProviderEvent { id: raw.id, kind })
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct RawIntent {
    id: String,
    status: String,
    #[serde(default)]
    amount: i64,
    client_secret: Option<String>,
    latest_charge: Option<RawChargeRef>,
    last_payment_error: Option<RawPaymentError>,
}

impl From<RawIntent> for PaymentIntent {
    fn from(raw: RawIntent) -> Self {
        let status = match raw.status.as_str() {
            "succeeded" => IntentStatus::Succeeded,
            "canceled" => IntentStatus::Failed,
            _ => IntentStatus::Pending,
        };
        let (charge_id, amount_refunded_minor) = match raw.latest_charge {
            Some(RawChargeRef::Expanded(charge)) => (Some(charge.id), charge.amount_refunded),
            Some(RawChargeRef::Id(id)) => (Some(id), 0),
            None => (None, 0),
        };
        PaymentIntent {
            id: raw.id,
            status,
            client_secret: raw.client_secret,
            charge_id,
            amount_minor: raw.amount,
            amount_refunded_minor,
            failure_message: raw.last_payment_error.and_then(|e| e.message),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawChargeRef {
    Id(String),
    Expanded(RawCharge),
}

impl RawChargeRef {
    fn into_id(self) -> String {
        match self {
            RawChargeRef::Id(id) => id,
            RawChargeRef::Expanded(charge) => charge.id,
        }
    }
}

#[derive(Deserialize)]
struct RawCharge {
    id: String,
    #[serde(default)]
    amount_refunded: i64,
}

#[derive(Deserialize)]
struct RawChargeEvent {
    id: String,
    payment_intent: Option<String>,
    amount: i64,
    amount_refunded: i64,
}

#[derive(Deserialize)]
struct RawPaymentError {
    message: Option<String>,
}

#[derive(Deserialize)]
struct RawRefund {
    id: String,
    status: Option<String>,
}
