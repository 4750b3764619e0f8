//! Payment provider boundary.
//!
//! The core only talks to [`PaymentProvider`]; [`stripe::StripeClient`] is the REST
//! implementation used in production.

use async_trait::async_trait;
use mockall::automock;

use crate::error::AppResult;

pub mod currency;
pub mod stripe;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub order_ref: String,
    pub method: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStatus {
    /// Awaiting client confirmation or still processing.
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub status: IntentStatus,
    pub client_secret: Option<String>,
    pub charge_id: Option<String>,
    pub amount_minor: i64,
    pub amount_refunded_minor: i64,
    pub failure_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRequest {
    pub intent_id: String,
    pub amount_minor: i64,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refund {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEventKind {
    PaymentSucceeded {
        intent_id: String,
        charge_id: Option<String>,
    },
    PaymentFailed {
        intent_id: String,
        message: Option<String>,
    },
    ChargeRefunded {
        intent_id: String,
        charge_id: String,
        amount_minor: i64,
        amount_refunded_minor: i64,
    },
    /// Any event type the reconciler does not act on.
    Ignored { kind: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEvent {
    pub id: String,
    pub kind: ProviderEventKind,
}

#[automock]
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Creates a payment intent. The idempotency key makes retries of the same attempt safe.
    async fn create_payment_intent(&self, request: IntentRequest) -> AppResult<PaymentIntent>;

    async fn retrieve_payment_intent(&self, intent_id: &str) -> AppResult<PaymentIntent>;

    async fn create_refund(&self, request: RefundRequest) -> AppResult<Refund>;

    /// Checks the signature header against the shared secret and decodes the event.
    fn verify_and_parse_webhook(&self, payload: &[u8], signature: &str)
    -> AppResult<ProviderEvent>;
}
